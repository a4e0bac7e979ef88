//! Deep-staging and forward-motion rule engines.
//!
//! Both engines are advisory: they report what happened and leave the
//! decision to the starter and officials. Neither touches the auto-start
//! controller.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::schema::RacingClass;

// ============================================================================
// Deep staging
// ============================================================================

/// Result of re-evaluating the deep-staging predicate for one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepStageOutcome {
    /// Nothing new to report
    Unchanged,
    /// Newly deep staged in a class that allows it
    Informational,
    /// Newly deep staged in a class that prohibits it
    Violation,
}

/// A lane is deep staged when its pre-stage bulb is dark while its stage
/// bulb is lit.
#[must_use]
pub const fn is_deep_staged(pre_stage_lit: bool, stage_lit: bool) -> bool {
    !pre_stage_lit && stage_lit
}

/// Compares the predicate before and after a beam update.
///
/// Only the transition into deep staging reports; repeating the same reading
/// is silent.
#[must_use]
pub fn evaluate_deep_stage(
    was_deep: bool,
    is_deep: bool,
    class: RacingClass,
    prohibited: &BTreeSet<RacingClass>,
) -> DeepStageOutcome {
    if was_deep || !is_deep {
        DeepStageOutcome::Unchanged
    } else if prohibited.contains(&class) {
        DeepStageOutcome::Violation
    } else {
        DeepStageOutcome::Informational
    }
}

// ============================================================================
// Forward motion
// ============================================================================

/// One entry in a lane's staging motion history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MotionTag {
    /// First entry into the stage beam
    #[serde(rename = "enter_stage")]
    EnterStage,
    /// Rolled back out of the stage beam
    #[serde(rename = "back_out_stage")]
    BackOutStage,
    /// Re-entered the stage beam without a complete back-out
    #[serde(rename = "re_enter_stage_VIOLATION")]
    ReEnterStageViolation,
}

/// Result of feeding one beam reading through the forward-motion rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionOutcome {
    /// The reading did not change the stage beam
    Unchanged,
    /// A legal transition was recorded
    Recorded(MotionTag),
    /// Re-entry after a back-out; the history now ends with the violation tag
    Violation,
    /// Both beams clear after reaching stage; history wiped
    Reset,
}

/// Per-lane forward-motion bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StagingMotionState {
    /// Whether the lane has entered stage since the last complete back-out
    pub reached_stage: bool,
    /// Last observed stage beam reading
    pub last_stage_beam_state: bool,
    /// Transitions since the last complete back-out, oldest first
    pub motion_history: Vec<MotionTag>,
}

impl StagingMotionState {
    /// Feeds a stage beam reading.
    pub fn on_stage_beam(&mut self, broken: bool) -> MotionOutcome {
        if broken == self.last_stage_beam_state {
            return MotionOutcome::Unchanged;
        }
        self.last_stage_beam_state = broken;

        match (broken, self.reached_stage) {
            (true, false) => {
                self.reached_stage = true;
                self.record(MotionTag::EnterStage)
            }
            // Clear -> set while reached_stage holds means the lane backed out
            // and came back without clearing pre-stage.
            (true, true) => {
                self.motion_history.push(MotionTag::ReEnterStageViolation);
                MotionOutcome::Violation
            }
            (false, true) => self.record(MotionTag::BackOutStage),
            (false, false) => MotionOutcome::Unchanged,
        }
    }

    /// Feeds a pre-stage beam reading together with the current stage beam.
    pub fn on_pre_stage_beam(&mut self, broken: bool, stage_broken: bool) -> MotionOutcome {
        if broken || stage_broken {
            return MotionOutcome::Unchanged;
        }
        if !self.reached_stage && self.motion_history.is_empty() {
            return MotionOutcome::Unchanged;
        }
        self.reached_stage = false;
        self.motion_history.clear();
        MotionOutcome::Reset
    }

    fn record(&mut self, tag: MotionTag) -> MotionOutcome {
        self.motion_history.push(tag);
        MotionOutcome::Recorded(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prohibited() -> BTreeSet<RacingClass> {
        RacingClass::DEEP_STAGE_PROHIBITED.into_iter().collect()
    }

    #[test]
    fn test_deep_stage_predicate() {
        assert!(is_deep_staged(false, true));
        assert!(!is_deep_staged(true, true));
        assert!(!is_deep_staged(false, false));
        assert!(!is_deep_staged(true, false));
    }

    #[test]
    fn test_deep_stage_prohibited_class_is_violation() {
        let outcome = evaluate_deep_stage(false, true, RacingClass::SuperGas, &prohibited());
        assert_eq!(outcome, DeepStageOutcome::Violation);
    }

    #[test]
    fn test_deep_stage_allowed_class_is_informational() {
        let outcome = evaluate_deep_stage(false, true, RacingClass::Bracket, &prohibited());
        assert_eq!(outcome, DeepStageOutcome::Informational);
    }

    #[test]
    fn test_deep_stage_reports_only_on_entry() {
        let set = prohibited();
        assert_eq!(
            evaluate_deep_stage(true, true, RacingClass::SuperGas, &set),
            DeepStageOutcome::Unchanged
        );
        assert_eq!(
            evaluate_deep_stage(true, false, RacingClass::SuperGas, &set),
            DeepStageOutcome::Unchanged
        );
    }

    #[test]
    fn test_forward_motion_re_entry_is_violation() {
        let mut m = StagingMotionState::default();
        assert_eq!(m.on_stage_beam(true), MotionOutcome::Recorded(MotionTag::EnterStage));
        assert_eq!(
            m.on_stage_beam(false),
            MotionOutcome::Recorded(MotionTag::BackOutStage)
        );
        assert_eq!(m.on_stage_beam(true), MotionOutcome::Violation);
        assert_eq!(
            m.motion_history,
            vec![
                MotionTag::EnterStage,
                MotionTag::BackOutStage,
                MotionTag::ReEnterStageViolation
            ]
        );
    }

    #[test]
    fn test_forward_motion_complete_back_out_resets() {
        let mut m = StagingMotionState::default();
        m.on_stage_beam(true);
        m.on_stage_beam(false);
        assert_eq!(m.on_pre_stage_beam(false, false), MotionOutcome::Reset);
        assert!(!m.reached_stage);
        assert!(m.motion_history.is_empty());

        assert_eq!(m.on_stage_beam(true), MotionOutcome::Recorded(MotionTag::EnterStage));
    }

    #[test]
    fn test_pre_stage_clear_with_stage_broken_keeps_history() {
        let mut m = StagingMotionState::default();
        m.on_stage_beam(true);
        assert_eq!(m.on_pre_stage_beam(false, true), MotionOutcome::Unchanged);
        assert!(m.reached_stage);
        assert_eq!(m.motion_history, vec![MotionTag::EnterStage]);
    }

    #[test]
    fn test_repeated_reading_is_unchanged() {
        let mut m = StagingMotionState::default();
        assert_eq!(m.on_stage_beam(false), MotionOutcome::Unchanged);
        m.on_stage_beam(true);
        assert_eq!(m.on_stage_beam(true), MotionOutcome::Unchanged);
        assert_eq!(m.motion_history.len(), 1);
    }

    #[test]
    fn test_motion_tag_serialized_names() {
        let json = serde_json::to_value(MotionTag::ReEnterStageViolation).unwrap();
        assert_eq!(json, "re_enter_stage_VIOLATION");
        let json = serde_json::to_value(MotionTag::EnterStage).unwrap();
        assert_eq!(json, "enter_stage");
    }
}
