//! Auto-start state types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The auto-start controller's single observable progress indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoStartState {
    /// Waiting for the three-light rule
    #[default]
    Idle,
    /// Reserved; no transition enters it
    Monitoring,
    /// Holds sequencing authority, waiting for both lanes to stage
    Activated,
    /// Both lanes staged, release pending
    Staging,
    /// Tree sequence requested, settling
    Triggered,
    /// Safety fault; cleared only by override or reset
    Fault,
}

impl AutoStartState {
    /// Lowercase name, also used as a metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Monitoring => "monitoring",
            Self::Activated => "activated",
            Self::Staging => "staging",
            Self::Triggered => "triggered",
            Self::Fault => "fault",
        }
    }
}

impl std::fmt::Display for AutoStartState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-lane staging bookkeeping, owned by the auto-start controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StagingStatus {
    /// Pre-stage beam broken
    pub pre_staged: bool,
    /// Stage beam broken
    pub staged: bool,
    /// Time of the last beam update for this lane
    pub last_update: Option<DateTime<Utc>>,
    /// Rollout exceeded the legal maximum
    pub guard_trip: bool,
    /// Last reported rollout past the stage beam, in inches
    pub rollout: f64,
}

impl StagingStatus {
    /// Number of lit staging bulbs this lane contributes to the three-light rule.
    #[must_use]
    pub fn lit_bulbs(&self) -> u8 {
        u8::from(self.pre_staged) + u8::from(self.staged)
    }
}

/// Why the controller faulted; used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Rollout past the guard beam
    GuardTrip,
    /// Second lane never staged
    StagingTimeout,
    /// Tree refused to hand over authority
    Activation,
    /// Tree refused to start the sequence
    TreeRefused,
    /// Courtesy staging under the `fault` policy
    Courtesy,
}

impl FaultKind {
    /// Metric label.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::GuardTrip => "guard_trip",
            Self::StagingTimeout => "staging_timeout",
            Self::Activation => "activation",
            Self::TreeRefused => "tree_refused",
            Self::Courtesy => "courtesy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_value(AutoStartState::Triggered).unwrap();
        assert_eq!(json, "triggered");
        assert_eq!(AutoStartState::default(), AutoStartState::Idle);
    }

    #[test]
    fn test_lit_bulbs() {
        let mut status = StagingStatus::default();
        assert_eq!(status.lit_bulbs(), 0);
        status.pre_staged = true;
        assert_eq!(status.lit_bulbs(), 1);
        status.staged = true;
        assert_eq!(status.lit_bulbs(), 2);
    }
}
