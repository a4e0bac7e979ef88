//! Per-lane bulb state.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::lane::Lane;

/// Bulbs on one side of the tree, top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LightKind {
    /// Pre-stage bulb
    PreStage,
    /// Stage bulb
    Stage,
    /// Top amber
    Amber1,
    /// Middle amber
    Amber2,
    /// Bottom amber
    Amber3,
    /// Green
    Green,
    /// Red (foul start or emergency indicator)
    Red,
}

impl LightKind {
    /// Every bulb, top to bottom.
    pub const ALL: [Self; 7] = [
        Self::PreStage,
        Self::Stage,
        Self::Amber1,
        Self::Amber2,
        Self::Amber3,
        Self::Green,
        Self::Red,
    ];

    /// The three ambers, top to bottom.
    pub const AMBERS: [Self; 3] = [Self::Amber1, Self::Amber2, Self::Amber3];

    const fn index(self) -> usize {
        self as usize
    }
}

/// State of a single bulb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LightState {
    /// Dark
    #[default]
    Off,
    /// Lit
    On,
    /// Flashing
    Blink,
}

impl LightState {
    /// Lit state for a beam reading.
    #[must_use]
    pub const fn from_beam(broken: bool) -> Self {
        if broken { Self::On } else { Self::Off }
    }

    /// Whether the bulb is lit or flashing.
    #[must_use]
    pub const fn is_lit(self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Every bulb on the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LightBoard {
    bulbs: [[LightState; LightKind::ALL.len()]; 2],
}

impl LightBoard {
    /// Returns one bulb's state.
    #[must_use]
    pub const fn get(&self, lane: Lane, kind: LightKind) -> LightState {
        self.bulbs[lane.index()][kind.index()]
    }

    /// Sets one bulb, returning its previous state.
    pub const fn set(&mut self, lane: Lane, kind: LightKind, state: LightState) -> LightState {
        let slot = &mut self.bulbs[lane.index()][kind.index()];
        let previous = *slot;
        *slot = state;
        previous
    }

    /// Sets the same bulb on both lanes.
    pub const fn set_both(&mut self, kind: LightKind, state: LightState) {
        self.set(Lane::Left, kind, state);
        self.set(Lane::Right, kind, state);
    }

    /// Turns ambers, green and red off on both lanes. Staging bulbs keep
    /// tracking the beams.
    pub fn clear_countdown(&mut self) {
        for kind in LightKind::AMBERS {
            self.set_both(kind, LightState::Off);
        }
        self.set_both(LightKind::Green, LightState::Off);
        self.set_both(LightKind::Red, LightState::Off);
    }

    /// Turns every bulb off.
    pub fn all_off(&mut self) {
        *self = Self::default();
    }

    /// Snapshot keyed by lane then bulb.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<Lane, BTreeMap<LightKind, LightState>> {
        Lane::BOTH
            .into_iter()
            .map(|lane| {
                let bulbs = LightKind::ALL
                    .into_iter()
                    .map(|kind| (kind, self.get(lane, kind)))
                    .collect();
                (lane, bulbs)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_returns_previous() {
        let mut board = LightBoard::default();
        assert_eq!(
            board.set(Lane::Left, LightKind::Stage, LightState::On),
            LightState::Off
        );
        assert_eq!(
            board.set(Lane::Left, LightKind::Stage, LightState::Off),
            LightState::On
        );
    }

    #[test]
    fn test_lanes_are_independent() {
        let mut board = LightBoard::default();
        board.set(Lane::Right, LightKind::PreStage, LightState::On);
        assert_eq!(board.get(Lane::Left, LightKind::PreStage), LightState::Off);
        assert_eq!(board.get(Lane::Right, LightKind::PreStage), LightState::On);
    }

    #[test]
    fn test_clear_countdown_keeps_staging_bulbs() {
        let mut board = LightBoard::default();
        board.set(Lane::Left, LightKind::Stage, LightState::On);
        board.set_both(LightKind::Amber2, LightState::On);
        board.set_both(LightKind::Green, LightState::On);
        board.clear_countdown();
        assert_eq!(board.get(Lane::Left, LightKind::Stage), LightState::On);
        assert_eq!(board.get(Lane::Right, LightKind::Amber2), LightState::Off);
        assert_eq!(board.get(Lane::Left, LightKind::Green), LightState::Off);
    }

    #[test]
    fn test_to_map_serializes() {
        let mut board = LightBoard::default();
        board.set(Lane::Right, LightKind::Red, LightState::Blink);
        let json = serde_json::to_value(board.to_map()).unwrap();
        assert_eq!(json["2"]["red"], "blink");
        assert_eq!(json["1"]["pre_stage"], "off");
    }

    #[test]
    fn test_is_lit() {
        assert!(LightState::On.is_lit());
        assert!(LightState::Blink.is_lit());
        assert!(!LightState::Off.is_lit());
    }
}
