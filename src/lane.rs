//! Lane identifiers shared by every component.

use serde::{Deserialize, Serialize};

/// One of the two racing lanes.
///
/// Serialized as its lane number (`1` or `2`) in the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Lane {
    /// Lane 1 (starter's left)
    Left,
    /// Lane 2 (starter's right)
    Right,
}

impl Lane {
    /// Both lanes in index order.
    pub const BOTH: [Self; 2] = [Self::Left, Self::Right];

    /// Zero-based index for per-lane arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }

    /// One-based lane number as painted on the track.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::Left => 1,
            Self::Right => 2,
        }
    }

    /// The opposite lane.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lane {}", self.number())
    }
}

impl From<Lane> for u8 {
    fn from(lane: Lane) -> Self {
        lane.number()
    }
}

impl TryFrom<u8> for Lane {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(Self::Left),
            2 => Ok(Self::Right),
            other => Err(format!("lane must be 1 or 2, got {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_and_number() {
        assert_eq!(Lane::Left.index(), 0);
        assert_eq!(Lane::Right.index(), 1);
        assert_eq!(Lane::Left.number(), 1);
        assert_eq!(Lane::Right.number(), 2);
    }

    #[test]
    fn test_other() {
        assert_eq!(Lane::Left.other(), Lane::Right);
        assert_eq!(Lane::Right.other(), Lane::Left);
    }

    #[test]
    fn test_display() {
        assert_eq!(Lane::Right.to_string(), "lane 2");
    }

    #[test]
    fn test_serde_as_number() {
        assert_eq!(serde_json::to_string(&Lane::Left).unwrap(), "1");
        let lane: Lane = serde_json::from_str("2").unwrap();
        assert_eq!(lane, Lane::Right);
        assert!(serde_json::from_str::<Lane>("3").is_err());
    }
}
