//! Class timing presets.
//!
//! | Class | Staging timeout | Min staging | Tree |
//! |---|---|---|---|
//! | Top Fuel / Funny Car / Pro Stock | 7 s | 0.5 s | Pro (0.4 s) |
//! | Pro Modified / PSM | 10 s | 0.5 s | Pro (0.4 s) |
//! | Bracket / Super classes | 15 s | 0.6 s | Sportsman (0.5 s) |
//! | Junior Dragster | 15 s | 1.0 s | Sportsman (0.5 s) |

use std::time::Duration;

use serde::Serialize;

use super::schema::{RacingClass, SequenceKind};

/// Green delay on a Pro tree.
pub const PRO_GREEN_DELAY: Duration = Duration::from_millis(400);

/// Green delay on a Sportsman tree.
pub const SPORTSMAN_GREEN_DELAY: Duration = Duration::from_millis(500);

/// Class-specific timing preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassPreset {
    /// Class this preset belongs to
    pub class: RacingClass,
    /// Second-lane staging timeout
    #[serde(with = "super::schema::duration_str")]
    pub staging_timeout: Duration,
    /// Minimum time both lanes stay staged before release
    #[serde(with = "super::schema::duration_str")]
    pub min_staging_duration: Duration,
    /// Tree style
    pub sequence: SequenceKind,
    /// Delay from amber to green
    #[serde(with = "super::schema::duration_str")]
    pub green_delay: Duration,
}

impl ClassPreset {
    /// Returns the preset for a class.
    #[must_use]
    pub const fn for_class(class: RacingClass) -> Self {
        let (timeout_secs, min_staging_ms, sequence) = match class {
            RacingClass::TopFuel | RacingClass::FunnyCar | RacingClass::ProStock => {
                (7, 500, SequenceKind::Pro)
            }
            RacingClass::ProModified | RacingClass::ProStockMotorcycle => {
                (10, 500, SequenceKind::Pro)
            }
            RacingClass::Bracket
            | RacingClass::SuperComp
            | RacingClass::SuperGas
            | RacingClass::SuperStock
            | RacingClass::SuperStreet => (15, 600, SequenceKind::Sportsman),
            RacingClass::JuniorDragster => (15, 1000, SequenceKind::Sportsman),
        };
        let green_delay = match sequence {
            SequenceKind::Pro => PRO_GREEN_DELAY,
            SequenceKind::Sportsman => SPORTSMAN_GREEN_DELAY,
        };
        Self {
            class,
            staging_timeout: Duration::from_secs(timeout_secs),
            min_staging_duration: Duration::from_millis(min_staging_ms),
            sequence,
            green_delay,
        }
    }

    /// All presets in class table order.
    #[must_use]
    pub fn all() -> Vec<Self> {
        RacingClass::ALL.into_iter().map(Self::for_class).collect()
    }
}
