//! Auto-start controller
//!
//! Implements the three-light rule that moves sequencing authority from the
//! starter to the automatic system, the second-lane staging timeout, the
//! guard-beam rollout check, the two-stage randomized release delay, and the
//! post-trigger settle back to `Idle`.
//!
//! Every delayed transition is owned by a single timer supervisor task per
//! controller (see [`timers`]).

pub mod controller;
pub mod delay;
pub mod state;
pub mod timers;

pub use controller::{AutoStartController, AutoStartStatus};
pub use delay::{compute_release_delay, release_delay_bounds};
pub use state::{AutoStartState, FaultKind, StagingStatus};
