//! Light-tree controller
//!
//! Owns the bulbs on both sides of the tree, the starter's arming flag, the
//! auto-start activation flag, the deep-staging and forward-motion rule
//! engines, and the Pro/Sportsman light sequences.
//!
//! The auto-start controller never holds a [`LightTree`] directly; it sees
//! only the narrow [`TreeControl`] capability.

pub mod controller;
pub mod lights;
pub mod rules;
pub mod sequence;

use async_trait::async_trait;

use crate::config::schema::SequenceKind;
use crate::error::TreeError;

pub use controller::{LightTree, TreeStatus};
pub use lights::{LightKind, LightState};
pub use rules::{MotionTag, StagingMotionState};

/// What the auto-start controller may ask of the tree.
#[async_trait]
pub trait TreeControl: Send + Sync {
    /// Whether the starter has armed the tree.
    async fn is_armed(&self) -> bool;

    /// Claims sequencing authority.
    ///
    /// # Errors
    ///
    /// Fails when the tree is not armed or already activated.
    async fn activate_auto_start(&self) -> Result<(), TreeError>;

    /// Starts the light sequence under auto-start authority.
    ///
    /// # Errors
    ///
    /// Fails when the tree is not armed, not activated, or already running a
    /// sequence.
    async fn start_staging_process(&self, kind: SequenceKind) -> Result<(), TreeError>;

    /// Gives sequencing authority back to the starter after a fault or an
    /// abandoned race. Returns whether activation was cleared.
    async fn release_auto_start(&self) -> bool;
}
