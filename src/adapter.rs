//! Beam-mapping adapter.
//!
//! Translates raw per-lane beam readings into calls on the light tree and the
//! auto-start controller, and plumbs class presets into both.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::autostart::{AutoStartController, AutoStartStatus};
use crate::config::schema::{AutoStartConfig, RacingClass, SessionKind, TreeConfig};
use crate::error::TreeError;
use crate::lane::Lane;
use crate::observability::events::{EventBus, RaceEvent};
use crate::tree::{LightTree, TreeControl, TreeStatus};

/// Raw beam state for one lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BeamReading {
    /// Pre-stage beam broken
    pub pre_stage: bool,
    /// Stage beam broken
    pub stage: bool,
    /// Guard beam broken
    pub guard: bool,
    /// Measured rollout past the stage beam, in inches
    pub rollout: f64,
}

impl BeamReading {
    /// Reading with the given staging beams and no rollout.
    #[must_use]
    pub const fn staging(pre_stage: bool, stage: bool) -> Self {
        Self {
            pre_stage,
            stage,
            guard: false,
            rollout: 0.0,
        }
    }
}

/// Owns one tree and one auto-start controller wired together.
#[derive(Debug)]
pub struct BeamAdapter {
    tree: LightTree,
    controller: AutoStartController,
    bus: EventBus,
    last: Mutex<[BeamReading; 2]>,
}

impl BeamAdapter {
    /// Wires a tree and a controller onto `bus`.
    #[must_use]
    pub fn new(auto_start: AutoStartConfig, tree: TreeConfig, bus: EventBus) -> Self {
        let tree = LightTree::new(tree, bus.clone());
        let control: Arc<dyn TreeControl> = Arc::new(tree.clone());
        let controller = AutoStartController::new(auto_start, control, bus.clone());
        Self {
            tree,
            controller,
            bus,
            last: Mutex::new([BeamReading::default(); 2]),
        }
    }

    /// Wires both controllers with the presets for `class`.
    #[must_use]
    pub fn for_class(class: RacingClass, bus: EventBus) -> Self {
        Self::new(
            AutoStartConfig::for_class(class),
            TreeConfig::for_class(class),
            bus,
        )
    }

    /// The light tree.
    #[must_use]
    pub const fn tree(&self) -> &LightTree {
        &self.tree
    }

    /// The auto-start controller.
    #[must_use]
    pub const fn controller(&self) -> &AutoStartController {
        &self.controller
    }

    /// The shared event bus.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Starts the auto-start controller.
    pub async fn start(&self) {
        self.controller.start().await;
    }

    /// Stops the auto-start controller and its timers for good.
    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
    }

    /// Resets both controllers for a new race and returns its id.
    pub async fn new_race(&self) -> Uuid {
        let mut last = self.last.lock().await;
        self.tree.reset().await;
        self.controller.reset().await;
        *last = [BeamReading::default(); 2];

        let race_id = Uuid::new_v4();
        info!(%race_id, "new race");
        self.bus.publish(RaceEvent::RaceReset { race_id });
        race_id
    }

    /// Delivers a lane's beam state.
    ///
    /// Only changed staging beams reach the tree, in the order a car crosses
    /// them: pre-stage first when rolling in, stage first when backing out.
    /// The controller always sees the full reading; a broken guard beam
    /// reports at least the guard-beam distance as rollout.
    pub async fn on_beam_change(&self, lane: Lane, reading: BeamReading) {
        let mut last = self.last.lock().await;
        let previous = last[lane.index()];

        let pre_changed = reading.pre_stage != previous.pre_stage;
        let stage_changed = reading.stage != previous.stage;
        if stage_changed && !reading.stage {
            self.tree.set_stage(lane, false).await;
        }
        if pre_changed {
            self.tree.set_pre_stage(lane, reading.pre_stage).await;
        }
        if stage_changed && reading.stage {
            self.tree.set_stage(lane, true).await;
        }
        last[lane.index()] = reading;

        let config = self.controller.config().await;
        let rollout = if reading.guard {
            reading.rollout.max(config.guard_beam_distance)
        } else {
            reading.rollout
        };
        debug!(%lane, ?reading, rollout, "beam change");
        self.controller
            .update_vehicle_staging(lane, reading.pre_stage, reading.stage, rollout)
            .await;
    }

    /// Swaps both controllers to the presets for `class`, keeping time
    /// compression.
    pub async fn apply_class(&self, class: RacingClass) {
        let compression = self.controller.config().await.time_compression;
        let mut auto_start = AutoStartConfig::for_class(class);
        auto_start.time_compression = compression;

        let mut tree = TreeConfig::for_class(class);
        tree.deep_stage_prohibited = self.tree.config().await.deep_stage_prohibited;
        tree.timing.time_compression = compression;

        self.apply_config(auto_start, tree).await;
    }

    /// Installs resolved configuration snapshots on both controllers.
    pub async fn apply_config(&self, auto_start: AutoStartConfig, tree: TreeConfig) {
        info!(class = %auto_start.racing_class, "applying configuration");
        self.controller.update_configuration(auto_start).await;
        self.tree.configure(tree).await;
    }

    /// Sets the session kind on the controller.
    pub async fn set_session(&self, session: SessionKind) {
        self.controller.set_session(session).await;
    }

    /// Arms the tree.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::AlreadyArmed`] if it already is.
    pub async fn arm(&self, requester: &str) -> Result<(), TreeError> {
        self.tree.arm(requester).await
    }

    /// Stops the tree and hands control to the starter.
    pub async fn emergency_stop(&self) {
        self.tree.emergency_stop().await;
        self.controller.manual_override().await;
    }

    /// Tree status snapshot.
    pub async fn tree_status(&self) -> TreeStatus {
        self.tree.status().await
    }

    /// Auto-start status snapshot.
    pub async fn auto_start_status(&self) -> AutoStartStatus {
        self.controller.status().await
    }
}
