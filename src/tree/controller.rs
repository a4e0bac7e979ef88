//! The light-tree controller.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::schema::{RacingClass, SequenceKind, TreeConfig};
use crate::error::TreeError;
use crate::lane::Lane;
use crate::observability::events::{EventBus, RaceEvent};
use crate::observability::metrics;

use super::TreeControl;
use super::lights::{LightBoard, LightKind, LightState};
use super::rules::{self, DeepStageOutcome, MotionOutcome, StagingMotionState};
use super::sequence;

/// A sequence task currently in flight.
#[derive(Debug)]
pub(super) struct RunningSequence {
    pub(super) kind: SequenceKind,
    pub(super) cancel: CancellationToken,
}

/// Mutable tree state, guarded by a single lock.
#[derive(Debug)]
pub(super) struct TreeState {
    pub(super) armed: bool,
    pub(super) activated: bool,
    pub(super) armed_time: Option<DateTime<Utc>>,
    pub(super) activation_time: Option<DateTime<Utc>>,
    pub(super) green_time: Option<DateTime<Utc>>,
    pub(super) sequence_type: Option<SequenceKind>,
    pub(super) lights: LightBoard,
    pub(super) motion: [StagingMotionState; 2],
    pub(super) config: TreeConfig,
    pub(super) running: Option<RunningSequence>,
}

impl TreeState {
    fn new(config: TreeConfig) -> Self {
        Self {
            armed: false,
            activated: false,
            armed_time: None,
            activation_time: None,
            green_time: None,
            sequence_type: None,
            lights: LightBoard::default(),
            motion: Default::default(),
            config,
            running: None,
        }
    }

    fn deep_staged(&self, lane: Lane) -> bool {
        rules::is_deep_staged(
            self.lights.get(lane, LightKind::PreStage).is_lit(),
            self.lights.get(lane, LightKind::Stage).is_lit(),
        )
    }

    /// Cancels an in-flight sequence, returning its kind.
    fn abort_running(&mut self) -> Option<SequenceKind> {
        let running = self.running.take()?;
        running.cancel.cancel();
        Some(running.kind)
    }
}

/// Point-in-time copy of the tree's observable state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeStatus {
    /// The starter has ceded sequencing authority
    pub armed: bool,
    /// Auto-start holds sequencing authority
    pub activated: bool,
    /// Kind of the running or most recent sequence
    pub sequence_type: Option<SequenceKind>,
    /// Whether a sequence task is in flight
    pub sequence_running: bool,
    /// Every bulb, keyed by lane then bulb
    pub light_states: BTreeMap<Lane, BTreeMap<LightKind, LightState>>,
    /// When the tree was armed
    pub armed_time: Option<DateTime<Utc>>,
    /// When auto-start claimed authority
    pub activation_time: Option<DateTime<Utc>>,
    /// When green was lit (authoritative start-of-race time)
    pub green_time: Option<DateTime<Utc>>,
    /// Class the rule engines evaluate against
    pub racing_class: RacingClass,
}

impl TreeStatus {
    /// Returns one bulb's state.
    #[must_use]
    pub fn light(&self, lane: Lane, kind: LightKind) -> LightState {
        self.light_states
            .get(&lane)
            .and_then(|bulbs| bulbs.get(&kind))
            .copied()
            .unwrap_or_default()
    }
}

/// Light-tree controller.
///
/// Owns the bulbs, the arming/activation flags, both rule engines, and the
/// sequence task. Cloning yields another handle to the same tree.
///
/// All entry points may be called concurrently. Sequences run as detached
/// tasks and require a Tokio runtime.
#[derive(Debug, Clone)]
pub struct LightTree {
    state: Arc<RwLock<TreeState>>,
    bus: EventBus,
}

impl LightTree {
    /// Creates an unarmed, dark tree.
    #[must_use]
    pub fn new(config: TreeConfig, bus: EventBus) -> Self {
        Self {
            state: Arc::new(RwLock::new(TreeState::new(config))),
            bus,
        }
    }

    /// Cedes sequencing authority from the starter.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::AlreadyArmed`] if the tree is already armed.
    pub async fn arm(&self, requester: &str) -> Result<(), TreeError> {
        let mut state = self.state.write().await;
        if state.armed {
            return Err(TreeError::AlreadyArmed);
        }
        state.armed = true;
        state.armed_time = Some(Utc::now());
        info!(requester, "tree armed");
        self.bus.publish(RaceEvent::Armed {
            requester: requester.to_owned(),
        });
        Ok(())
    }

    /// Takes sequencing authority back. Clears activation as well.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::NotArmed`] if the tree is not armed, or
    /// [`TreeError::SequenceAlreadyRunning`] while a sequence is in flight.
    pub async fn disarm(&self) -> Result<(), TreeError> {
        let mut state = self.state.write().await;
        if !state.armed {
            return Err(TreeError::NotArmed);
        }
        if state.running.is_some() {
            return Err(TreeError::SequenceAlreadyRunning);
        }
        state.armed = false;
        state.activated = false;
        state.armed_time = None;
        state.activation_time = None;
        info!("tree disarmed");
        self.bus.publish(RaceEvent::Disarmed);
        Ok(())
    }

    /// Hands sequencing authority to auto-start.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::NotArmed`] or [`TreeError::AlreadyActivated`].
    pub async fn activate_auto_start(&self) -> Result<(), TreeError> {
        let mut state = self.state.write().await;
        if !state.armed {
            return Err(TreeError::NotArmed);
        }
        if state.activated {
            return Err(TreeError::AlreadyActivated);
        }
        state.activated = true;
        state.activation_time = Some(Utc::now());
        info!("auto-start activated");
        self.bus.publish(RaceEvent::AutoStartActivated);
        Ok(())
    }

    /// Takes activation back from auto-start without disarming.
    ///
    /// Refused while a sequence is in flight; the sequence clears activation
    /// itself at green. Returns whether activation was released.
    pub async fn release_auto_start(&self) -> bool {
        let mut state = self.state.write().await;
        if !state.activated || state.running.is_some() {
            return false;
        }
        state.activated = false;
        state.activation_time = None;
        info!("auto-start activation released");
        self.bus.publish(RaceEvent::AutoStartReleased);
        true
    }

    /// Mirrors the pre-stage beam onto the pre-stage bulb.
    pub async fn set_pre_stage(&self, lane: Lane, broken: bool) {
        let mut state = self.state.write().await;
        let was_deep = state.deep_staged(lane);

        state
            .lights
            .set(lane, LightKind::PreStage, LightState::from_beam(broken));
        self.bus.publish(RaceEvent::PreStageLight { lane, on: broken });

        self.check_deep_stage(&state, lane, was_deep);

        let stage_broken = state.motion[lane.index()].last_stage_beam_state;
        if state.motion[lane.index()].on_pre_stage_beam(broken, stage_broken)
            == MotionOutcome::Reset
        {
            debug!(%lane, "complete back-out, motion history reset");
        }
    }

    /// Mirrors the stage beam onto the stage bulb.
    pub async fn set_stage(&self, lane: Lane, broken: bool) {
        let mut state = self.state.write().await;
        let was_deep = state.deep_staged(lane);

        state
            .lights
            .set(lane, LightKind::Stage, LightState::from_beam(broken));
        self.bus.publish(RaceEvent::StageLight { lane, on: broken });

        self.check_deep_stage(&state, lane, was_deep);

        match state.motion[lane.index()].on_stage_beam(broken) {
            MotionOutcome::Violation => {
                let history = state.motion[lane.index()].motion_history.clone();
                warn!(%lane, ?history, "staging motion violation");
                metrics::record_rule_violation("staging_motion");
                self.bus
                    .publish(RaceEvent::StagingMotionViolation { lane, history });
            }
            MotionOutcome::Recorded(tag) => debug!(%lane, ?tag, "motion recorded"),
            MotionOutcome::Unchanged | MotionOutcome::Reset => {}
        }

        // Leaving the stage beam after the countdown began is a foul start.
        if !broken
            && state.running.is_some()
            && !state.lights.get(lane, LightKind::Red).is_lit()
        {
            state.lights.set(lane, LightKind::Red, LightState::On);
            warn!(%lane, "red light");
            metrics::record_rule_violation("red_light");
            self.bus.publish(RaceEvent::RedLight { lane });
        }
    }

    fn check_deep_stage(&self, state: &TreeState, lane: Lane, was_deep: bool) {
        let class = state.config.racing_class;
        match rules::evaluate_deep_stage(
            was_deep,
            state.deep_staged(lane),
            class,
            &state.config.deep_stage_prohibited,
        ) {
            DeepStageOutcome::Violation => {
                warn!(%lane, %class, "deep stage violation");
                metrics::record_rule_violation("deep_stage");
                self.bus.publish(RaceEvent::DeepStageViolation { lane, class });
            }
            DeepStageOutcome::Informational => {
                info!(%lane, %class, "deep staged");
                self.bus.publish(RaceEvent::DeepStage { lane, class });
            }
            DeepStageOutcome::Unchanged => {}
        }
    }

    /// Starts a sequence on the starter's authority.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::NotArmed`] or [`TreeError::SequenceAlreadyRunning`].
    pub async fn start_sequence(&self, kind: SequenceKind) -> Result<(), TreeError> {
        let mut state = self.state.write().await;
        if !state.armed {
            return Err(TreeError::NotArmed);
        }
        self.launch(&mut state, kind)
    }

    /// Starts a sequence on auto-start's authority.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::NotArmed`], [`TreeError::NotActivated`] or
    /// [`TreeError::SequenceAlreadyRunning`].
    pub async fn start_staging_process(&self, kind: SequenceKind) -> Result<(), TreeError> {
        let mut state = self.state.write().await;
        if !state.armed {
            return Err(TreeError::NotArmed);
        }
        if !state.activated {
            return Err(TreeError::NotActivated);
        }
        self.launch(&mut state, kind)
    }

    fn launch(&self, state: &mut TreeState, kind: SequenceKind) -> Result<(), TreeError> {
        if state.running.is_some() {
            return Err(TreeError::SequenceAlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let phases = sequence::plan(kind, &state.config.timing);
        state.lights.clear_countdown();
        state.green_time = None;
        state.sequence_type = Some(kind);
        state.running = Some(RunningSequence {
            kind,
            cancel: cancel.clone(),
        });

        info!(%kind, "sequence started");
        self.bus.publish(RaceEvent::SequenceStarted { kind });
        tokio::spawn(sequence::run(
            Arc::clone(&self.state),
            self.bus.clone(),
            kind,
            phases,
            cancel,
        ));
        Ok(())
    }

    /// Halts everything: flags cleared, bulbs dark, red blinking.
    ///
    /// Safe at any time. An in-flight sequence is cancelled and will not write
    /// another light.
    pub async fn emergency_stop(&self) {
        let mut state = self.state.write().await;
        if let Some(kind) = state.abort_running() {
            metrics::record_sequence(kind.as_label(), "aborted");
            self.bus.publish(RaceEvent::SequenceAborted { kind });
        }
        state.armed = false;
        state.activated = false;
        state.lights.all_off();
        state.lights.set_both(LightKind::Red, LightState::Blink);

        warn!("emergency stop");
        metrics::record_emergency_stop();
        self.bus.publish(RaceEvent::EmergencyStop);
    }

    /// Returns the tree to its power-on state for a new race. Configuration
    /// is kept.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        if let Some(kind) = state.abort_running() {
            metrics::record_sequence(kind.as_label(), "aborted");
            self.bus.publish(RaceEvent::SequenceAborted { kind });
        }
        let config = std::mem::take(&mut state.config);
        *state = TreeState::new(config);
        debug!("tree reset");
    }

    /// Replaces the configuration. A running sequence keeps the timing it
    /// started with.
    pub async fn configure(&self, config: TreeConfig) {
        let mut state = self.state.write().await;
        debug!(class = %config.racing_class, "tree configured");
        state.config = config;
    }

    /// Returns the current configuration.
    pub async fn config(&self) -> TreeConfig {
        self.state.read().await.config.clone()
    }

    /// Returns a status snapshot.
    pub async fn status(&self) -> TreeStatus {
        let state = self.state.read().await;
        TreeStatus {
            armed: state.armed,
            activated: state.activated,
            sequence_type: state.sequence_type,
            sequence_running: state.running.is_some(),
            light_states: state.lights.to_map(),
            armed_time: state.armed_time,
            activation_time: state.activation_time,
            green_time: state.green_time,
            racing_class: state.config.racing_class,
        }
    }

    /// Returns a copy of a lane's forward-motion bookkeeping.
    pub async fn motion_state(&self, lane: Lane) -> StagingMotionState {
        self.state.read().await.motion[lane.index()].clone()
    }
}

#[async_trait]
impl TreeControl for LightTree {
    async fn is_armed(&self) -> bool {
        self.state.read().await.armed
    }

    async fn activate_auto_start(&self) -> Result<(), TreeError> {
        Self::activate_auto_start(self).await
    }

    async fn start_staging_process(&self, kind: SequenceKind) -> Result<(), TreeError> {
        Self::start_staging_process(self, kind).await
    }

    async fn release_auto_start(&self) -> bool {
        Self::release_auto_start(self).await
    }
}
