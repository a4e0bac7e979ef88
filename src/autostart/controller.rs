//! The auto-start controller.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, RwLockWriteGuard, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::schema::{AutoStartConfig, CourtesyPolicy, SessionKind};
use crate::lane::Lane;
use crate::observability::events::{EventBus, RaceEvent};
use crate::observability::metrics;
use crate::tree::TreeControl;

use super::delay::compute_release_delay;
use super::state::{AutoStartState, FaultKind, StagingStatus};
use super::timers::{self, TimerCommand, TimerFired, TimerKind};

type TriggerCallback = Arc<dyn Fn() + Send + Sync>;
type FaultCallback = Arc<dyn Fn(&str) + Send + Sync>;
type StateChangeCallback = Arc<dyn Fn(AutoStartState, AutoStartState) + Send + Sync>;

#[derive(Clone, Default)]
struct Callbacks {
    tree_trigger: Option<TriggerCallback>,
    fault: Option<FaultCallback>,
    state_change: Option<StateChangeCallback>,
}

/// Callback work collected under the lock and run after it is released.
#[derive(Debug, Default)]
struct Effects {
    transitions: Vec<(AutoStartState, AutoStartState)>,
    faults: Vec<String>,
    triggered: bool,
}

impl Effects {
    fn dispatch(self, callbacks: &Callbacks) {
        if let Some(cb) = &callbacks.state_change {
            for (from, to) in self.transitions {
                cb(from, to);
            }
        }
        if let Some(cb) = &callbacks.fault {
            for reason in &self.faults {
                cb(reason);
            }
        }
        if self.triggered {
            if let Some(cb) = &callbacks.tree_trigger {
                cb();
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingTimer {
    id: u64,
    lane: Option<Lane>,
}

struct ControllerState {
    state: AutoStartState,
    lanes: [StagingStatus; 2],
    /// Snapshot installed by `update_configuration`
    config: Arc<AutoStartConfig>,
    /// Snapshot captured at activation; governs the race in flight
    race_config: Option<Arc<AutoStartConfig>>,
    session: SessionKind,
    running: bool,
    override_active: bool,
    fault_reason: Option<String>,
    release_delay: Option<Duration>,
    next_timer_id: u64,
    pending: HashMap<TimerKind, PendingTimer>,
    callbacks: Callbacks,
}

impl ControllerState {
    fn active_config(&self) -> Arc<AutoStartConfig> {
        Arc::clone(self.race_config.as_ref().unwrap_or(&self.config))
    }

    fn enabled(&self) -> bool {
        !self.override_active && self.config.enabled_for(self.session)
    }

    fn staged_count(&self) -> usize {
        self.lanes.iter().filter(|l| l.staged).count()
    }

    fn lit_bulbs(&self) -> u8 {
        self.lanes.iter().map(StagingStatus::lit_bulbs).sum()
    }
}

/// Point-in-time copy of the controller's observable state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoStartStatus {
    /// Current state
    pub state: AutoStartState,
    /// Lane 1 and lane 2 staging bookkeeping
    pub lanes: [StagingStatus; 2],
    /// Accepting beam updates
    pub running: bool,
    /// Enabled for the current session and not overridden
    pub enabled: bool,
    /// The starter has taken manual control
    pub override_active: bool,
    /// Session being run
    pub session: SessionKind,
    /// Reason for the current fault, if faulted
    pub fault_reason: Option<String>,
    /// Release delay drawn for the race in flight (uncompressed)
    pub release_delay_ms: Option<u64>,
    /// Installed configuration
    pub config: AutoStartConfig,
}

impl AutoStartStatus {
    /// Staging bookkeeping for one lane.
    #[must_use]
    pub const fn lane(&self, lane: Lane) -> &StagingStatus {
        &self.lanes[lane.index()]
    }
}

struct Inner {
    state: RwLock<ControllerState>,
    tree: Arc<dyn TreeControl>,
    bus: EventBus,
    timer_tx: mpsc::UnboundedSender<TimerCommand>,
    timer_rx: Mutex<Option<mpsc::UnboundedReceiver<TimerCommand>>>,
    cancel: CancellationToken,
}

/// Auto-start controller.
///
/// Watches staging, applies the three-light rule, enforces the staging
/// timeout and guard beam, draws the randomized release, and triggers the
/// tree through [`TreeControl`]. Cloning yields another handle to the same
/// controller.
///
/// Beam updates are ignored until [`start`](Self::start) is called.
#[derive(Clone)]
pub struct AutoStartController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AutoStartController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoStartController").finish_non_exhaustive()
    }
}

impl AutoStartController {
    /// Creates a stopped controller in `Idle`.
    #[must_use]
    pub fn new(config: AutoStartConfig, tree: Arc<dyn TreeControl>, bus: EventBus) -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let state = ControllerState {
            state: AutoStartState::Idle,
            lanes: Default::default(),
            config: Arc::new(config),
            race_config: None,
            session: SessionKind::default(),
            running: false,
            override_active: false,
            fault_reason: None,
            release_delay: None,
            next_timer_id: 0,
            pending: HashMap::new(),
            callbacks: Callbacks::default(),
        };
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                tree,
                bus,
                timer_tx,
                timer_rx: Mutex::new(Some(timer_rx)),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Starts accepting beam updates, spawning the timer supervisor on first
    /// call. Returns the supervisor's handle when it was spawned.
    pub async fn start(&self) -> Option<JoinHandle<()>> {
        self.inner.state.write().await.running = true;
        info!("auto-start running");

        let rx = self.inner.timer_rx.lock().await.take()?;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Some(tokio::spawn(timers::supervise(
            rx,
            self.inner.cancel.clone(),
            move |fired| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_timer(fired).await;
                    }
                }
            },
        )))
    }

    /// Stops accepting beam updates and returns to `Idle`.
    pub async fn stop(&self) {
        let mut st = self.inner.state.write().await;
        st.running = false;
        let mut fx = Effects::default();
        self.inner.return_to_idle(&mut st, &mut fx).await;
        info!("auto-start stopped");
        Inner::finish(st, fx);
    }

    /// Stops the controller and its timer supervisor for good.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.inner.cancel.cancel();
    }

    /// Single ingress point for beam state.
    ///
    /// In order: guard-beam check, courtesy-staging hook, three-light rule,
    /// staging-timeout bookkeeping. Ignored without error while stopped,
    /// overridden, or disabled for the session.
    pub async fn update_vehicle_staging(
        &self,
        lane: Lane,
        pre_staged: bool,
        staged: bool,
        rollout: f64,
    ) {
        let inner = &self.inner;
        let mut st = inner.state.write().await;
        if !st.running || !st.enabled() {
            debug!(%lane, running = st.running, "beam update ignored");
            return;
        }

        let mut fx = Effects::default();
        let config = st.active_config();
        let other = lane.other();
        let newly_staged = staged && !st.lanes[lane.index()].staged;
        {
            let status = &mut st.lanes[lane.index()];
            status.pre_staged = pre_staged;
            status.staged = staged;
            status.rollout = rollout;
            status.last_update = Some(Utc::now());
        }

        if rollout > config.max_rollout_distance {
            st.lanes[lane.index()].guard_trip = true;
            if st.state != AutoStartState::Fault {
                let reason = format!(
                    "{lane} rolled out {rollout:.1} in, past the {:.1} in limit",
                    config.max_rollout_distance
                );
                inner.fault(&mut st, &mut fx, FaultKind::GuardTrip, reason).await;
            }
            Inner::finish(st, fx);
            return;
        }
        if st.state == AutoStartState::Fault {
            Inner::finish(st, fx);
            return;
        }

        if newly_staged
            && !st.lanes[other.index()].pre_staged
            && matches!(st.state, AutoStartState::Idle | AutoStartState::Activated)
        {
            inner
                .courtesy(&mut st, &mut fx, lane, config.courtesy_staging)
                .await;
            if st.state == AutoStartState::Fault {
                Inner::finish(st, fx);
                return;
            }
        }

        if st.state == AutoStartState::Idle && st.lit_bulbs() >= 3 {
            if inner.tree.is_armed().await {
                match inner.tree.activate_auto_start().await {
                    Ok(()) => {
                        let snapshot = Arc::clone(&st.config);
                        st.race_config = Some(snapshot);
                        inner.transition(&mut st, &mut fx, AutoStartState::Activated);
                    }
                    Err(e) => {
                        let reason = format!("tree refused activation: {e}");
                        inner
                            .fault(&mut st, &mut fx, FaultKind::Activation, reason)
                            .await;
                    }
                }
            } else {
                debug!("three lights lit but tree not armed");
            }
        }

        if matches!(
            st.state,
            AutoStartState::Activated | AutoStartState::Staging
        ) {
            inner.staging_bookkeeping(&mut st, &mut fx);
        }

        Inner::finish(st, fx);
    }

    /// Gives the starter manual control. Sticky until
    /// [`clear_override`](Self::clear_override).
    pub async fn manual_override(&self) {
        let mut st = self.inner.state.write().await;
        let mut fx = Effects::default();
        if !st.override_active {
            st.override_active = true;
            warn!("manual override engaged");
            self.inner.bus.publish(RaceEvent::OverrideEngaged);
        }
        self.inner.return_to_idle(&mut st, &mut fx).await;
        Inner::finish(st, fx);
    }

    /// Hands control back to auto-start with fresh staging bookkeeping.
    pub async fn clear_override(&self) {
        let mut st = self.inner.state.write().await;
        if !st.override_active {
            return;
        }
        st.override_active = false;
        st.lanes = Default::default();
        info!("manual override cleared");
        self.inner.bus.publish(RaceEvent::OverrideCleared);
    }

    /// Returns to `Idle` for a new race. Clears any fault; the override flag
    /// is kept.
    pub async fn reset(&self) {
        let mut st = self.inner.state.write().await;
        let mut fx = Effects::default();
        self.inner.return_to_idle(&mut st, &mut fx).await;
        Inner::finish(st, fx);
    }

    /// Replaces the configuration snapshot. A race already in flight keeps
    /// the snapshot it started with.
    pub async fn update_configuration(&self, config: AutoStartConfig) {
        let mut st = self.inner.state.write().await;
        info!(class = %config.racing_class, "auto-start configuration updated");
        st.config = Arc::new(config);
    }

    /// Sets the kind of session being run.
    pub async fn set_session(&self, session: SessionKind) {
        self.inner.state.write().await.session = session;
    }

    /// Registers the callback fired when the tree is triggered.
    pub async fn on_tree_trigger<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.state.write().await.callbacks.tree_trigger = Some(Arc::new(f));
    }

    /// Registers the callback fired with the reason on every fault.
    pub async fn on_fault<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.state.write().await.callbacks.fault = Some(Arc::new(f));
    }

    /// Registers the callback fired with `(old, new)` on every transition.
    pub async fn on_state_change<F>(&self, f: F)
    where
        F: Fn(AutoStartState, AutoStartState) + Send + Sync + 'static,
    {
        self.inner.state.write().await.callbacks.state_change = Some(Arc::new(f));
    }

    /// Current state.
    pub async fn state(&self) -> AutoStartState {
        self.inner.state.read().await.state
    }

    /// Installed configuration snapshot.
    pub async fn config(&self) -> Arc<AutoStartConfig> {
        Arc::clone(&self.inner.state.read().await.config)
    }

    /// Returns a status snapshot.
    pub async fn status(&self) -> AutoStartStatus {
        let st = self.inner.state.read().await;
        AutoStartStatus {
            state: st.state,
            lanes: st.lanes.clone(),
            running: st.running,
            enabled: st.enabled(),
            override_active: st.override_active,
            session: st.session,
            fault_reason: st.fault_reason.clone(),
            release_delay_ms: st
                .release_delay
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            config: (*st.config).clone(),
        }
    }
}

impl Inner {
    fn finish(st: RwLockWriteGuard<'_, ControllerState>, fx: Effects) {
        let callbacks = st.callbacks.clone();
        drop(st);
        fx.dispatch(&callbacks);
    }

    fn transition(&self, st: &mut ControllerState, fx: &mut Effects, to: AutoStartState) {
        let from = st.state;
        if from == to {
            return;
        }
        st.state = to;
        info!(%from, %to, "auto-start state change");
        metrics::record_state_transition(from.as_str(), to.as_str());
        self.bus
            .publish(RaceEvent::ControllerStateChanged { from, to });
        fx.transitions.push((from, to));
    }

    async fn fault(
        &self,
        st: &mut ControllerState,
        fx: &mut Effects,
        kind: FaultKind,
        reason: String,
    ) {
        self.cancel_all_timers(st);
        self.release_authority(st).await;
        warn!(kind = kind.as_label(), %reason, "auto-start fault");
        metrics::record_fault(kind.as_label());
        self.transition(st, fx, AutoStartState::Fault);
        st.fault_reason = Some(reason.clone());
        self.bus.publish(RaceEvent::Fault {
            reason: reason.clone(),
        });
        fx.faults.push(reason);
    }

    async fn return_to_idle(&self, st: &mut ControllerState, fx: &mut Effects) {
        self.cancel_all_timers(st);
        self.release_authority(st).await;
        st.lanes = Default::default();
        st.race_config = None;
        st.fault_reason = None;
        st.release_delay = None;
        self.transition(st, fx, AutoStartState::Idle);
    }

    /// Hands tree activation back when this controller claimed it for the
    /// race in flight.
    async fn release_authority(&self, st: &ControllerState) {
        if matches!(
            st.state,
            AutoStartState::Activated | AutoStartState::Staging | AutoStartState::Triggered
        ) && self.tree.release_auto_start().await
        {
            debug!("tree activation released");
        }
    }

    async fn courtesy(
        &self,
        st: &mut ControllerState,
        fx: &mut Effects,
        lane: Lane,
        policy: CourtesyPolicy,
    ) {
        match policy {
            CourtesyPolicy::Ignore => {}
            CourtesyPolicy::Warn => {
                warn!(%lane, "courtesy staging: staged before {} pre-staged", lane.other());
                self.bus.publish(RaceEvent::CourtesyStaging { lane });
            }
            CourtesyPolicy::Fault => {
                self.bus.publish(RaceEvent::CourtesyStaging { lane });
                let reason = format!("{lane} staged before {} pre-staged", lane.other());
                self.fault(st, fx, FaultKind::Courtesy, reason).await;
            }
        }
    }

    fn staging_bookkeeping(&self, st: &mut ControllerState, fx: &mut Effects) {
        let config = st.active_config();
        match st.staged_count() {
            2 => {
                if st.state == AutoStartState::Activated {
                    self.cancel_timer(st, TimerKind::StagingTimeout);
                    self.transition(st, fx, AutoStartState::Staging);
                    self.schedule(
                        st,
                        TimerKind::MinStaging,
                        config.scaled(config.min_staging_duration),
                        None,
                    );
                }
            }
            staged => {
                if st.state == AutoStartState::Staging {
                    debug!("lane left stage before release");
                    self.cancel_timer(st, TimerKind::MinStaging);
                    self.cancel_timer(st, TimerKind::Release);
                    st.release_delay = None;
                    self.transition(st, fx, AutoStartState::Activated);
                }
                if staged == 0 {
                    self.cancel_timer(st, TimerKind::StagingTimeout);
                    return;
                }
                let waiting_on = Lane::BOTH
                    .into_iter()
                    .find(|l| !st.lanes[l.index()].staged);
                let armed_for = st
                    .pending
                    .get(&TimerKind::StagingTimeout)
                    .and_then(|p| p.lane);
                if waiting_on.is_some() && armed_for != waiting_on {
                    self.schedule(
                        st,
                        TimerKind::StagingTimeout,
                        config.scaled(config.staging_timeout),
                        waiting_on,
                    );
                }
            }
        }
    }

    fn schedule(
        &self,
        st: &mut ControllerState,
        kind: TimerKind,
        after: Duration,
        lane: Option<Lane>,
    ) {
        st.next_timer_id += 1;
        let id = st.next_timer_id;
        st.pending.insert(kind, PendingTimer { id, lane });
        let _ = self.timer_tx.send(TimerCommand::Schedule {
            kind,
            id,
            after,
            lane,
        });
    }

    fn cancel_timer(&self, st: &mut ControllerState, kind: TimerKind) {
        if st.pending.remove(&kind).is_some() {
            let _ = self.timer_tx.send(TimerCommand::Cancel(kind));
        }
    }

    fn cancel_all_timers(&self, st: &mut ControllerState) {
        if !st.pending.is_empty() {
            st.pending.clear();
            let _ = self.timer_tx.send(TimerCommand::CancelAll);
        }
    }

    async fn on_timer(&self, fired: TimerFired) {
        let mut st = self.state.write().await;
        match st.pending.get(&fired.kind) {
            Some(p) if p.id == fired.id => {
                st.pending.remove(&fired.kind);
            }
            _ => {
                debug!(kind = ?fired.kind, id = fired.id, "stale timer ignored");
                return;
            }
        }

        let mut fx = Effects::default();
        let config = st.active_config();
        match (fired.kind, st.state) {
            (TimerKind::StagingTimeout, AutoStartState::Activated) => {
                let lane = fired
                    .lane
                    .map_or_else(|| "a lane".to_owned(), |l| l.to_string());
                let reason = format!(
                    "{lane} failed to stage within {}",
                    humantime::format_duration(config.staging_timeout)
                );
                self.fault(&mut st, &mut fx, FaultKind::StagingTimeout, reason)
                    .await;
            }
            (TimerKind::MinStaging, AutoStartState::Staging) => {
                let delay = compute_release_delay(&config, &mut rand::rng());
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                info!(delay_ms, "release scheduled");
                metrics::record_release_delay(delay);
                st.release_delay = Some(delay);
                self.bus.publish(RaceEvent::ReleaseScheduled { delay_ms });
                self.schedule(&mut st, TimerKind::Release, config.scaled(delay), None);
            }
            (TimerKind::Release, AutoStartState::Staging) => {
                let kind = config.tree_sequence_type;
                match self.tree.start_staging_process(kind).await {
                    Ok(()) => {
                        self.transition(&mut st, &mut fx, AutoStartState::Triggered);
                        info!(%kind, "tree triggered");
                        self.bus.publish(RaceEvent::TreeTriggered { kind });
                        fx.triggered = true;
                        self.schedule(
                            &mut st,
                            TimerKind::Settle,
                            config.scaled(config.settle_delay),
                            None,
                        );
                    }
                    Err(e) => {
                        let reason = format!("tree refused to start the {kind} sequence: {e}");
                        self.fault(&mut st, &mut fx, FaultKind::TreeRefused, reason)
                            .await;
                    }
                }
            }
            (TimerKind::Settle, AutoStartState::Triggered) => {
                self.return_to_idle(&mut st, &mut fx).await;
            }
            (kind, state) => {
                debug!(?kind, %state, "timer fired in unexpected state");
            }
        }
        Self::finish(st, fx);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::config::schema::{RacingClass, SequenceKind};
    use crate::error::TreeError;

    /// Scriptable tree capability.
    #[derive(Default)]
    struct FakeTree {
        armed: AtomicBool,
        activated: AtomicBool,
        refuse_start: AtomicBool,
        starts: AtomicUsize,
        releases: AtomicUsize,
    }

    impl FakeTree {
        fn armed() -> Arc<Self> {
            let tree = Self::default();
            tree.armed.store(true, Ordering::SeqCst);
            Arc::new(tree)
        }
    }

    #[async_trait]
    impl TreeControl for FakeTree {
        async fn is_armed(&self) -> bool {
            self.armed.load(Ordering::SeqCst)
        }

        async fn activate_auto_start(&self) -> Result<(), TreeError> {
            if !self.armed.load(Ordering::SeqCst) {
                return Err(TreeError::NotArmed);
            }
            if self.activated.swap(true, Ordering::SeqCst) {
                return Err(TreeError::AlreadyActivated);
            }
            Ok(())
        }

        async fn start_staging_process(&self, _kind: SequenceKind) -> Result<(), TreeError> {
            if self.refuse_start.load(Ordering::SeqCst) {
                return Err(TreeError::NotActivated);
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn release_auto_start(&self) -> bool {
            let released = self.activated.swap(false, Ordering::SeqCst);
            if released {
                self.releases.fetch_add(1, Ordering::SeqCst);
            }
            released
        }
    }

    async fn controller(tree: Arc<FakeTree>) -> AutoStartController {
        let c = AutoStartController::new(
            AutoStartConfig::for_class(RacingClass::ProStock),
            tree,
            EventBus::new(),
        );
        c.start().await;
        c
    }

    async fn three_lights(c: &AutoStartController) {
        c.update_vehicle_staging(Lane::Left, true, false, 0.0).await;
        c.update_vehicle_staging(Lane::Right, true, false, 0.0).await;
        c.update_vehicle_staging(Lane::Left, true, true, 0.0).await;
    }

    #[tokio::test]
    async fn test_ignores_updates_until_started() {
        let c = AutoStartController::new(
            AutoStartConfig::default(),
            FakeTree::armed(),
            EventBus::new(),
        );
        c.update_vehicle_staging(Lane::Left, true, true, 0.0).await;
        let status = c.status().await;
        assert!(!status.running);
        assert!(!status.lane(Lane::Left).pre_staged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_lights_activates_armed_tree() {
        let tree = FakeTree::armed();
        let c = controller(Arc::clone(&tree)).await;
        c.update_vehicle_staging(Lane::Left, true, false, 0.0).await;
        c.update_vehicle_staging(Lane::Right, true, false, 0.0).await;
        assert_eq!(c.state().await, AutoStartState::Idle);

        c.update_vehicle_staging(Lane::Left, true, true, 0.0).await;
        assert_eq!(c.state().await, AutoStartState::Activated);
        assert!(tree.activated.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_lights_with_unarmed_tree_stays_idle() {
        let tree = Arc::new(FakeTree::default());
        let c = controller(tree).await;
        three_lights(&c).await;
        assert_eq!(c.state().await, AutoStartState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_refused_faults() {
        let tree = FakeTree::armed();
        tree.activated.store(true, Ordering::SeqCst);
        let c = controller(tree).await;
        three_lights(&c).await;
        let status = c.status().await;
        assert_eq!(status.state, AutoStartState::Fault);
        assert!(status.fault_reason.unwrap().contains("refused activation"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_staging_timeout_names_unstaged_lane() {
        let c = controller(FakeTree::armed()).await;
        let reasons = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&reasons);
        c.on_fault(move |r| sink.lock().unwrap().push(r.to_owned()))
            .await;

        three_lights(&c).await;
        tokio::time::sleep(Duration::from_millis(6_900)).await;
        assert_eq!(c.state().await, AutoStartState::Activated);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(c.state().await, AutoStartState::Fault);
        assert_eq!(
            *reasons.lock().unwrap(),
            vec!["lane 2 failed to stage within 7s".to_owned()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fault_hands_activation_back() {
        let tree = FakeTree::armed();
        let c = controller(Arc::clone(&tree)).await;
        three_lights(&c).await;
        tokio::time::sleep(Duration::from_millis(7_100)).await;
        assert_eq!(c.state().await, AutoStartState::Fault);
        assert!(!tree.activated.load(Ordering::SeqCst));
        assert_eq!(tree.releases.load(Ordering::SeqCst), 1);

        c.reset().await;
        three_lights(&c).await;
        assert_eq!(c.state().await, AutoStartState::Activated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_from_idle_leaves_foreign_activation() {
        let tree = FakeTree::armed();
        tree.activated.store(true, Ordering::SeqCst);
        let c = controller(Arc::clone(&tree)).await;
        c.update_vehicle_staging(Lane::Left, true, true, 30.0).await;
        assert_eq!(c.state().await, AutoStartState::Fault);
        c.reset().await;
        assert!(tree.activated.load(Ordering::SeqCst));
        assert_eq!(tree.releases.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_while_activated_releases_tree() {
        let tree = FakeTree::armed();
        let c = controller(Arc::clone(&tree)).await;
        three_lights(&c).await;
        c.manual_override().await;
        assert!(!tree.activated.load(Ordering::SeqCst));

        c.clear_override().await;
        three_lights(&c).await;
        assert_eq!(c.state().await, AutoStartState::Activated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_lane_in_time_reaches_staging() {
        let c = controller(FakeTree::armed()).await;
        three_lights(&c).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        c.update_vehicle_staging(Lane::Right, true, true, 0.0).await;
        assert_eq!(c.state().await, AutoStartState::Staging);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_ne!(c.state().await, AutoStartState::Fault);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle_triggers_tree_and_settles() {
        use AutoStartState::{Activated, Idle, Staging, Triggered};

        let tree = FakeTree::armed();
        let c = controller(Arc::clone(&tree)).await;
        let triggers = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&triggers);
        c.on_tree_trigger(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        let transitions = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&transitions);
        c.on_state_change(move |from, to| sink.lock().unwrap().push((from, to)))
            .await;

        three_lights(&c).await;
        c.update_vehicle_staging(Lane::Right, true, true, 0.0).await;

        // 500ms minimum staging + at most 1300ms release.
        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert_eq!(c.state().await, AutoStartState::Triggered);
        assert_eq!(tree.starts.load(Ordering::SeqCst), 1);
        assert_eq!(triggers.load(Ordering::SeqCst), 1);
        let delay = c.status().await.release_delay_ms.unwrap();
        assert!((600..=1_300).contains(&delay));

        tokio::time::sleep(Duration::from_secs(4)).await;
        let status = c.status().await;
        assert_eq!(status.state, AutoStartState::Idle);
        assert!(!status.lane(Lane::Left).staged);
        assert_eq!(
            *transitions.lock().unwrap(),
            vec![
                (Idle, Activated),
                (Activated, Staging),
                (Staging, Triggered),
                (Triggered, Idle)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollout_faults_from_any_state() {
        let c = controller(FakeTree::armed()).await;
        c.update_vehicle_staging(Lane::Right, true, true, 12.5).await;
        let status = c.status().await;
        assert_eq!(status.state, AutoStartState::Fault);
        assert!(status.lane(Lane::Right).guard_trip);
        assert!(!status.lane(Lane::Left).guard_trip);

        // Legal rollout is not a trip.
        c.reset().await;
        c.update_vehicle_staging(Lane::Left, true, true, 12.0).await;
        assert_ne!(c.state().await, AutoStartState::Fault);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollout_during_staging_cancels_release() {
        let tree = FakeTree::armed();
        let c = controller(Arc::clone(&tree)).await;
        three_lights(&c).await;
        c.update_vehicle_staging(Lane::Right, true, true, 0.0).await;
        c.update_vehicle_staging(Lane::Left, true, true, 20.0).await;
        assert_eq!(c.state().await, AutoStartState::Fault);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(c.state().await, AutoStartState::Fault);
        assert_eq!(tree.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unstage_during_staging_reverts_to_activated() {
        let tree = FakeTree::armed();
        let c = controller(Arc::clone(&tree)).await;
        three_lights(&c).await;
        c.update_vehicle_staging(Lane::Right, true, true, 0.0).await;
        c.update_vehicle_staging(Lane::Right, true, false, 0.0).await;
        assert_eq!(c.state().await, AutoStartState::Activated);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(tree.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_override_is_sticky() {
        let c = controller(FakeTree::armed()).await;
        three_lights(&c).await;
        c.manual_override().await;
        assert_eq!(c.state().await, AutoStartState::Idle);

        three_lights(&c).await;
        c.reset().await;
        three_lights(&c).await;
        assert_eq!(c.state().await, AutoStartState::Idle);
        assert!(c.status().await.override_active);

        // Staging timeout from before the override never fires.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(c.state().await, AutoStartState::Idle);

        c.clear_override().await;
        assert!(!c.status().await.override_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_clears_fault() {
        let c = controller(FakeTree::armed()).await;
        c.update_vehicle_staging(Lane::Left, false, true, 30.0).await;
        assert_eq!(c.state().await, AutoStartState::Fault);
        c.manual_override().await;
        let status = c.status().await;
        assert_eq!(status.state, AutoStartState::Idle);
        assert!(status.fault_reason.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_session_ignores_updates() {
        let config = AutoStartConfig {
            enabled_for_time_trials: false,
            ..AutoStartConfig::default()
        };
        let c = AutoStartController::new(config, FakeTree::armed(), EventBus::new());
        c.start().await;
        c.set_session(SessionKind::TimeTrial).await;
        three_lights(&c).await;
        let status = c.status().await;
        assert!(!status.enabled);
        assert_eq!(status.state, AutoStartState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_courtesy_policy_fault() {
        let config = AutoStartConfig {
            courtesy_staging: CourtesyPolicy::Fault,
            ..AutoStartConfig::default()
        };
        let c = AutoStartController::new(config, FakeTree::armed(), EventBus::new());
        c.start().await;
        c.update_vehicle_staging(Lane::Left, true, true, 0.0).await;
        let status = c.status().await;
        assert_eq!(status.state, AutoStartState::Fault);
        assert_eq!(
            status.fault_reason.as_deref(),
            Some("lane 1 staged before lane 2 pre-staged")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_courtesy_policy_warn_keeps_running() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let c = AutoStartController::new(AutoStartConfig::default(), FakeTree::armed(), bus);
        c.start().await;
        c.update_vehicle_staging(Lane::Left, true, true, 0.0).await;
        assert_eq!(c.state().await, AutoStartState::Idle);
        assert_eq!(
            rx.try_recv().unwrap().event,
            RaceEvent::CourtesyStaging { lane: Lane::Left }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tree_refusing_start_faults() {
        let tree = FakeTree::armed();
        tree.refuse_start.store(true, Ordering::SeqCst);
        let c = controller(Arc::clone(&tree)).await;
        three_lights(&c).await;
        c.update_vehicle_staging(Lane::Right, true, true, 0.0).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        let status = c.status().await;
        assert_eq!(status.state, AutoStartState::Fault);
        assert!(status.fault_reason.unwrap().contains("refused to start"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_swap_does_not_touch_race_in_flight() {
        let c = controller(FakeTree::armed()).await;
        three_lights(&c).await;
        c.update_configuration(AutoStartConfig::for_class(RacingClass::Bracket))
            .await;

        // Pro Stock's 7s timeout still applies, not Bracket's 15s.
        tokio::time::sleep(Duration::from_millis(7_100)).await;
        assert_eq!(c.state().await, AutoStartState::Fault);
        assert_eq!(
            c.config().await.racing_class,
            RacingClass::Bracket
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_compression_scales_timers() {
        let config = AutoStartConfig::for_class(RacingClass::ProStock).accelerated();
        let c = AutoStartController::new(config, FakeTree::armed(), EventBus::new());
        c.start().await;
        three_lights(&c).await;
        tokio::time::sleep(Duration::from_millis(8)).await;
        assert_eq!(c.state().await, AutoStartState::Fault);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_supervisor() {
        let c = AutoStartController::new(
            AutoStartConfig::default(),
            FakeTree::armed(),
            EventBus::new(),
        );
        let handle = c.start().await.unwrap();
        assert!(c.start().await.is_none());
        c.shutdown().await;
        handle.await.unwrap();
        assert!(!c.status().await.running);
    }
}
