//! `simulate` command
//!
//! Drives a scripted race through the beam adapter: arms the tree, feeds the
//! scenario's beam readings, launches both lanes on green, and reports how
//! the race ended.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::{BeamAdapter, BeamReading};
use crate::autostart::{AutoStartState, release_delay_bounds};
use crate::cli::args::{OutputFormat, Scenario, SimulateArgs};
use crate::config::loader::{ConfigLoader, LoadResult, LoaderOptions};
use crate::config::schema::{
    AutoStartConfig, RacingClass, SessionKind, TEST_MODE_COMPRESSION, TreeConfig,
};
use crate::error::DragTreeError;
use crate::lane::Lane;
use crate::observability::events::{EventBus, EventEmitter, Notification, RaceEvent};
use crate::observability::init_metrics;

/// Extra wall-clock time allowed on top of the computed race budget.
const OUTCOME_MARGIN: Duration = Duration::from_millis(500);

/// One scripted beam change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptStep {
    /// Real-time pause before the reading (compressed at run time)
    pub after: Duration,
    /// Lane the reading belongs to
    pub lane: Lane,
    /// Full beam reading for the lane
    pub reading: BeamReading,
}

const fn step(after_ms: u64, lane: Lane, reading: BeamReading) -> ScriptStep {
    ScriptStep {
        after: Duration::from_millis(after_ms),
        lane,
        reading,
    }
}

/// Beam script for a scenario.
#[must_use]
pub fn script(scenario: Scenario) -> Vec<ScriptStep> {
    let pre = BeamReading::staging(true, false);
    let staged = BeamReading::staging(true, true);

    let mut steps = vec![
        step(0, Lane::Left, pre),
        step(300, Lane::Right, pre),
        step(500, Lane::Left, staged),
    ];
    match scenario {
        Scenario::Normal => steps.push(step(400, Lane::Right, staged)),
        Scenario::Timeout => {}
        Scenario::Rollout => {
            steps.push(step(400, Lane::Right, staged));
            steps.push(step(
                100,
                Lane::Left,
                BeamReading {
                    pre_stage: false,
                    stage: false,
                    guard: true,
                    rollout: 14.0,
                },
            ));
        }
        Scenario::DeepStage => {
            steps.push(step(400, Lane::Right, staged));
            steps.push(step(150, Lane::Left, BeamReading::staging(false, true)));
        }
        Scenario::BackOut => {
            steps.push(step(400, Lane::Right, staged));
            steps.push(step(100, Lane::Right, pre));
            steps.push(step(200, Lane::Right, staged));
        }
    }
    steps
}

/// What happened during a simulated race.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RaceSummary {
    /// Race identifier
    pub race_id: Option<Uuid>,
    /// Class raced
    pub class: RacingClass,
    /// Scenario name
    pub scenario: String,
    /// Session kind
    pub session: SessionKind,
    /// Timer compression used
    pub time_compression: u32,
    /// Auto-start state when the race ended
    pub final_state: AutoStartState,
    /// Fault reason, if the race faulted
    pub fault_reason: Option<String>,
    /// Drawn release delay (uncompressed)
    pub release_delay_ms: Option<u64>,
    /// Green-light time
    pub green_time: Option<DateTime<Utc>>,
    /// Deep staging reported as a violation
    pub deep_stage_violations: usize,
    /// Deep staging reported for information
    pub deep_stage_notices: usize,
    /// Forward-motion violations
    pub motion_violations: usize,
    /// Courtesy-staging reports
    pub courtesy_warnings: usize,
    /// Lanes that red-lit
    pub red_lights: Vec<Lane>,
    /// Notifications observed
    pub events: usize,
    /// Notifications the summary missed after lagging behind the bus
    pub events_missed: u64,
    /// Notifications the event writer missed after lagging behind the bus
    pub events_unwritten: u64,
    /// Stopped early by an interrupt
    pub stopped: bool,
}

impl RaceSummary {
    /// Folds one event into the summary. Returns `true` once the race is over.
    pub fn observe(&mut self, event: &RaceEvent) -> bool {
        self.events += 1;
        match event {
            RaceEvent::RaceReset { race_id } => self.race_id = Some(*race_id),
            RaceEvent::DeepStageViolation { .. } => self.deep_stage_violations += 1,
            RaceEvent::DeepStage { .. } => self.deep_stage_notices += 1,
            RaceEvent::StagingMotionViolation { .. } => self.motion_violations += 1,
            RaceEvent::CourtesyStaging { .. } => self.courtesy_warnings += 1,
            RaceEvent::RedLight { lane } => self.red_lights.push(*lane),
            RaceEvent::ReleaseScheduled { delay_ms } => self.release_delay_ms = Some(*delay_ms),
            RaceEvent::GreenOn { at } => self.green_time = Some(*at),
            RaceEvent::Fault { reason } => {
                self.fault_reason = Some(reason.clone());
                return true;
            }
            RaceEvent::ControllerStateChanged {
                from: AutoStartState::Triggered,
                to: AutoStartState::Idle,
            } => return true,
            _ => {}
        }
        false
    }

    fn render_human(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "class:        {}", self.class);
        let _ = writeln!(out, "scenario:     {}", self.scenario);
        let _ = writeln!(out, "outcome:      {}", self.final_state);
        if self.stopped {
            let _ = writeln!(out, "stopped:      by signal");
        }
        if let Some(reason) = &self.fault_reason {
            let _ = writeln!(out, "fault:        {reason}");
        }
        if let Some(ms) = self.release_delay_ms {
            let _ = writeln!(out, "release:      {ms} ms");
        }
        if let Some(at) = self.green_time {
            let _ = writeln!(out, "green:        {}", at.to_rfc3339());
        }
        let _ = writeln!(
            out,
            "violations:   deep stage {}, motion {}, red light {}",
            self.deep_stage_violations,
            self.motion_violations,
            self.red_lights.len()
        );
        let _ = write!(out, "events:       {}", self.events);
        let lost = self.events_missed + self.events_unwritten;
        if lost > 0 {
            let _ = write!(out, " ({lost} lost to lag)");
        }
        out
    }
}

/// Runs the `simulate` command and prints its summary.
///
/// # Errors
///
/// See [`simulate_race`]; also fails if the JSON summary cannot be rendered.
pub async fn run(args: &SimulateArgs, cancel: CancellationToken) -> Result<(), DragTreeError> {
    let summary = simulate_race(args, &cancel).await?;
    match args.format {
        OutputFormat::Human => println!("{}", summary.render_human()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
    }
    Ok(())
}

/// Runs one scripted race to its outcome.
///
/// Cancelling `cancel` emergency-stops the tree and ends the race early; the
/// summary still reports where it got to.
///
/// # Errors
///
/// Returns a configuration error for an unknown class or invalid file, an
/// I/O error if the events file cannot be created, a metrics error if the
/// exporter cannot bind, or a tree error if the tree cannot be armed.
pub async fn simulate_race(
    args: &SimulateArgs,
    cancel: &CancellationToken,
) -> Result<RaceSummary, DragTreeError> {
    let loaded = load(args)?;
    for warning in &loaded.warnings {
        warn!("{warning}");
    }

    let compression = if args.realtime {
        1
    } else {
        loaded.race.time_compression.unwrap_or(TEST_MODE_COMPRESSION)
    };
    let mut auto_start = loaded.auto_start;
    let mut tree = loaded.tree;
    auto_start.time_compression = compression;
    tree.timing.time_compression = compression;
    let session = args.session.map_or(loaded.session, SessionKind::from);

    if let Some(port) = args.metrics_port {
        init_metrics(Some(port))?;
        info!(port, "Prometheus metrics endpoint started");
    }

    let emitter = if args.no_events {
        EventEmitter::noop()
    } else if let Some(path) = &args.events_file {
        EventEmitter::from_file(path)?
    } else {
        EventEmitter::stderr()
    };

    let mut summary = RaceSummary {
        class: auto_start.racing_class,
        scenario: scenario_name(args.scenario),
        session,
        time_compression: compression,
        ..RaceSummary::default()
    };

    let bus = EventBus::new();
    let forward = {
        let emitter = Arc::new(emitter);
        let rx = bus.subscribe();
        tokio::spawn(async move { emitter.forward(rx).await })
    };
    let mut rx = bus.subscribe();

    let budget = outcome_budget(&auto_start, &tree);
    let adapter = BeamAdapter::new(auto_start, tree, bus);
    adapter.set_session(session).await;
    adapter.start().await;
    adapter.new_race().await;
    adapter.arm("starter").await?;

    info!(class = %summary.class, scenario = %summary.scenario, compression, "race started");
    let mut finished = false;
    for step in script(args.scenario) {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(step.after / compression) => {}
        }
        adapter.on_beam_change(step.lane, step.reading).await;
        finished |= drain(&mut rx, &mut summary, &adapter).await;
    }
    if !finished && !cancel.is_cancelled() {
        let wait = budget / compression + OUTCOME_MARGIN;
        tokio::select! {
            () = cancel.cancelled() => {}
            outcome = tokio::time::timeout(wait, watch(&mut rx, &mut summary, &adapter)) => {
                if outcome.is_err() {
                    warn!(?wait, "race did not finish in time");
                }
            }
        }
    }
    if cancel.is_cancelled() {
        warn!("race stopped by signal");
        adapter.emergency_stop().await;
        summary.stopped = true;
    }

    let status = adapter.auto_start_status().await;
    summary.final_state = status.state;
    if summary.fault_reason.is_none() {
        summary.fault_reason = status.fault_reason;
    }

    adapter.shutdown().await;
    drop(adapter);
    drop(rx);
    match tokio::time::timeout(Duration::from_secs(1), forward).await {
        Ok(Ok(lost)) => summary.events_unwritten = lost,
        Ok(Err(e)) => warn!(error = %e, "event writer task failed"),
        Err(_) => warn!("event writer did not drain"),
    }
    Ok(summary)
}

fn load(args: &SimulateArgs) -> Result<LoadResult, DragTreeError> {
    let loader = ConfigLoader::new(LoaderOptions::default());
    if let Some(path) = &args.config {
        info!(config = %path.display(), "loading configuration");
        return Ok(loader.load(path)?);
    }
    let class = args
        .class
        .as_deref()
        .map(str::parse::<RacingClass>)
        .transpose()?
        .unwrap_or_default();
    Ok(loader.from_class(class)?)
}

fn scenario_name(scenario: Scenario) -> String {
    scenario
        .to_possible_value()
        .map_or_else(|| format!("{scenario:?}"), |v| v.get_name().to_owned())
}

/// Longest a scripted race can take in real time.
fn outcome_budget(auto_start: &AutoStartConfig, tree: &TreeConfig) -> Duration {
    let (_, max_release) = release_delay_bounds(auto_start);
    auto_start.staging_timeout
        + auto_start.min_staging_duration
        + max_release
        + tree.timing.green_delay
        + tree.timing.amber_interval * 3
        + auto_start.settle_delay
}

/// Handles everything already queued without waiting.
async fn drain(
    rx: &mut broadcast::Receiver<Notification>,
    summary: &mut RaceSummary,
    adapter: &BeamAdapter,
) -> bool {
    let mut finished = false;
    loop {
        match rx.try_recv() {
            Ok(n) => finished |= handle(&n.event, summary, adapter).await,
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                warn!(missed, "summary lagged behind the bus");
                summary.events_missed += missed;
            }
            Err(_) => return finished,
        }
    }
}

/// Waits for the race to end.
async fn watch(
    rx: &mut broadcast::Receiver<Notification>,
    summary: &mut RaceSummary,
    adapter: &BeamAdapter,
) {
    loop {
        match rx.recv().await {
            Ok(n) => {
                if handle(&n.event, summary, adapter).await {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "summary lagged behind the bus");
                summary.events_missed += missed;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn handle(event: &RaceEvent, summary: &mut RaceSummary, adapter: &BeamAdapter) -> bool {
    let finished = summary.observe(event);
    if matches!(event, RaceEvent::GreenOn { .. }) {
        // Both cars leave the line.
        for lane in Lane::BOTH {
            adapter.on_beam_change(lane, BeamReading::default()).await;
        }
    }
    finished
}
