//! Shared integration-test harness: wired race controllers on paused time
//! and a helper for running the `dragtree` binary.

#![allow(dead_code)]

use std::process::Output;
use std::time::Duration;

use tokio::sync::broadcast;

use dragtree::adapter::{BeamAdapter, BeamReading};
use dragtree::config::schema::{AutoStartConfig, RacingClass, TreeConfig};
use dragtree::lane::Lane;
use dragtree::observability::{EventBus, Notification, RaceEvent};

/// Longest any test waits for a single event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(30);

/// A started adapter plus a subscription taken before anything happened.
pub struct Race {
    pub adapter: BeamAdapter,
    pub rx: broadcast::Receiver<Notification>,
}

impl Race {
    /// Real-time presets for `class`, armed by the starter.
    pub async fn armed(class: RacingClass) -> Self {
        Self::with_config(
            AutoStartConfig::for_class(class),
            TreeConfig::for_class(class),
        )
        .await
    }

    /// Explicit configuration, armed by the starter.
    pub async fn with_config(auto_start: AutoStartConfig, tree: TreeConfig) -> Self {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let adapter = BeamAdapter::new(auto_start, tree, bus);
        adapter.start().await;
        adapter.arm("starter").await.expect("fresh tree arms");
        Self { adapter, rx }
    }

    /// Sends a staging-only reading for a lane.
    pub async fn beams(&self, lane: Lane, pre_stage: bool, stage: bool) {
        self.adapter
            .on_beam_change(lane, BeamReading::staging(pre_stage, stage))
            .await;
    }

    /// Lane 1 pre-stages, lane 2 pre-stages, lane 1 stages.
    pub async fn three_lights(&self) {
        self.beams(Lane::Left, true, false).await;
        self.beams(Lane::Right, true, false).await;
        self.beams(Lane::Left, true, true).await;
    }

    /// Both lanes fully staged.
    pub async fn stage_both(&self) {
        self.three_lights().await;
        self.beams(Lane::Right, true, true).await;
    }

    /// Everything published so far, without waiting.
    pub fn drain(&mut self) -> Vec<RaceEvent> {
        let mut events = Vec::new();
        while let Ok(n) = self.rx.try_recv() {
            events.push(n.event);
        }
        events
    }

    /// Waits for the first event matching `pred`, returning it.
    pub async fn wait_for<F>(&mut self, mut pred: F) -> RaceEvent
    where
        F: FnMut(&RaceEvent) -> bool,
    {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                let n = self.rx.recv().await.expect("bus open");
                if pred(&n.event) {
                    return n.event;
                }
            }
        })
        .await
        .expect("event did not arrive")
    }
}

/// Runs the `dragtree` binary to completion.
pub fn run_cli(args: &[&str]) -> Output {
    std::process::Command::new(env!("CARGO_BIN_EXE_dragtree"))
        .args(args)
        .env_remove("DRAGTREE_CLASS")
        .env_remove("DRAGTREE_TIME_COMPRESSION")
        .env_remove("DRAGTREE_CONFIG")
        .env_remove("DRAGTREE_LOG_FILE")
        .env_remove("DRAGTREE_LOG_FORMAT")
        .output()
        .expect("failed to run dragtree")
}
