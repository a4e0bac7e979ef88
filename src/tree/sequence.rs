//! Light-sequence planning and the detached sequence task.
//!
//! A sequence is planned up front from the timing snapshot taken when it
//! starts, so a configuration change mid-sequence never alters the phases
//! already in flight. The task checks its cancellation token under the tree's
//! write lock before every light write; an emergency stop that wins the lock
//! is therefore never followed by a stale amber or green.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::schema::{SequenceKind, TreeTiming};
use crate::lane::Lane;
use crate::observability::events::{EventBus, RaceEvent};
use crate::observability::metrics;

use super::controller::TreeState;
use super::lights::{LightKind, LightState};

/// A single light write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Light `count` ambers starting at `index`; all other ambers go dark.
    Amber {
        /// Zero-based index of the first amber lit
        index: usize,
        /// Number of ambers lit
        count: usize,
    },
    /// Ambers off, green on for every lane without a red light.
    Green,
}

/// A step preceded by a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    /// Wait before the step (already time-compressed)
    pub wait: Duration,
    /// Light write performed after the wait
    pub step: Step,
}

/// Plans the phases of a sequence.
#[must_use]
pub fn plan(kind: SequenceKind, timing: &TreeTiming) -> Vec<Phase> {
    let green_delay = timing.scaled(timing.green_delay);
    match kind {
        SequenceKind::Pro => vec![
            Phase {
                wait: Duration::ZERO,
                step: Step::Amber { index: 0, count: 3 },
            },
            Phase {
                wait: green_delay,
                step: Step::Green,
            },
        ],
        SequenceKind::Sportsman => {
            let interval = timing.scaled(timing.amber_interval);
            let mut phases: Vec<Phase> = (0..LightKind::AMBERS.len())
                .map(|index| Phase {
                    wait: if index == 0 { Duration::ZERO } else { interval },
                    step: Step::Amber { index, count: 1 },
                })
                .collect();
            phases.push(Phase {
                wait: green_delay,
                step: Step::Green,
            });
            phases
        }
    }
}

/// Total time from sequence start to green.
#[must_use]
pub fn time_to_green(kind: SequenceKind, timing: &TreeTiming) -> Duration {
    plan(kind, timing).iter().map(|p| p.wait).sum()
}

/// Runs a planned sequence to green unless `cancel` fires first.
///
/// The canceller owns the aborted-sequence bookkeeping; this task simply
/// stops writing.
pub(super) async fn run(
    shared: Arc<RwLock<TreeState>>,
    bus: EventBus,
    kind: SequenceKind,
    phases: Vec<Phase>,
    cancel: CancellationToken,
) {
    for phase in phases {
        if !phase.wait.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(%kind, "sequence cancelled while waiting");
                    return;
                }
                () = tokio::time::sleep(phase.wait) => {}
            }
        }

        let mut state = shared.write().await;
        if cancel.is_cancelled() {
            debug!(%kind, "sequence cancelled before light write");
            return;
        }

        match phase.step {
            Step::Amber { index, count } => {
                for (i, amber) in LightKind::AMBERS.into_iter().enumerate() {
                    let lit = i >= index && i < index + count;
                    state.lights.set_both(amber, LightState::from_beam(lit));
                }
                debug!(%kind, index, count, "amber on");
                bus.publish(RaceEvent::AmberOn { kind, index, count });
            }
            Step::Green => {
                for amber in LightKind::AMBERS {
                    state.lights.set_both(amber, LightState::Off);
                }
                for lane in Lane::BOTH {
                    if !state.lights.get(lane, LightKind::Red).is_lit() {
                        state.lights.set(lane, LightKind::Green, LightState::On);
                    }
                }
                let at = Utc::now();
                state.green_time = Some(at);
                state.activated = false;
                state.running = None;
                info!(%kind, %at, "green");
                bus.publish(RaceEvent::GreenOn { at });
                bus.publish(RaceEvent::SequenceEnded { kind });
                metrics::record_sequence(kind.as_label(), "completed");
            }
        }
    }
}
