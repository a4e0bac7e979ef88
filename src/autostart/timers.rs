//! Timer supervision.
//!
//! One task per controller owns every pending deadline. The controller sends
//! [`TimerCommand`]s; the supervisor sleeps until the earliest deadline, a new
//! command, or cancellation, and hands expired timers back to the controller.
//! A fired timer may already be stale (cancelled after it expired but before
//! the controller saw it); the controller checks its id before acting.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::lane::Lane;

/// The controller's delayed transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Second lane must stage before this fires
    StagingTimeout,
    /// Both lanes must hold stage this long before release is drawn
    MinStaging,
    /// Randomized release
    Release,
    /// Return to idle after the tree was triggered
    Settle,
}

/// Instruction to the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    /// Arm (or re-arm) a timer.
    Schedule {
        /// Which timer
        kind: TimerKind,
        /// Identity checked when it fires
        id: u64,
        /// Delay from now
        after: Duration,
        /// Lane the timer concerns, if any
        lane: Option<Lane>,
    },
    /// Disarm one timer.
    Cancel(TimerKind),
    /// Disarm every timer.
    CancelAll,
}

/// An expired timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    /// Which timer
    pub kind: TimerKind,
    /// Identity given at scheduling
    pub id: u64,
    /// Lane the timer concerns, if any
    pub lane: Option<Lane>,
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    id: u64,
    lane: Option<Lane>,
}

/// Pending deadlines, at most one per kind.
#[derive(Debug, Default)]
pub struct TimerSet {
    deadlines: HashMap<TimerKind, Deadline>,
}

impl TimerSet {
    /// Applies a command relative to `now`.
    pub fn apply(&mut self, command: TimerCommand, now: Instant) {
        match command {
            TimerCommand::Schedule {
                kind,
                id,
                after,
                lane,
            } => {
                trace!(?kind, id, ?after, "timer scheduled");
                self.deadlines.insert(
                    kind,
                    Deadline {
                        at: now + after,
                        id,
                        lane,
                    },
                );
            }
            TimerCommand::Cancel(kind) => {
                if self.deadlines.remove(&kind).is_some() {
                    trace!(?kind, "timer cancelled");
                }
            }
            TimerCommand::CancelAll => self.deadlines.clear(),
        }
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().map(|d| d.at).min()
    }

    /// Removes and returns every timer due at `now`, earliest first.
    pub fn take_expired(&mut self, now: Instant) -> Vec<TimerFired> {
        let mut due: Vec<(Instant, TimerFired)> = self
            .deadlines
            .iter()
            .filter(|(_, d)| d.at <= now)
            .map(|(kind, d)| {
                (
                    d.at,
                    TimerFired {
                        kind: *kind,
                        id: d.id,
                        lane: d.lane,
                    },
                )
            })
            .collect();
        due.sort_by_key(|(at, _)| *at);
        for (_, fired) in &due {
            self.deadlines.remove(&fired.kind);
        }
        due.into_iter().map(|(_, fired)| fired).collect()
    }

    /// Number of pending timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Whether no timer is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

/// Runs the supervisor until cancelled or every command sender is dropped.
///
/// `on_fire` is awaited inline, so a handler that schedules a follow-up timer
/// sees it applied on the next loop iteration.
pub async fn supervise<F, Fut>(
    mut rx: mpsc::UnboundedReceiver<TimerCommand>,
    cancel: CancellationToken,
    mut on_fire: F,
) where
    F: FnMut(TimerFired) -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    let mut timers = TimerSet::default();
    loop {
        let next = timers.next_deadline();
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("timer supervisor cancelled");
                break;
            }
            command = rx.recv() => {
                let Some(command) = command else {
                    debug!("timer supervisor channel closed");
                    break;
                };
                timers.apply(command, Instant::now());
            }
            () = sleep_until(next), if next.is_some() => {
                for fired in timers.take_expired(Instant::now()) {
                    on_fire(fired).await;
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    if let Some(at) = deadline {
        tokio::time::sleep_until(at).await;
    }
}
