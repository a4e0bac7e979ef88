//! Structured race notifications.
//!
//! Every state change either controller makes is published as a
//! [`RaceEvent`] on an [`EventBus`]. Subscribers receive a timestamped
//! [`Notification`] in publish order. Each subscriber has a bounded queue of
//! [`EVENT_BUS_CAPACITY`]; one that falls further behind loses the oldest
//! events and is told how many it missed. An [`EventEmitter`] can persist the
//! stream as newline-delimited JSON with a monotonically increasing sequence
//! number, counting any gap it could not write.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::autostart::AutoStartState;
use crate::config::schema::{RacingClass, SequenceKind};
use crate::lane::Lane;
use crate::tree::MotionTag;

/// Capacity of each subscriber's queue before it starts lagging.
pub const EVENT_BUS_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete notification emitted by the tree or the auto-start controller.
///
/// Tagged with `"type"` when serialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum RaceEvent {
    /// Both controllers were reset for a new race.
    RaceReset {
        /// Identifier of the new race.
        race_id: Uuid,
    },

    /// A pre-stage bulb changed.
    PreStageLight {
        /// Lane whose bulb changed.
        lane: Lane,
        /// Whether the bulb is now lit.
        on: bool,
    },

    /// A stage bulb changed.
    StageLight {
        /// Lane whose bulb changed.
        lane: Lane,
        /// Whether the bulb is now lit.
        on: bool,
    },

    /// The starter ceded sequencing authority.
    Armed {
        /// Party that armed the tree (normally `"starter"`).
        requester: String,
    },

    /// The starter took sequencing authority back.
    Disarmed,

    /// Auto-start claimed sequencing authority.
    AutoStartActivated,

    /// Auto-start handed sequencing authority back without running the tree.
    AutoStartReleased,

    /// A light sequence began.
    SequenceStarted {
        /// Pro or Sportsman.
        kind: SequenceKind,
    },

    /// Amber bulb(s) lit.
    AmberOn {
        /// Pro or Sportsman.
        kind: SequenceKind,
        /// Zero-based amber index (always 0 on a Pro tree).
        index: usize,
        /// Number of ambers lit by this step.
        count: usize,
    },

    /// Green lit. `at` is the authoritative start-of-race time.
    GreenOn {
        /// When the green bulbs were lit.
        at: DateTime<Utc>,
    },

    /// A light sequence ran to completion.
    SequenceEnded {
        /// Pro or Sportsman.
        kind: SequenceKind,
    },

    /// A light sequence was halted before green.
    SequenceAborted {
        /// Pro or Sportsman.
        kind: SequenceKind,
    },

    /// A vehicle left before green.
    RedLight {
        /// Offending lane.
        lane: Lane,
    },

    /// Deep staging detected in a class that allows it.
    DeepStage {
        /// Lane that deep staged.
        lane: Lane,
        /// Class being raced.
        class: RacingClass,
    },

    /// Deep staging detected in a class that prohibits it; officials decide.
    DeepStageViolation {
        /// Lane that deep staged.
        lane: Lane,
        /// Class being raced.
        class: RacingClass,
    },

    /// A vehicle re-entered stage after backing out without a full back-out.
    StagingMotionViolation {
        /// Offending lane.
        lane: Lane,
        /// Complete motion history for the lane, oldest first.
        history: Vec<MotionTag>,
    },

    /// Every light forced off, red blinking.
    EmergencyStop,

    /// The auto-start controller moved between states.
    ControllerStateChanged {
        /// Previous state.
        from: AutoStartState,
        /// New state.
        to: AutoStartState,
    },

    /// The auto-start controller faulted.
    Fault {
        /// Human-readable reason.
        reason: String,
    },

    /// A lane staged before the other lane pre-staged.
    CourtesyStaging {
        /// Lane that staged early.
        lane: Lane,
    },

    /// The randomized release delay was drawn.
    ReleaseScheduled {
        /// Drawn delay in milliseconds (before time compression).
        delay_ms: u64,
    },

    /// Auto-start asked the tree to run its sequence.
    TreeTriggered {
        /// Sequence requested.
        kind: SequenceKind,
    },

    /// The starter took manual control.
    OverrideEngaged,

    /// The starter handed control back to auto-start.
    OverrideCleared,
}

impl RaceEvent {
    /// Variant name as it appears in the `type` tag.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RaceReset { .. } => "RaceReset",
            Self::PreStageLight { .. } => "PreStageLight",
            Self::StageLight { .. } => "StageLight",
            Self::Armed { .. } => "Armed",
            Self::Disarmed => "Disarmed",
            Self::AutoStartActivated => "AutoStartActivated",
            Self::AutoStartReleased => "AutoStartReleased",
            Self::SequenceStarted { .. } => "SequenceStarted",
            Self::AmberOn { .. } => "AmberOn",
            Self::GreenOn { .. } => "GreenOn",
            Self::SequenceEnded { .. } => "SequenceEnded",
            Self::SequenceAborted { .. } => "SequenceAborted",
            Self::RedLight { .. } => "RedLight",
            Self::DeepStage { .. } => "DeepStage",
            Self::DeepStageViolation { .. } => "DeepStageViolation",
            Self::StagingMotionViolation { .. } => "StagingMotionViolation",
            Self::EmergencyStop => "EmergencyStop",
            Self::ControllerStateChanged { .. } => "ControllerStateChanged",
            Self::Fault { .. } => "Fault",
            Self::CourtesyStaging { .. } => "CourtesyStaging",
            Self::ReleaseScheduled { .. } => "ReleaseScheduled",
            Self::TreeTriggered { .. } => "TreeTriggered",
            Self::OverrideEngaged => "OverrideEngaged",
            Self::OverrideCleared => "OverrideCleared",
        }
    }
}

/// A [`RaceEvent`] stamped with the wall-clock time it was published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
    /// The event (flattened into the same JSON object).
    #[serde(flatten)]
    pub event: RaceEvent,
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Fan-out for race notifications.
///
/// Cloning yields another handle to the same bus. Publishing never blocks
/// and never fails: with no subscribers the event is simply dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Notification>,
}

impl EventBus {
    /// Creates a bus with [`EVENT_BUS_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    /// Publishes an event to every current subscriber.
    pub fn publish(&self, event: RaceEvent) {
        tracing::trace!(event = event.name(), "publish");
        let _ = self.tx.send(Notification {
            timestamp: Utc::now(),
            event,
        });
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Subscribes as a `Stream`; lagged gaps surface as errors.
    #[must_use]
    pub fn stream(&self) -> BroadcastStream<Notification> {
        BroadcastStream::new(self.tx.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Envelope (adds sequence number via serde flatten)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EventEnvelope<'a> {
    sequence: u64,
    #[serde(flatten)]
    notification: &'a Notification,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Serialization or I/O failures are dropped: a broken log file must never
/// stop a race.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Creates an emitter that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards everything.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Writes a notification as a single JSONL line.
    pub fn emit(&self, notification: &Notification) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            notification,
        };

        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(&envelope) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Writes every notification from `rx` until the bus closes and returns
    /// how many were lost to lag. Sequence numbers stay contiguous across a
    /// gap.
    pub async fn forward(&self, mut rx: broadcast::Receiver<Notification>) -> u64 {
        let mut lost = 0;
        loop {
            match rx.recv().await {
                Ok(notification) => self.emit(&notification),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event emitter lagged behind the bus");
                    lost += missed;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        lost
    }
}
