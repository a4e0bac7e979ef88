//! Observability module
//!
//! Logging, metrics, and the structured race notification stream.

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{EventBus, EventEmitter, Notification, RaceEvent};
pub use logging::{LogFormat, LogOptions, LogTarget, init_logging};
pub use metrics::init_metrics;
