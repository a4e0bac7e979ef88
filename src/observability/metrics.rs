//! Metrics collection for `dragtree`.
//!
//! Prometheus-compatible counters and histograms. Every label value comes
//! from a closed enum, so label cardinality is bounded by construction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::DragTreeError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without an
/// HTTP endpoint.
///
/// # Errors
///
/// Returns `DragTreeError::Metrics` if the recorder or HTTP listener
/// cannot be installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), DragTreeError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| DragTreeError::Metrics(e.to_string()))?;

    describe_metrics();
    Ok(())
}

/// Registers metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!(
        "dragtree_state_transitions_total",
        "Auto-start controller state transitions"
    );
    describe_counter!("dragtree_faults_total", "Auto-start faults by kind");
    describe_counter!(
        "dragtree_rule_violations_total",
        "Deep-staging and staging-motion violations by rule"
    );
    describe_counter!(
        "dragtree_sequences_total",
        "Light sequences by kind and outcome"
    );
    describe_histogram!(
        "dragtree_release_delay_ms",
        "Randomized release delay in milliseconds"
    );
    describe_counter!("dragtree_emergency_stops_total", "Emergency stops");
}

/// Records an auto-start state transition.
pub fn record_state_transition(from: &'static str, to: &'static str) {
    counter!("dragtree_state_transitions_total", "from" => from, "to" => to).increment(1);
}

/// Records an auto-start fault.
pub fn record_fault(kind: &'static str) {
    counter!("dragtree_faults_total", "kind" => kind).increment(1);
}

/// Records an advisory rule violation.
pub fn record_rule_violation(rule: &'static str) {
    counter!("dragtree_rule_violations_total", "rule" => rule).increment(1);
}

/// Records a light sequence outcome (`"completed"` or `"aborted"`).
pub fn record_sequence(kind: &'static str, outcome: &'static str) {
    counter!("dragtree_sequences_total", "kind" => kind, "outcome" => outcome).increment(1);
}

/// Records a drawn release delay.
pub fn record_release_delay(delay: Duration) {
    histogram!("dragtree_release_delay_ms").record(delay.as_secs_f64() * 1000.0);
}

/// Records an emergency stop.
pub fn record_emergency_stop() {
    counter!("dragtree_emergency_stops_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        // metrics macros silently no-op when no global recorder is installed
        record_state_transition("idle", "activated");
        record_fault("staging_timeout");
        record_rule_violation("deep_stage");
        record_sequence("pro", "completed");
        record_release_delay(Duration::from_millis(812));
        record_emergency_stop();
    }
}
