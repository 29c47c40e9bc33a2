//! Prometheus metrics for `phasetrack`.
//!
//! Every label value comes from a closed enum (`PhaseKind`, `EffectKind`,
//! `EventKind`, violation labels), so label cardinality is bounded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::effect::EffectKind;
use crate::error::TrackerError;
use crate::event::EventKind;
use crate::phase::PhaseKind;

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
/// Returns `TrackerError::Io` if the recorder or HTTP listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), TrackerError> {
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
    .map_err(|e| TrackerError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!("phasetrack_phases_total", "Phases pushed, by kind");
    describe_gauge!("phasetrack_phase_depth", "Current phase nesting depth");
    describe_counter!(
        "phasetrack_effects_captured_total",
        "Effects captured, by effect kind"
    );
    describe_counter!(
        "phasetrack_captures_rejected_total",
        "Captures dropped because no phase could own them"
    );
    describe_counter!(
        "phasetrack_events_total",
        "Events fired, by event kind and outcome"
    );
    describe_counter!(
        "phasetrack_effects_applied_total",
        "Effects applied to the world"
    );
    describe_counter!(
        "phasetrack_effects_discarded_total",
        "Effects discarded by cancellation or failure"
    );
    describe_counter!(
        "phasetrack_apply_failures_total",
        "Effects the world rejected, by effect kind"
    );
    describe_counter!(
        "phasetrack_protocol_violations_total",
        "Phase protocol violations, by violation"
    );
    describe_counter!(
        "phasetrack_observer_failures_total",
        "Observer callbacks that failed or panicked"
    );
    describe_histogram!(
        "phasetrack_phase_exit_duration_ms",
        "Time spent building, dispatching, and applying a popped phase"
    );
}

/// Records a phase push.
pub fn record_phase_entered(kind: PhaseKind) {
    counter!("phasetrack_phases_total", "kind" => kind.name()).increment(1);
}

/// Sets the nesting depth gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_phase_depth(depth: usize) {
    gauge!("phasetrack_phase_depth").set(depth as f64);
}

/// Records a capture.
pub fn record_capture(kind: EffectKind) {
    counter!("phasetrack_effects_captured_total", "kind" => kind.as_str()).increment(1);
}

/// Records a dropped capture.
pub fn record_capture_rejected(reason: &'static str) {
    counter!("phasetrack_captures_rejected_total", "reason" => reason).increment(1);
}

/// Records a fired event. `outcome` is `allowed` or `cancelled`.
pub fn record_event(kind: EventKind, outcome: &'static str) {
    counter!("phasetrack_events_total", "kind" => kind.as_str(), "outcome" => outcome)
        .increment(1);
}

/// Records applied effects.
pub fn record_effects_applied(count: u64) {
    counter!("phasetrack_effects_applied_total").increment(count);
}

/// Records discarded effects.
pub fn record_effects_discarded(count: u64) {
    counter!("phasetrack_effects_discarded_total").increment(count);
}

/// Records an effect the world rejected.
pub fn record_apply_failure(kind: EffectKind) {
    counter!("phasetrack_apply_failures_total", "kind" => kind.as_str()).increment(1);
}

/// Records a protocol violation.
pub fn record_violation(label: &'static str) {
    counter!("phasetrack_protocol_violations_total", "violation" => label).increment(1);
}

/// Records an observer failure.
pub fn record_observer_failure() {
    counter!("phasetrack_observer_failures_total").increment(1);
}

/// Records how long processing a popped phase took.
pub fn record_exit_duration(kind: PhaseKind, duration: Duration) {
    histogram!("phasetrack_phase_exit_duration_ms", "kind" => kind.name())
        .record(duration.as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_phase_entered(PhaseKind::WorldTick);
        set_phase_depth(3);
        record_capture(EffectKind::BlockChange);
        record_capture_rejected("idle");
        record_event(EventKind::DropItem, "allowed");
        record_effects_applied(4);
        record_effects_discarded(2);
        record_apply_failure(EffectKind::EntitySpawn);
        record_violation("unbalanced_pop");
        record_observer_failure();
        record_exit_duration(PhaseKind::InventoryClick, Duration::from_micros(250));
    }
}
