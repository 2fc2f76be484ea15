use crate::ExportError;
use metrics::{histogram, increment_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::info;

pub const EXPORTS_TOTAL: &str = "browser_export_exports_total";
pub const EXPORT_DURATION_SECONDS: &str = "browser_export_export_duration_seconds";
pub const CONTEXT_RETRIES_TOTAL: &str = "browser_export_context_retries_total";
pub const ENGINE_LAUNCHES_TOTAL: &str = "browser_export_engine_launches_total";

/// Export counters and timings, recorded through the `metrics` facade.
///
/// Without an installed recorder every call is a no-op.
pub struct ExportMetrics;

impl ExportMetrics {
    pub fn record_export(duration: Duration, outcome: Result<(), &ExportError>) {
        let outcome = match outcome {
            Ok(()) => "success",
            Err(e) => e.kind(),
        };
        increment_counter!(EXPORTS_TOTAL, "outcome" => outcome);
        histogram!(EXPORT_DURATION_SECONDS, duration.as_secs_f64(), "outcome" => outcome);
    }

    pub fn record_context_retry() {
        increment_counter!(CONTEXT_RETRIES_TOTAL);
    }

    pub fn record_engine_launch() {
        increment_counter!(ENGINE_LAUNCHES_TOTAL);
    }
}

/// Install a Prometheus recorder for the whole process.
///
/// The returned handle renders the text exposition served on `/metrics`.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, ExportError> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::set_boxed_recorder(Box::new(recorder))
        .map_err(|e| ExportError::Configuration(format!("Failed to install metrics recorder: {e}")))?;

    info!("Prometheus metrics recorder installed");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        ExportMetrics::record_export(Duration::from_millis(5), Ok(()));
        ExportMetrics::record_export(
            Duration::from_millis(5),
            Err(&ExportError::timeout("too slow")),
        );
        ExportMetrics::record_context_retry();
        ExportMetrics::record_engine_launch();
    }
}
