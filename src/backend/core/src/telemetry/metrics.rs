//! Prometheus metrics for batches, jobs and persistence.
//!
//! Recording goes through the `metrics` facade, so every call site is a no-op
//! until [`init_metrics`] installs the Prometheus recorder.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

use crate::batch::JobStatus;

/// Histogram buckets for job durations (in seconds).
const JOB_DURATION_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

/// Handle used to render the current metrics.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// A registry with no recorder behind it; renders nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether a recorder is installed.
    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Initialize the metrics subsystem.
///
/// # Errors
///
/// Returns an error if a global recorder is already installed.
pub fn init_metrics(enabled: bool, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let handle = PrometheusBuilder::new()
        .add_global_label("service", service_name)
        .set_buckets(JOB_DURATION_BUCKETS)?
        .install_recorder()?;

    register_metric_descriptions();

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    describe_counter!("transmute_jobs_total", "Jobs reaching a terminal status");
    describe_counter!(
        "transmute_job_attempts_total",
        "Conversion attempts made, including retries"
    );
    describe_counter!("transmute_job_retries_total", "Attempts beyond the first");
    describe_gauge!("transmute_jobs_running", "Jobs currently holding a slot");
    describe_histogram!(
        "transmute_job_duration_seconds",
        "Time from job start to terminal status"
    );
    describe_counter!(
        "transmute_persistence_failures_total",
        "Record synchronizations that failed"
    );
    describe_counter!("transmute_batches_total", "Batches finished by outcome");
    describe_counter!("transmute_errors_total", "Errors raised by code and category");
}

/// Batch and job metrics.
pub struct BatchMetrics;

impl BatchMetrics {
    /// A job took a slot.
    pub fn record_job_started() {
        gauge!("transmute_jobs_running").increment(1.0);
    }

    /// One conversion attempt was made.
    pub fn record_attempt(attempt: u32) {
        counter!("transmute_job_attempts_total").increment(1);
        if attempt > 1 {
            counter!("transmute_job_retries_total").increment(1);
        }
    }

    /// A running job reached a terminal status.
    pub fn record_job_finished(status: JobStatus, elapsed: Duration) {
        gauge!("transmute_jobs_running").decrement(1.0);
        counter!("transmute_jobs_total", "status" => status.to_string()).increment(1);
        histogram!("transmute_job_duration_seconds", "status" => status.to_string())
            .record(elapsed.as_secs_f64());
    }

    /// A queued job was cancelled before it started.
    pub fn record_job_cancelled() {
        counter!("transmute_jobs_total", "status" => JobStatus::Cancelled.to_string())
            .increment(1);
    }

    /// Record synchronization failed.
    pub fn record_persistence_failure() {
        counter!("transmute_persistence_failures_total").increment(1);
    }

    /// A batch finished; `outcome` is `completed` or `cancelled`.
    pub fn record_batch_finished(outcome: &'static str) {
        counter!("transmute_batches_total", "outcome" => outcome).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_registry_renders_nothing() {
        let registry = MetricsRegistry::disabled();
        assert!(!registry.is_enabled());
        assert!(registry.render().is_empty());
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        BatchMetrics::record_job_started();
        BatchMetrics::record_attempt(2);
        BatchMetrics::record_job_finished(JobStatus::Succeeded, Duration::from_millis(40));
        BatchMetrics::record_job_cancelled();
        BatchMetrics::record_persistence_failure();
        BatchMetrics::record_batch_finished("completed");
    }
}
