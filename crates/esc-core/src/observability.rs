//! Observability infrastructure for ESC instances
//!
//! Provides:
//! - Prometheus metrics (submission outcomes, analysis latency, tunable parameters)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, register_int_gauge_vec,
    GaugeVec, HistogramVec, IntCounterVec, IntGaugeVec,
};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for analysis round-trip latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 7.5, 10.0, 15.0, 30.0, 60.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EscMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct EscMetricsInner {
    submissions: IntCounterVec,
    analysis_latency_seconds: HistogramVec,
    harvest_frequency_seconds: GaugeVec,
    data_time_limit: GaugeVec,
    in_flight: IntGaugeVec,
    evaluations: IntCounterVec,
    result_rows: IntCounterVec,
}

impl EscMetricsInner {
    fn new() -> Self {
        Self {
            submissions: register_int_counter_vec!(
                "esc_submission_attempts_total",
                "Submission attempts by transaction kind and outcome",
                &["esc", "kind", "outcome"]
            )
            .expect("Failed to register submission_attempts"),

            analysis_latency_seconds: register_histogram_vec!(
                "esc_analysis_latency_seconds",
                "Round-trip time from analysis submission to its completion event",
                &["esc"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register analysis_latency_seconds"),

            harvest_frequency_seconds: register_gauge_vec!(
                "esc_harvest_frequency_seconds",
                "Current harvest period",
                &["esc"]
            )
            .expect("Failed to register harvest_frequency_seconds"),

            data_time_limit: register_gauge_vec!(
                "esc_data_time_limit",
                "Current analysis time-window",
                &["esc"]
            )
            .expect("Failed to register data_time_limit"),

            in_flight: register_int_gauge_vec!(
                "esc_submission_in_flight",
                "Whether a submission is currently in flight",
                &["esc"]
            )
            .expect("Failed to register submission_in_flight"),

            evaluations: register_int_counter_vec!(
                "esc_elasticity_evaluations_total",
                "Elasticity evaluations by result",
                &["esc", "result"]
            )
            .expect("Failed to register elasticity_evaluations"),

            result_rows: register_int_counter_vec!(
                "esc_result_rows_total",
                "Rows appended to the result buffers",
                &["esc", "file"]
            )
            .expect("Failed to register result_rows"),
        }
    }
}

/// ESC metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct EscMetrics {
    _private: (),
}

impl Default for EscMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EscMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EscMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EscMetricsInner {
        GLOBAL_METRICS.get_or_init(EscMetricsInner::new)
    }

    /// Count a submission attempt outcome
    pub fn inc_submission(&self, esc: &str, kind: &str, outcome: &str) {
        self.inner()
            .submissions
            .with_label_values(&[esc, kind, outcome])
            .inc();
    }

    pub fn observe_analysis_latency(&self, esc: &str, seconds: f64) {
        self.inner()
            .analysis_latency_seconds
            .with_label_values(&[esc])
            .observe(seconds);
    }

    pub fn set_harvest_frequency(&self, esc: &str, seconds: f64) {
        self.inner()
            .harvest_frequency_seconds
            .with_label_values(&[esc])
            .set(seconds);
    }

    pub fn set_data_time_limit(&self, esc: &str, window: f64) {
        self.inner()
            .data_time_limit
            .with_label_values(&[esc])
            .set(window);
    }

    pub fn set_in_flight(&self, esc: &str, in_flight: bool) {
        self.inner()
            .in_flight
            .with_label_values(&[esc])
            .set(i64::from(in_flight));
    }

    pub fn inc_evaluation(&self, esc: &str, result: &str) {
        self.inner()
            .evaluations
            .with_label_values(&[esc, result])
            .inc();
    }

    pub fn inc_result_row(&self, esc: &str, file: &str) {
        self.inner()
            .result_rows
            .with_label_values(&[esc, file])
            .inc();
    }
}

/// Structured logger for ESC lifecycle events
///
/// Emits fixed event names so log pipelines can follow parameter changes
/// and run boundaries.
#[derive(Clone)]
pub struct StructuredLogger {
    esc: String,
}

impl StructuredLogger {
    pub fn new(esc: impl Into<String>) -> Self {
        Self { esc: esc.into() }
    }

    /// Log instance start
    pub fn log_started(&self, mode: &str, harvest_frequency: f64, data_time_limit: f64) {
        info!(
            event = "esc_started",
            esc = %self.esc,
            elasticity_mode = %mode,
            harvest_frequency = harvest_frequency,
            data_time_limit = data_time_limit,
            "Elastic smart contract started"
        );
    }

    /// Log the end of a run
    pub fn log_completed(&self, reason: &str) {
        info!(
            event = "esc_completed",
            esc = %self.esc,
            reason = %reason,
            "Execution completed, shutting down"
        );
    }

    pub fn log_harvest_frequency_changed(&self, previous: f64, current: f64, avg_latency: f64) {
        info!(
            event = "harvest_frequency_changed",
            esc = %self.esc,
            previous = previous,
            current = current,
            avg_latency_secs = avg_latency,
            "New harvest frequency"
        );
    }

    pub fn log_time_window_changed(&self, previous: f64, current: f64, avg_latency: f64) {
        info!(
            event = "time_window_changed",
            esc = %self.esc,
            previous = previous,
            current = current,
            avg_latency_secs = avg_latency,
            "New time window"
        );
    }

    /// Log a submission given up after exhausting its retry budget
    pub fn log_submission_abandoned(&self, kind: &str, id: u64, failures: u32) {
        warn!(
            event = "submission_abandoned",
            esc = %self.esc,
            kind = %kind,
            id = id,
            failures = failures,
            "Transaction submission abandoned"
        );
    }

    /// Log result files written to disk
    pub fn log_results_flushed(&self, path: &Path, rows: usize) {
        info!(
            event = "results_flushed",
            esc = %self.esc,
            path = %path.display(),
            rows = rows,
            "Result file written"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_esc_metrics_creation() {
        let metrics = EscMetrics::new();

        metrics.inc_submission("esc-test", "harvest", "submitted");
        metrics.observe_analysis_latency("esc-test", 1.5);
        metrics.set_harvest_frequency("esc-test", 5.0);
        metrics.set_data_time_limit("esc-test", 30.0);
        metrics.set_in_flight("esc-test", true);
        metrics.inc_evaluation("esc-test", "applied");
        metrics.inc_result_row("esc-test", "calculations");

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "esc_submission_attempts_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("traffic");
        assert_eq!(logger.esc, "traffic");
    }
}
