//! Prometheus metrics for the email delivery queue.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "email_queue";

lazy_static! {
    /// Total jobs enqueued
    pub static ref JOBS_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_jobs_enqueued_total", METRIC_PREFIX),
        "Total email jobs enqueued"
    ).unwrap();

    /// Total jobs delivered successfully
    pub static ref JOBS_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_jobs_sent_total", METRIC_PREFIX),
        "Total email jobs delivered successfully"
    ).unwrap();

    /// Total terminal failures (attempts exhausted)
    pub static ref JOBS_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_jobs_failed_total", METRIC_PREFIX),
        "Total email jobs that exhausted their attempts"
    ).unwrap();

    /// Total retries scheduled after a failed attempt
    pub static ref JOBS_RETRIED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_jobs_retried_total", METRIC_PREFIX),
        "Total retry schedules after failed dispatch attempts"
    ).unwrap();

    /// Total claim conflicts (job taken by a concurrent claim)
    pub static ref CLAIM_CONFLICTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_claim_conflicts_total", METRIC_PREFIX),
        "Total claims lost to a concurrent worker"
    ).unwrap();

    /// Total jobs deleted by cleanup
    pub static ref JOBS_CLEANED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_jobs_cleaned_total", METRIC_PREFIX),
        "Total terminal jobs deleted by cleanup"
    ).unwrap();

    /// Whether the processor timer is running (1) or stopped (0)
    pub static ref PROCESSOR_RUNNING: IntGauge = register_int_gauge!(
        format!("{}_processor_running", METRIC_PREFIX),
        "Whether the queue processor is running"
    ).unwrap();

    /// Dispatch duration per job in seconds
    pub static ref DISPATCH_DURATION: Histogram = register_histogram!(
        format!("{}_dispatch_duration_seconds", METRIC_PREFIX),
        "Time spent dispatching one job, claim to outcome",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();
}
