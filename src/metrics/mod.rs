//! Metrics module
//!
//! Prometheus counters for the upload manager. They are process-wide and
//! complement the per-manager [`Statistics`](crate::fanout::Statistics).

use crate::fanout::Classification;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, register_int_gauge, Counter,
    CounterVec, HistogramVec, IntGauge,
};

lazy_static! {
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "s3_fanout_requests_total",
        "Total number of requests issued to the object store",
        &["method"]
    ).unwrap();

    pub static ref RETRIES_TOTAL: Counter = register_counter!(
        "s3_fanout_retries_total",
        "Total number of retried requests"
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "s3_fanout_upload_bytes_total",
        "Total bytes uploaded"
    ).unwrap();

    pub static ref TRANSFER_DURATION: HistogramVec = register_histogram_vec!(
        "s3_fanout_transfer_duration_seconds",
        "Duration of a single request in seconds",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]
    ).unwrap();

    pub static ref JOBS_TOTAL: CounterVec = register_counter_vec!(
        "s3_fanout_jobs_total",
        "Finalized jobs by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref HANDLES_IN_USE: IntGauge = register_int_gauge!(
        "s3_fanout_handles_in_use",
        "Transfer handles currently bound to a job"
    ).unwrap();
}

/// Record a request leaving for the store
pub fn record_request(method: &str) {
    REQUESTS_TOTAL.with_label_values(&[method]).inc();
}

/// Record a finished exchange
pub fn record_transfer(method: &str, bytes: u64, duration_secs: f64) {
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
    TRANSFER_DURATION
        .with_label_values(&[method])
        .observe(duration_secs);
}

/// Record a retry decision
pub fn record_retry() {
    RETRIES_TOTAL.inc();
}

/// Record a finalized job
pub fn record_job(classification: Classification) {
    JOBS_TOTAL
        .with_label_values(&[classification.as_str()])
        .inc();
}

/// Count handles newly bound by one manager
pub fn handles_bound(count: usize) {
    HANDLES_IN_USE.add(count as i64);
}

/// Count handles one manager gave back
pub fn handles_released(count: usize) {
    HANDLES_IN_USE.sub(count as i64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request() {
        let before = REQUESTS_TOTAL.with_label_values(&["HEAD"]).get();
        record_request("HEAD");
        assert!(REQUESTS_TOTAL.with_label_values(&["HEAD"]).get() >= before + 1.0);
    }

    #[test]
    fn test_record_transfer() {
        record_transfer("PUT", 1024, 0.005);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_record_job() {
        record_job(Classification::AccessDenied);
        assert!(
            JOBS_TOTAL
                .with_label_values(&["access_denied"])
                .get()
                >= 1.0
        );
    }

    #[test]
    fn test_handles_bound_and_released() {
        handles_bound(3);
        handles_released(3);
        // Just verify it doesn't panic
    }
}
