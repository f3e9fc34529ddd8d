//! Statistics aggregation
//!
//! Counters are written by the event loop only and read from any thread.
//! Each value is a single atomic word, so readers may see a slightly stale
//! snapshot but never a torn value.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Point-in-time copy of the manager's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub transferred_bytes: u64,
    pub transfer_time: Duration,
    pub num_requests: u64,
    pub num_retries: u64,
    pub handles_in_use: usize,
    pub peak_handles_in_use: usize,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Transferred Bytes: {}", self.transferred_bytes)?;
        writeln!(
            f,
            "Transfer Time: {:.3} s",
            self.transfer_time.as_secs_f64()
        )?;
        writeln!(f, "Number of requests: {}", self.num_requests)?;
        write!(f, "Number of retries: {}", self.num_retries)
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatisticsAggregator {
    transferred_bytes: AtomicU64,
    transfer_time_us: AtomicU64,
    num_requests: AtomicU64,
    num_retries: AtomicU64,
    handles_in_use: AtomicUsize,
    peak_handles_in_use: AtomicUsize,
}

impl StatisticsAggregator {
    pub(crate) fn record_request(&self) {
        self.num_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transfer(&self, bytes: u64, elapsed: Duration) {
        self.transferred_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.transfer_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.num_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_handles_in_use(&self, in_use: usize) {
        self.handles_in_use.store(in_use, Ordering::Relaxed);
        self.peak_handles_in_use.fetch_max(in_use, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.transferred_bytes.store(0, Ordering::Relaxed);
        self.transfer_time_us.store(0, Ordering::Relaxed);
        self.num_requests.store(0, Ordering::Relaxed);
        self.num_retries.store(0, Ordering::Relaxed);
        self.handles_in_use.store(0, Ordering::Relaxed);
        self.peak_handles_in_use.store(0, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> Statistics {
        Statistics {
            transferred_bytes: self.transferred_bytes.load(Ordering::Relaxed),
            transfer_time: Duration::from_micros(self.transfer_time_us.load(Ordering::Relaxed)),
            num_requests: self.num_requests.load(Ordering::Relaxed),
            num_retries: self.num_retries.load(Ordering::Relaxed),
            handles_in_use: self.handles_in_use.load(Ordering::Relaxed),
            peak_handles_in_use: self.peak_handles_in_use.load(Ordering::Relaxed),
        }
    }
}
