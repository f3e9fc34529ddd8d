//! Upload fan-out manager
//!
//! Pushes (PUT) or probes (HEAD) objects in an S3-compatible store through a
//! bounded pool of transfer handles. One background thread drives every
//! transfer; any number of producer threads submit jobs and block until
//! their own job is finalized.
//!
//! # Example
//!
//! ```no_run
//! use s3_fanout::fanout::{Destination, FanoutManager, FanoutOptions, Job};
//! use s3_fanout::s3::{url_constructor, Credentials, UrlStyle};
//! use std::sync::Arc;
//!
//! let urls = url_constructor("http://localhost:9000", UrlStyle::Path);
//! let manager = FanoutManager::with_http(FanoutOptions::default(), urls).unwrap();
//! manager.start().unwrap();
//!
//! let credentials = Arc::new(Credentials::new("access", "secret"));
//! let job = Job::put_bytes(Destination::new(credentials, "repo", "data/ab/cdef"), "payload");
//! let report = manager.submit(job);
//! println!("{}: {}", report.object_key, report.classification);
//!
//! manager.stop();
//! ```

mod classify;
mod event_loop;
mod job;
mod manager;
mod pool;
mod request;
mod retry;
mod stats;

pub use classify::Classification;
pub use job::{Destination, Job, JobPhase, JobReport, Origin, RequestKind};
pub use manager::FanoutManager;
pub use retry::RetryPolicy;
pub use stats::Statistics;

use stats::StatisticsAggregator;
use std::time::Duration;
use thiserror::Error;

/// Manager errors
///
/// Job failures are never reported here; they are classifications in a
/// [`JobReport`].
#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("Manager has been stopped")]
    AlreadyStopped,

    #[error("Invalid manager options: {0}")]
    InvalidOptions(String),

    #[error("Failed to spawn upload thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Failed to create transport: {0}")]
    Transport(#[from] crate::transport::TransportError),
}

/// Options fixed at manager construction
#[derive(Debug, Clone, Copy)]
pub struct FanoutOptions {
    /// Upper bound on concurrently bound transfer handles
    pub max_handles: usize,
    /// Per-request timeout, adjustable later with `set_timeout`
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// How long shutdown waits for transfers already on the wire
    pub shutdown_grace: Duration,
    /// Seed for the backoff jitter generator
    pub jitter_seed: u64,
}

impl Default for FanoutOptions {
    fn default() -> Self {
        Self {
            max_handles: 64,
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            shutdown_grace: Duration::from_secs(1),
            jitter_seed: 0,
        }
    }
}

/// Settings that may change while the loop runs; read once per attempt
#[derive(Debug, Clone, Copy)]
pub(crate) struct RuntimeOptions {
    pub(crate) timeout: Duration,
    pub(crate) retry: RetryPolicy,
}

/// State shared between the manager and its event loop
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) options: parking_lot::Mutex<RuntimeOptions>,
    pub(crate) stats: StatisticsAggregator,
}

impl Shared {
    fn new(options: &FanoutOptions) -> Self {
        Self {
            options: parking_lot::Mutex::new(RuntimeOptions {
                timeout: options.timeout,
                retry: options.retry,
            }),
            stats: StatisticsAggregator::default(),
        }
    }
}
