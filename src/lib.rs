//! s3-fanout Library
//!
//! Bounded fan-out uploader for S3-compatible object stores.
//!
//! # Features
//!
//! - **Bounded Concurrency**: A fixed pool of transfer handles driven by one
//!   background event loop thread
//! - **Blocking Producers**: Any thread can submit a job and wait for its own
//!   result
//! - **Retry with Backoff**: Transient failures retry with jittered
//!   exponential backoff
//! - **S3 Signing**: Header-based request authentication with optional
//!   conditional writes
//!
//! # Example
//!
//! ```no_run
//! use s3_fanout::{Config, FanoutManager};
//! use s3_fanout::fanout::{Destination, Job};
//! use s3_fanout::s3::CredentialsProvider;
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let credentials = Arc::new(CredentialsProvider::resolve(&config.s3)?);
//!
//!     let manager = FanoutManager::from_config(&config)?;
//!     manager.start()?;
//!
//!     let destination = Destination::new(credentials, config.s3.bucket.as_str(), "data/ab/cdef");
//!     let report = manager.submit(Job::put_path(destination, "/srv/payload"));
//!     println!("{}", report.classification);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod fanout;
pub mod metrics;
pub mod s3;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use fanout::{Classification, FanoutManager, Job, JobReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
