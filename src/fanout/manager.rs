//! Fan-out manager façade
//!
//! Owns the event loop thread, the handle pool while the loop is not
//! running, the submission channel and the shared configuration.

use super::classify::Classification;
use super::event_loop::{Pool, UploadLoop};
use super::job::{Job, JobReport, Tracked};
use super::pool::HandlePool;
use super::retry::RetryPolicy;
use super::stats::Statistics;
use super::{FanoutError, FanoutOptions, Shared};
use crate::config::Config;
use crate::s3::{url_constructor, UrlConstructor};
use crate::transport::{HttpTransport, HttpTransportOptions, Transport};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const STATE_INITIALIZED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

const LOOP_THREAD_NAME: &str = "s3-fanout-upload";

/// Lifecycle resources, touched only by `start` and `stop`
struct Control<T: Transport> {
    /// Parked here whenever the loop thread does not own it
    pool: Option<Pool<T>>,
    terminate: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<Pool<T>>>,
}

/// Uploads and probes objects on behalf of many producer threads.
///
/// Lifecycle: [`new`](Self::new), [`start`](Self::start), any number of
/// [`submit`](Self::submit) calls from any thread, [`stop`](Self::stop).
/// A stopped manager cannot be restarted. Dropping the manager stops it.
pub struct FanoutManager<T: Transport = HttpTransport> {
    transport: Arc<T>,
    urls: UrlConstructor,
    options: FanoutOptions,
    shared: Arc<Shared>,
    state: AtomicU8,
    jobs: RwLock<Option<mpsc::UnboundedSender<Tracked>>>,
    control: Mutex<Control<T>>,
}

impl FanoutManager<HttpTransport> {
    /// Manager backed by the `reqwest` transport with default options
    pub fn with_http(options: FanoutOptions, urls: UrlConstructor) -> Result<Self, FanoutError> {
        Self::new(options, urls, HttpTransport::default())
    }

    /// Build a manager from a loaded configuration
    pub fn from_config(config: &Config) -> Result<Self, FanoutError> {
        config
            .validate()
            .map_err(|e| FanoutError::InvalidOptions(e.to_string()))?;

        let transport = HttpTransport::new(HttpTransportOptions {
            ipv4_only: config.fanout.ipv4_only,
            ..Default::default()
        });
        let urls = url_constructor(&config.s3.endpoint, config.s3.url_style);
        Self::new(config.fanout.options(), urls, transport)
    }
}

impl<T: Transport> FanoutManager<T> {
    /// Allocate the handle pool and reset statistics. Nothing runs until
    /// [`start`](Self::start).
    pub fn new(options: FanoutOptions, urls: UrlConstructor, transport: T) -> Result<Self, FanoutError> {
        if options.max_handles == 0 {
            return Err(FanoutError::InvalidOptions(
                "max_handles must be greater than 0".into(),
            ));
        }
        if options.timeout.is_zero() {
            return Err(FanoutError::InvalidOptions(
                "timeout must be greater than 0".into(),
            ));
        }

        let shared = Arc::new(Shared::new(&options));
        shared.stats.reset();

        Ok(Self {
            transport: Arc::new(transport),
            urls,
            options,
            shared,
            state: AtomicU8::new(STATE_INITIALIZED),
            jobs: RwLock::new(None),
            control: Mutex::new(Control {
                pool: Some(HandlePool::new(options.max_handles)),
                terminate: None,
                thread: None,
            }),
        })
    }

    pub fn max_handles(&self) -> usize {
        self.options.max_handles
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    /// Spawn the event loop thread. Calling it again while running is a
    /// no-op.
    #[tracing::instrument(name = "fanout.start", skip(self), fields(max_handles = self.options.max_handles))]
    pub fn start(&self) -> Result<(), FanoutError> {
        let mut control = self.control.lock();
        match self.state.load(Ordering::Acquire) {
            STATE_RUNNING => return Ok(()),
            STATE_STOPPED => return Err(FanoutError::AlreadyStopped),
            _ => {}
        }

        let pool = control
            .pool
            .take()
            .unwrap_or_else(|| HandlePool::new(self.options.max_handles));
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (terminate_tx, terminate_rx) = oneshot::channel();

        let upload_loop = UploadLoop::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.urls),
            Arc::clone(&self.shared),
            pool,
            jobs_rx,
            terminate_rx,
            self.options.jitter_seed,
            self.options.shutdown_grace,
        );

        let thread = std::thread::Builder::new()
            .name(LOOP_THREAD_NAME.into())
            .spawn(move || upload_loop.run())?;

        control.thread = Some(thread);
        control.terminate = Some(terminate_tx);
        *self.jobs.write() = Some(jobs_tx);
        self.state.store(STATE_RUNNING, Ordering::Release);

        tracing::info!("Upload manager started");
        Ok(())
    }

    /// Terminate the event loop and release every handle.
    ///
    /// Jobs that have not finished are signaled with `LocalIo`. Safe to call
    /// more than once.
    #[tracing::instrument(name = "fanout.stop", skip(self))]
    pub fn stop(&self) {
        let mut control = self.control.lock();
        if self.state.swap(STATE_STOPPED, Ordering::AcqRel) == STATE_STOPPED {
            return;
        }

        // No submission can reach the loop past this point
        drop(self.jobs.write().take());

        if let Some(terminate) = control.terminate.take() {
            // Loop already gone if this fails
            let _ = terminate.send(());
        }

        if let Some(thread) = control.thread.take() {
            match thread.join() {
                Ok(pool) => control.pool = Some(pool),
                Err(_) => tracing::error!("Upload event loop thread panicked"),
            }
        }

        let closed = control
            .pool
            .as_mut()
            .map(|pool| pool.close_connections())
            .unwrap_or(0);

        let stats = self.statistics();
        tracing::info!(
            closed_handles = closed,
            transferred_bytes = stats.transferred_bytes,
            requests = stats.num_requests,
            retries = stats.num_retries,
            "Upload manager stopped"
        );
    }

    /// Submit a job and block until it is finalized.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`submit_async`](Self::submit_async) there.
    pub fn submit(&self, job: Job) -> JobReport {
        match self.enqueue(job) {
            Ok((receiver, fallback)) => receiver.blocking_recv().unwrap_or(fallback),
            Err(report) => report,
        }
    }

    /// Submit a job and wait for it without blocking the calling runtime.
    pub async fn submit_async(&self, job: Job) -> JobReport {
        match self.enqueue(job) {
            Ok((receiver, fallback)) => receiver.await.unwrap_or(fallback),
            Err(report) => report,
        }
    }

    /// Hand the job to the loop. A job that cannot be handed over is
    /// finalized here with `LocalIo`.
    fn enqueue(&self, job: Job) -> Result<(oneshot::Receiver<JobReport>, JobReport), JobReport> {
        let fallback = job.report(Classification::LocalIo);
        let (tracked, receiver) = Tracked::new(job);

        let jobs = self.jobs.read();
        let Some(sender) = jobs.as_ref() else {
            tracing::warn!(
                key = %tracked.job.destination.object_key,
                "Job submitted to a manager that is not running"
            );
            return Err(tracked.finalize(Classification::LocalIo));
        };

        match sender.send(tracked) {
            Ok(()) => Ok((receiver, fallback)),
            Err(mpsc::error::SendError(tracked)) => {
                tracing::warn!(
                    key = %tracked.job.destination.object_key,
                    "Upload event loop is gone"
                );
                Err(tracked.finalize(Classification::LocalIo))
            }
        }
    }

    /// Per-request timeout; takes effect from the next attempt. A zero
    /// timeout is ignored.
    pub fn set_timeout(&self, timeout: Duration) {
        if timeout.is_zero() {
            tracing::warn!(
                current_ms = self.timeout().as_millis() as u64,
                "Ignoring zero request timeout"
            );
            return;
        }
        self.shared.options.lock().timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.shared.options.lock().timeout
    }

    /// Replace the retry policy; takes effect from the next attempt
    pub fn set_retry_parameters(&self, max_retries: u32, backoff_init_ms: u64, backoff_max_ms: u64) {
        self.shared.options.lock().retry = RetryPolicy::new(
            max_retries,
            Duration::from_millis(backoff_init_ms),
            Duration::from_millis(backoff_max_ms),
        );
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.shared.options.lock().retry
    }

    /// Snapshot of the counters
    pub fn statistics(&self) -> Statistics {
        self.shared.stats.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.shared.stats.reset();
    }
}

impl<T: Transport> Drop for FanoutManager<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
