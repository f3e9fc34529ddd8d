//! Upload jobs
//!
//! A [`Job`] describes one probe or upload. Producers build it, hand it to
//! [`FanoutManager::submit`](super::FanoutManager::submit) and get a
//! [`JobReport`] back once the job has been finalized.

use super::classify::Classification;
use crate::s3::Credentials;
use bytes::Bytes;
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// What the job asks of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Existence check, no body
    Head,
    /// Upload the payload
    Put,
    /// Probe first; upload only if the object is missing
    HeadThenPut,
}

/// Where the payload comes from
#[derive(Debug, Clone)]
pub enum Origin {
    /// In-memory buffer; slice the `Bytes` to upload a sub-range
    Memory(Bytes),
    /// File streamed from disk on every attempt
    Path(PathBuf),
}

/// Target object and the credentials to reach it
#[derive(Debug, Clone)]
pub struct Destination {
    pub credentials: Arc<Credentials>,
    pub bucket: Arc<str>,
    pub object_key: String,
}

impl Destination {
    pub fn new(
        credentials: Arc<Credentials>,
        bucket: impl Into<Arc<str>>,
        object_key: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            bucket: bucket.into(),
            object_key: object_key.into(),
        }
    }
}

/// Lifecycle of a job inside the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Queued,
    Bound,
    InFlight,
    Retrying,
    Finalized,
}

/// Mutable per-job state owned by the event loop while the job is accepted
#[derive(Debug)]
pub(crate) struct TransferState {
    pub(crate) phase: JobPhase,
    /// Method of the current attempt; a probe-then-put job switches to PUT
    pub(crate) method: Method,
    /// Cached so retries do not re-read the payload
    pub(crate) content_md5: Option<String>,
    pub(crate) attempts: u32,
    pub(crate) retries: u32,
    /// Most recent backoff, zero before the first retry
    pub(crate) backoff: Duration,
    pub(crate) backoffs: Vec<Duration>,
    pub(crate) bytes_sent: u64,
}

impl TransferState {
    fn new(kind: RequestKind) -> Self {
        let method = match kind {
            RequestKind::Put => Method::PUT,
            RequestKind::Head | RequestKind::HeadThenPut => Method::HEAD,
        };
        Self {
            phase: JobPhase::Queued,
            method,
            content_md5: None,
            attempts: 0,
            retries: 0,
            backoff: Duration::ZERO,
            backoffs: Vec::new(),
            bytes_sent: 0,
        }
    }
}

/// One upload or existence-check request
#[derive(Debug)]
pub struct Job {
    pub kind: RequestKind,
    pub origin: Origin,
    pub destination: Destination,
    /// Fail with `AccessDenied` if the object already exists
    pub conditional: bool,
    pub(crate) state: TransferState,
}

impl Job {
    pub fn new(kind: RequestKind, origin: Origin, destination: Destination) -> Self {
        Self {
            kind,
            origin,
            destination,
            conditional: false,
            state: TransferState::new(kind),
        }
    }

    /// Existence check for `destination`
    pub fn head(destination: Destination) -> Self {
        Self::new(RequestKind::Head, Origin::Memory(Bytes::new()), destination)
    }

    /// Upload an in-memory buffer
    pub fn put_bytes(destination: Destination, data: impl Into<Bytes>) -> Self {
        Self::new(RequestKind::Put, Origin::Memory(data.into()), destination)
    }

    /// Upload a file from disk
    pub fn put_path(destination: Destination, path: impl Into<PathBuf>) -> Self {
        Self::new(RequestKind::Put, Origin::Path(path.into()), destination)
    }

    pub fn with_conditional(mut self, conditional: bool) -> Self {
        self.conditional = conditional;
        self
    }

    /// Probe before uploading; an existing object is not uploaded again
    pub fn probe_first(mut self) -> Self {
        self.kind = RequestKind::HeadThenPut;
        self.state = TransferState::new(self.kind);
        self
    }

    pub fn phase(&self) -> JobPhase {
        self.state.phase
    }

    pub(crate) fn report(&self, classification: Classification) -> JobReport {
        JobReport {
            classification,
            bucket: Arc::clone(&self.destination.bucket),
            object_key: self.destination.object_key.clone(),
            attempts: self.state.attempts,
            retries: self.state.retries,
            backoffs: self.state.backoffs.clone(),
            bytes_sent: self.state.bytes_sent,
        }
    }
}

/// Final result of a submitted job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub classification: Classification,
    pub bucket: Arc<str>,
    pub object_key: String,
    /// Requests issued, including retries
    pub attempts: u32,
    pub retries: u32,
    /// Every backoff waited, in order
    pub backoffs: Vec<Duration>,
    /// Body bytes uploaded across all attempts that got a response
    pub bytes_sent: u64,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.classification.is_success()
    }
}

/// One-shot completion signal; consumed on use, so it fires at most once
#[derive(Debug)]
pub(crate) struct CompletionSignal(oneshot::Sender<JobReport>);

impl CompletionSignal {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<JobReport>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub(crate) fn fire(self, report: JobReport) {
        // The submitter only goes away if its thread died
        if self.0.send(report).is_err() {
            tracing::debug!("Completion receiver dropped before the job finished");
        }
    }
}

/// A job accepted by the manager, paired with its completion signal
#[derive(Debug)]
pub(crate) struct Tracked {
    pub(crate) job: Job,
    signal: CompletionSignal,
}

impl Tracked {
    pub(crate) fn new(job: Job) -> (Self, oneshot::Receiver<JobReport>) {
        let (signal, receiver) = CompletionSignal::channel();
        (Self { job, signal }, receiver)
    }

    /// Move the job to `Finalized` and deliver its report.
    pub(crate) fn finalize(mut self, classification: Classification) -> JobReport {
        self.job.state.phase = JobPhase::Finalized;
        let report = self.job.report(classification);
        self.signal.fire(report.clone());
        report
    }
}
