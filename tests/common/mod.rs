//! Shared test utilities
//!
//! A scripted in-process [`Transport`] that answers from per-URL scripts and
//! records what the manager asked of it.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use s3_fanout::fanout::{Destination, FanoutManager, FanoutOptions, RetryPolicy};
use s3_fanout::s3::{url_constructor, Credentials, UrlStyle};
use s3_fanout::transport::{
    PreparedRequest, TransferOutcome, Transport, TransportError, TransportFailure,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const ENDPOINT: &str = "http://fake-store";
pub const BUCKET: &str = "repo";

pub type Answer = Result<u16, TransportFailure>;

/// What the fake saw for one attempt
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body_len: u64,
    pub timeout: Duration,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Default)]
pub struct FakeState {
    scripts: Mutex<HashMap<String, VecDeque<Answer>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    connects: AtomicUsize,
}

impl FakeState {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_for(&self, key: &str) -> Vec<RecordedRequest> {
        let url = object_url(key);
        self.requests
            .lock()
            .iter()
            .filter(|request| request.url == url)
            .cloned()
            .collect()
    }

    pub fn performed(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight gauge even when the transfer is abandoned
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Answers every request after `delay`, from the script for its URL or with
/// the fallback once the script is used up
#[derive(Clone)]
pub struct ScriptedTransport {
    state: Arc<FakeState>,
    fallback: Answer,
    delay: Duration,
}

impl ScriptedTransport {
    pub fn new(fallback: Answer) -> Self {
        Self {
            state: Arc::new(FakeState::default()),
            fallback,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue answers for one object key
    pub fn script(self, key: &str, answers: impl IntoIterator<Item = Answer>) -> Self {
        self.state
            .scripts
            .lock()
            .entry(object_url(key))
            .or_default()
            .extend(answers);
        self
    }

    pub fn state(&self) -> Arc<FakeState> {
        Arc::clone(&self.state)
    }

    fn answer(&self, url: &str) -> Answer {
        self.state
            .scripts
            .lock()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    type Connection = usize;

    fn connect(&self) -> Result<usize, TransportError> {
        Ok(self.state.connects.fetch_add(1, Ordering::SeqCst))
    }

    async fn perform(&self, _: &usize, request: PreparedRequest) -> TransferOutcome {
        let started = Instant::now();
        let in_flight = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .peak_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.state.in_flight);

        let body_len = request.body.len();
        self.state.requests.lock().push(RecordedRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body_len,
            timeout: request.timeout,
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = self.answer(&request.url);
        let bytes_sent = if result.is_ok() { body_len } else { 0 };
        TransferOutcome {
            result,
            bytes_sent,
            elapsed: started.elapsed(),
        }
    }
}

pub fn object_url(key: &str) -> String {
    format!("{ENDPOINT}/{BUCKET}/{key}")
}

pub fn destination(key: &str) -> Destination {
    Destination::new(
        Arc::new(Credentials::new("AKIDEXAMPLE", "secret")),
        BUCKET,
        key,
    )
}

pub fn options(max_handles: usize, max_retries: u32, init_ms: u64, max_ms: u64) -> FanoutOptions {
    FanoutOptions {
        max_handles,
        timeout: Duration::from_secs(5),
        retry: RetryPolicy::new(
            max_retries,
            Duration::from_millis(init_ms),
            Duration::from_millis(max_ms),
        ),
        shutdown_grace: Duration::from_millis(50),
        jitter_seed: 42,
    }
}

/// Started manager over `transport`
pub fn manager(
    options: FanoutOptions,
    transport: ScriptedTransport,
) -> FanoutManager<ScriptedTransport> {
    let urls = url_constructor(ENDPOINT, UrlStyle::Path);
    let manager = FanoutManager::new(options, urls, transport).unwrap();
    manager.start().unwrap();
    manager
}

pub fn connect_failure() -> Answer {
    Err(TransportFailure::Connect("connection refused".into()))
}

pub fn resolve_failure() -> Answer {
    Err(TransportFailure::Resolve("no such host".into()))
}
