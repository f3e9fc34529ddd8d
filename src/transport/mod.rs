//! Transport module
//!
//! The capability the event loop drives: open a transport context for a
//! handle, then perform one HTTP exchange on it without blocking the loop.
//!
//! # Implementations
//!
//! - [`HttpTransport`] - `reqwest` client per handle, used in production
//! - any test double implementing [`Transport`]

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use std::time::Duration;
use thiserror::Error;

pub mod http;

pub use http::{HttpTransport, HttpTransportOptions};

/// Errors raised while creating a transport context
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to build transport context: {0}")]
    BuildError(String),
}

/// Why an exchange did not produce an HTTP status
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    #[error("name resolution failed: {0}")]
    Resolve(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("payload read failed: {0}")]
    LocalRead(String),

    #[error("invalid request: {0}")]
    Request(String),

    #[error("transfer failed: {0}")]
    Other(String),
}

/// Marker wrapped around payload read errors so they can be told apart from
/// network errors after the HTTP stack has wrapped them.
#[derive(Error, Debug)]
#[error("reading payload: {0}")]
pub struct PayloadReadError(#[from] pub std::io::Error);

/// Request body source
#[derive(Debug)]
pub enum Payload {
    Empty,
    Memory(Bytes),
    /// Streamed from an open file positioned at its start
    File { file: std::fs::File, len: u64 },
}

impl Payload {
    pub fn len(&self) -> u64 {
        match self {
            Payload::Empty => 0,
            Payload::Memory(data) => data.len() as u64,
            Payload::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fully built and signed request, ready for one attempt
#[derive(Debug)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Payload,
    pub timeout: Duration,
}

impl PreparedRequest {
    /// Look up a header value by (lowercase) name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// What happened to one exchange
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    /// HTTP status on a completed exchange
    pub result: Result<u16, TransportFailure>,
    /// Body bytes uploaded on an exchange that got a response, whatever its
    /// status
    pub bytes_sent: u64,
    pub elapsed: Duration,
}

/// Non-blocking HTTP capability driven by the upload event loop.
///
/// `connect` is called lazily by the handle pool, once per handle slot.
/// `perform` runs on the event loop's runtime and must not block it.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Reusable per-handle context
    type Connection: Clone + Send + Sync + 'static;

    fn connect(&self) -> Result<Self::Connection, TransportError>;

    async fn perform(
        &self,
        connection: &Self::Connection,
        request: PreparedRequest,
    ) -> TransferOutcome;
}
