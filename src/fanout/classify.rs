//! Outcome classification
//!
//! Maps what the transport reported for one attempt onto the closed set of
//! job outcomes.

use crate::transport::{TransferOutcome, TransportFailure};
use std::fmt;

/// Final or intermediate outcome of a job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Success,
    /// The payload could not be read, or the manager shut down first
    LocalIo,
    MalformedRequest,
    /// 403, 409, or a violated conditional write
    AccessDenied,
    HostResolution,
    HostConnection,
    NotFound,
    Other,
}

impl Classification {
    /// Classify an HTTP status code returned by the store.
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            400 => Self::MalformedRequest,
            // 412 is what S3-compatible stores answer to a failed If-None-Match
            403 | 409 | 412 => Self::AccessDenied,
            404 => Self::NotFound,
            _ => Self::Other,
        }
    }

    /// Classify a completed transport exchange.
    pub fn from_outcome(outcome: &TransferOutcome) -> Self {
        match &outcome.result {
            Ok(status) => Self::from_status(*status),
            Err(TransportFailure::Resolve(_)) => Self::HostResolution,
            Err(TransportFailure::Connect(_)) => Self::HostConnection,
            Err(TransportFailure::LocalRead(_)) => Self::LocalIo,
            Err(TransportFailure::Request(_)) => Self::MalformedRequest,
            Err(TransportFailure::Other(_)) => Self::Other,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::HostResolution | Self::HostConnection | Self::Other)
    }

    /// Stable lowercase name, used as a metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::LocalIo => "local_io",
            Self::MalformedRequest => "malformed_request",
            Self::AccessDenied => "access_denied",
            Self::HostResolution => "host_resolution",
            Self::HostConnection => "host_connection",
            Self::NotFound => "not_found",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
