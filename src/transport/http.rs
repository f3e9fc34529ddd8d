//! HTTP transport backed by `reqwest`
//!
//! Each handle slot owns its own `reqwest::Client`, so one handle maps to one
//! keep-alive connection towards the store.

use super::{
    Payload, PayloadReadError, PreparedRequest, TransferOutcome, Transport, TransportError,
    TransportFailure,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use std::error::Error as StdError;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};
use tokio_util::io::ReaderStream;

/// Options applied to every client the transport builds
#[derive(Debug, Clone)]
pub struct HttpTransportOptions {
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Only resolve and connect over IPv4
    pub ipv4_only: bool,
}

impl Default for HttpTransportOptions {
    fn default() -> Self {
        Self {
            user_agent: format!("s3-fanout/{}", crate::VERSION),
            connect_timeout: Duration::from_secs(10),
            ipv4_only: false,
        }
    }
}

/// Production [`Transport`]
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    options: HttpTransportOptions,
}

impl HttpTransport {
    pub fn new(options: HttpTransportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &HttpTransportOptions {
        &self.options
    }
}

#[async_trait]
impl Transport for HttpTransport {
    type Connection = reqwest::Client;

    fn connect(&self) -> Result<reqwest::Client, TransportError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(self.options.user_agent.as_str())
            .connect_timeout(self.options.connect_timeout)
            .pool_max_idle_per_host(1);

        if self.options.ipv4_only {
            builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }

        builder
            .build()
            .map_err(|e| TransportError::BuildError(e.to_string()))
    }

    #[tracing::instrument(
        name = "transport.perform",
        skip(self, connection, request),
        fields(http.method = %request.method, http.url = %request.url)
    )]
    async fn perform(
        &self,
        connection: &reqwest::Client,
        request: PreparedRequest,
    ) -> TransferOutcome {
        let started = Instant::now();
        let body_len = request.body.len();

        let mut builder = connection
            .request(request.method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        builder = match request.body {
            Payload::Empty => builder,
            Payload::Memory(data) => builder.body(data),
            Payload::File { file, .. } => {
                let stream = ReaderStream::new(tokio::fs::File::from_std(file))
                    .map_err(PayloadReadError::from);
                builder.body(reqwest::Body::wrap_stream(stream))
            }
        };

        let result = match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                // Error bodies are small XML documents; read them so the
                // connection can be reused.
                if let Err(e) = response.bytes().await {
                    tracing::debug!(error = %e, "Failed to drain response body");
                }
                Ok(status)
            }
            Err(e) => Err(classify_error(&e)),
        };

        // A response means the store consumed the whole body
        let bytes_sent = if result.is_ok() { body_len } else { 0 };

        TransferOutcome {
            result,
            bytes_sent,
            elapsed: started.elapsed(),
        }
    }
}

/// Map a `reqwest` error onto a transport failure by walking its source chain.
fn classify_error(err: &reqwest::Error) -> TransportFailure {
    let message = error_chain(err);

    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if cause.downcast_ref::<PayloadReadError>().is_some() {
            return TransportFailure::LocalRead(message);
        }
        source = cause.source();
    }

    if err.is_builder() {
        return TransportFailure::Request(message);
    }
    if err.is_timeout() {
        return TransportFailure::Connect(message);
    }
    if err.is_connect() {
        let lower = message.to_lowercase();
        if lower.contains("dns error") || lower.contains("failed to lookup address") {
            return TransportFailure::Resolve(message);
        }
        return TransportFailure::Connect(message);
    }
    if err.is_request() || err.is_body() {
        // Send/receive errors on an established connection
        return TransportFailure::Connect(message);
    }
    TransportFailure::Other(message)
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
