//! Object URL construction
//!
//! The manager receives a [`UrlConstructor`] once at initialization and calls
//! it from the event loop for every attempt. Any `Fn(&str, &str) -> String`
//! that is `Send + Sync` works; [`url_constructor`] builds the two common
//! layouts.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Maps `(bucket, object_key)` to a request URL. Must be pure.
pub type UrlConstructor = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Everything except RFC 3986 unreserved characters and `/`
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Addressing layout of the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStyle {
    /// `scheme://bucket.host/key`
    #[default]
    VirtualHost,
    /// `scheme://host/bucket/key`
    Path,
}

/// Percent-encode an object key for use in a URL path
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

/// Build a URL constructor for `endpoint` (e.g. `http://s3.example.org:9000`).
///
/// An endpoint without a scheme is treated as `http://`.
pub fn url_constructor(endpoint: &str, style: UrlStyle) -> UrlConstructor {
    let trimmed = endpoint.trim_end_matches('/');
    let (scheme, host) = match trimmed.split_once("://") {
        Some((scheme, host)) => (scheme.to_string(), host.to_string()),
        None => ("http".to_string(), trimmed.to_string()),
    };

    match style {
        UrlStyle::VirtualHost => Arc::new(move |bucket: &str, key: &str| {
            format!("{}://{}.{}/{}", scheme, bucket, host, encode_key(key))
        }),
        UrlStyle::Path => Arc::new(move |bucket: &str, key: &str| {
            format!("{}://{}/{}/{}", scheme, host, bucket, encode_key(key))
        }),
    }
}
