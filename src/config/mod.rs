//! Configuration module for s3-fanout
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.
//!
//! # Example
//!
//! ```yaml
//! s3:
//!   endpoint: "http://localhost:9000"
//!   bucket: "repo"
//!   url_style: "path"
//!   access_key: "${S3_ACCESS_KEY}"
//!   secret_key: "${S3_SECRET_KEY}"
//! fanout:
//!   max_handles: 64
//!   timeout_secs: 30
//!   max_retries: 3
//!   backoff_init_ms: 100
//!   backoff_max_ms: 2000
//!   ipv4_only: false
//! ```

use crate::fanout::{FanoutOptions, RetryPolicy};
use crate::s3::UrlStyle;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

lazy_static! {
    static ref ENV_VAR: regex_lite::Regex =
        regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
}

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
pub(crate) fn expand_env_vars(s: &str) -> String {
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in ENV_VAR.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub s3: S3Config,
    #[serde(default)]
    pub fanout: FanoutConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_http_url(&self.s3.endpoint) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid S3 endpoint '{}': must start with http:// or https://",
                self.s3.endpoint
            )));
        }

        if self.s3.bucket.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "S3 bucket cannot be empty".into(),
            ));
        }

        self.fanout.validate()
    }
}

/// Object store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default)]
    pub url_style: UrlStyle,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

/// Upload manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Maximum number of concurrent transfer handles
    #[serde(default = "default_max_handles")]
    pub max_handles: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_init_ms")]
    pub backoff_init_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default)]
    pub ipv4_only: bool,
    /// How long shutdown waits for in-flight transfers
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Seed for the backoff jitter generator; random when unset
    #[serde(default)]
    pub jitter_seed: Option<u64>,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_handles: default_max_handles(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_init_ms: default_backoff_init_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            ipv4_only: false,
            shutdown_grace_ms: default_shutdown_grace_ms(),
            jitter_seed: None,
        }
    }
}

impl FanoutConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_handles == 0 {
            return Err(ConfigError::ValidationError(
                "max_handles must be greater than 0".into(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.backoff_init_ms > self.backoff_max_ms {
            return Err(ConfigError::ValidationError(format!(
                "backoff_init_ms ({}) exceeds backoff_max_ms ({})",
                self.backoff_init_ms, self.backoff_max_ms
            )));
        }

        Ok(())
    }

    /// Manager options described by this configuration
    pub fn options(&self) -> FanoutOptions {
        FanoutOptions {
            max_handles: self.max_handles,
            timeout: Duration::from_secs(self.timeout_secs),
            retry: RetryPolicy::new(
                self.max_retries,
                Duration::from_millis(self.backoff_init_ms),
                Duration::from_millis(self.backoff_max_ms),
            ),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
            jitter_seed: self.jitter_seed.unwrap_or_else(rand::random),
        }
    }
}

fn default_max_handles() -> usize {
    64
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_init_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    2000
}

fn default_shutdown_grace_ms() -> u64 {
    1000
}
