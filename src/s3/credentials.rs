//! S3 Credentials Module
//!
//! Loads the access/secret key pair used to sign requests.
//!
//! # Example
//!
//! ```
//! use s3_fanout::s3::Credentials;
//!
//! let creds = Credentials::new("access-key", "secret-key");
//! assert_eq!(creds.access_key_id(), "access-key");
//! assert_eq!(creds.secret_access_key(), "secret-key");
//! ```

use crate::config::S3Config;
use std::fmt;
use thiserror::Error;

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Credentials for signing requests against the store
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
}

impl Credentials {
    /// Create new credentials
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    /// Get the access key ID
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Get the secret access key
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }
}

// Keep the secret out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Factory methods for loading credentials from the supported sources
pub struct CredentialsProvider;

impl CredentialsProvider {
    /// Load credentials from environment variables
    ///
    /// Looks for:
    /// - `AWS_ACCESS_KEY_ID`
    /// - `AWS_SECRET_ACCESS_KEY`
    pub fn from_env() -> Result<Credentials, CredentialsError> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            CredentialsError::MissingCredentials("AWS_ACCESS_KEY_ID not set".into())
        })?;

        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            CredentialsError::MissingCredentials("AWS_SECRET_ACCESS_KEY not set".into())
        })?;

        Self::validated(access_key, secret_key)
    }

    /// Load credentials from S3Config
    ///
    /// Uses the `access_key` and `secret_key` fields from the configuration.
    pub fn from_config(config: &S3Config) -> Result<Credentials, CredentialsError> {
        let access_key = config.access_key.as_ref().ok_or_else(|| {
            CredentialsError::MissingCredentials("access_key not set in config".into())
        })?;

        let secret_key = config.secret_key.as_ref().ok_or_else(|| {
            CredentialsError::MissingCredentials("secret_key not set in config".into())
        })?;

        Self::validated(access_key.clone(), secret_key.clone())
    }

    /// Configuration first, then the environment
    pub fn resolve(config: &S3Config) -> Result<Credentials, CredentialsError> {
        Self::from_config(config).or_else(|_| Self::from_env())
    }

    fn validated(access_key: String, secret_key: String) -> Result<Credentials, CredentialsError> {
        if access_key.trim().is_empty() {
            return Err(CredentialsError::InvalidCredentials(
                "access key is empty".into(),
            ));
        }
        if secret_key.is_empty() {
            return Err(CredentialsError::InvalidCredentials(
                "secret key is empty".into(),
            ));
        }
        Ok(Credentials::new(access_key, secret_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::UrlStyle;

    fn s3_config(access_key: Option<&str>, secret_key: Option<&str>) -> S3Config {
        S3Config {
            endpoint: "http://localhost:9000".into(),
            bucket: "test".into(),
            url_style: UrlStyle::Path,
            access_key: access_key.map(String::from),
            secret_key: secret_key.map(String::from),
        }
    }

    #[test]
    fn test_credentials_creation() {
        let creds = Credentials::new("access", "secret");
        assert_eq!(creds.access_key_id(), "access");
        assert_eq!(creds.secret_access_key(), "secret");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("access", "very-secret");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("access"));
        assert!(!printed.contains("very-secret"));
    }

    #[test]
    fn test_from_config_missing_access_key() {
        let result = CredentialsProvider::from_config(&s3_config(None, Some("secret")));
        assert!(matches!(
            result,
            Err(CredentialsError::MissingCredentials(_))
        ));
    }

    #[test]
    fn test_from_config_missing_secret_key() {
        let result = CredentialsProvider::from_config(&s3_config(Some("access"), None));
        assert!(result.is_err());
    }

    #[test]
    fn test_from_config_empty_access_key() {
        let result = CredentialsProvider::from_config(&s3_config(Some("  "), Some("secret")));
        assert!(matches!(
            result,
            Err(CredentialsError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn test_from_config_success() {
        let creds = CredentialsProvider::from_config(&s3_config(
            Some("config-access"),
            Some("config-secret"),
        ))
        .unwrap();
        assert_eq!(creds.access_key_id(), "config-access");
        assert_eq!(creds.secret_access_key(), "config-secret");
    }
}
