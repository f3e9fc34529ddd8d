//! Tests for configuration loading
//!
//! Validates YAML parsing, environment expansion, defaults and how a loaded
//! configuration turns into a running manager.

use s3_fanout::config::{Config, ConfigError, ConfigLoader};
use s3_fanout::s3::{CredentialsError, CredentialsProvider, UrlStyle};
use s3_fanout::FanoutManager;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;

const FULL_CONFIG: &str = r#"
s3:
  endpoint: "http://localhost:9000"
  bucket: "repo"
  url_style: "path"
  access_key: "${S3_FANOUT_IT_ACCESS_KEY}"
  secret_key: "${S3_FANOUT_IT_SECRET_KEY:-fallback-secret}"

fanout:
  max_handles: 16
  timeout_secs: 30
  max_retries: 5
  backoff_init_ms: 50
  backoff_max_ms: 800
  ipv4_only: true
  shutdown_grace_ms: 250
  jitter_seed: 99
"#;

#[test]
#[serial]
fn test_load_full_config_from_file() {
    std::env::set_var("S3_FANOUT_IT_ACCESS_KEY", "AKIDEXAMPLE");
    std::env::remove_var("S3_FANOUT_IT_SECRET_KEY");

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(FULL_CONFIG.as_bytes()).unwrap();

    let config = Config::load(file.path()).expect("Failed to load config");

    assert_eq!(config.s3.endpoint, "http://localhost:9000");
    assert_eq!(config.s3.url_style, UrlStyle::Path);
    assert_eq!(config.s3.access_key.as_deref(), Some("AKIDEXAMPLE"));
    assert_eq!(config.s3.secret_key.as_deref(), Some("fallback-secret"));

    let options = config.fanout.options();
    assert_eq!(options.max_handles, 16);
    assert_eq!(options.timeout, Duration::from_secs(30));
    assert_eq!(options.retry.max_retries(), 5);
    assert_eq!(options.retry.backoff_max(), Duration::from_millis(800));
    assert_eq!(options.shutdown_grace, Duration::from_millis(250));
    assert_eq!(options.jitter_seed, 99);
    assert!(config.fanout.ipv4_only);

    let credentials = CredentialsProvider::resolve(&config.s3).unwrap();
    assert_eq!(credentials.access_key_id(), "AKIDEXAMPLE");

    std::env::remove_var("S3_FANOUT_IT_ACCESS_KEY");
}

#[test]
fn test_fanout_section_defaults() {
    let config = ConfigLoader::from_yaml(
        r#"
s3:
  endpoint: "https://s3.example.org"
  bucket: "repo"
"#,
    )
    .unwrap();

    assert_eq!(config.s3.url_style, UrlStyle::VirtualHost);
    assert_eq!(config.fanout.max_handles, 64);
    assert_eq!(config.fanout.timeout_secs, 60);
    assert_eq!(config.fanout.max_retries, 3);
    assert!(config.fanout.jitter_seed.is_none());
}

#[test]
fn test_invalid_config_rejected() {
    let result = ConfigLoader::from_yaml(
        r#"
s3:
  endpoint: "http://localhost:9000"
  bucket: "repo"
fanout:
  max_handles: 0
"#,
    );
    assert!(matches!(result, Err(ConfigError::ValidationError(_))));
}

#[test]
fn test_missing_file() {
    let result = Config::load("/nonexistent/s3-fanout/config.yaml");
    assert!(matches!(result, Err(ConfigError::IoError(_))));
}

#[test]
#[serial]
fn test_missing_credentials() {
    std::env::remove_var("AWS_ACCESS_KEY_ID");
    std::env::remove_var("AWS_SECRET_ACCESS_KEY");

    let config = ConfigLoader::from_yaml(
        r#"
s3:
  endpoint: "http://localhost:9000"
  bucket: "repo"
"#,
    )
    .unwrap();

    assert!(matches!(
        CredentialsProvider::resolve(&config.s3),
        Err(CredentialsError::MissingCredentials(_))
    ));
}

#[test]
fn test_manager_from_config() {
    let config = ConfigLoader::from_yaml(
        r#"
s3:
  endpoint: "http://localhost:9000"
  bucket: "repo"
fanout:
  max_handles: 3
  timeout_secs: 12
"#,
    )
    .unwrap();

    let manager = FanoutManager::from_config(&config).unwrap();
    assert_eq!(manager.max_handles(), 3);
    assert_eq!(manager.timeout(), Duration::from_secs(12));
    assert!(!manager.is_running());
}
