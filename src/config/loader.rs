//! Configuration loader with environment variable expansion

use super::{expand_env_vars, Config, ConfigError};
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[serial_test::serial]
    fn test_expand_env_vars() {
        std::env::set_var("S3_FANOUT_TEST_BUCKET", "expanded-bucket");
        let config = ConfigLoader::from_yaml(
            "s3:\n  endpoint: http://localhost:9000\n  bucket: ${S3_FANOUT_TEST_BUCKET}\n",
        )
        .unwrap();
        assert_eq!(config.s3.bucket, "expanded-bucket");
        std::env::remove_var("S3_FANOUT_TEST_BUCKET");
    }

    #[test]
    fn test_invalid_yaml() {
        let result = ConfigLoader::from_yaml("s3: [unterminated");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
