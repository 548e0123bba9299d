//! Run configuration loaded from TOML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Errors loading or validating a [`SynapseConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Tunables for one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynapseConfig {
    /// Attempts per worker call, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt (milliseconds).
    pub base_delay_ms: u64,
    /// Upper bound on a single backoff delay (milliseconds).
    pub max_delay_ms: Option<u64>,
    /// Subtasks generated at the same time.
    pub max_concurrency: usize,
    /// Largest tolerated share of failed subtasks; `0.0` tolerates none.
    pub max_failure_ratio: f64,
}

impl Default for SynapseConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: None,
            max_concurrency: 4,
            max_failure_ratio: 0.0,
        }
    }
}

impl SynapseConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_failure_ratio) {
            return Err(ConfigError::Invalid(format!(
                "max_failure_ratio must be within [0, 1], got {}",
                self.max_failure_ratio
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms));
        match self.max_delay_ms {
            Some(ms) => policy.with_max_delay(Duration::from_millis(ms)),
            None => policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let cfg = SynapseConfig::default();
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.base_delay_ms, 500);
        assert_eq!(cfg.max_concurrency, 4);
        assert_eq!(cfg.max_failure_ratio, 0.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = SynapseConfig::from_toml_str("max_concurrency = 8\nmax_delay_ms = 2000\n").unwrap();
        assert_eq!(cfg.max_concurrency, 8);
        assert_eq!(cfg.max_attempts, 3);

        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(matches!(
            SynapseConfig::from_toml_str("max_attempts = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SynapseConfig::from_toml_str("max_concurrency = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SynapseConfig::from_toml_str("max_failure_ratio = 1.5"),
            Err(ConfigError::Invalid(_))
        ));
        let nan = SynapseConfig {
            max_failure_ratio: f64::NAN,
            ..SynapseConfig::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        assert!(matches!(
            SynapseConfig::from_toml_str("max_attempts = \"three\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_failure_ratio = 0.25").unwrap();
        let cfg = SynapseConfig::load(file.path()).unwrap();
        assert_eq!(cfg.max_failure_ratio, 0.25);

        assert!(matches!(
            SynapseConfig::load("/nonexistent/synapse.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
