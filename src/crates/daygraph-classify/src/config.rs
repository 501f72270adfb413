//! Workflow configuration
//!
//! [`ClassifyConfig`] gathers every tunable of the classification run: batch
//! budgets, the long-form duration threshold, executor concurrency, retry
//! shape, and the backend model name. It deserializes from TOML with
//! unknown keys rejected, and validates value ranges at load so a broken
//! config fails before any run starts.

use serde::{Deserialize, Serialize};
use std::path::Path;

use daygraph_core::RetryPolicy;

use crate::batch::BatchLimits;
use crate::error::ConfigError;

fn default_max_items() -> usize {
    15
}

fn default_max_chars() -> usize {
    2000
}

fn default_overhead() -> usize {
    500
}

fn default_long_form_threshold_secs() -> f64 {
    600.0
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> usize {
    3
}

fn default_initial_interval() -> f64 {
    0.5
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_interval() -> f64 {
    128.0
}

fn default_jitter() -> bool {
    true
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_max_supersteps() -> usize {
    64
}

/// Configuration for a classification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifyConfig {
    /// Maximum items per classification batch
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Serialized-size budget per batch, in characters
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Prompt overhead charged against the size budget
    #[serde(default = "default_overhead")]
    pub overhead: usize,

    /// Duration at or above which a multipurpose item takes the
    /// title-search branch, in seconds
    #[serde(default = "default_long_form_threshold_secs")]
    pub long_form_threshold_secs: f64,

    /// Concurrent node invocations per superstep, sized to the backend
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts per node invocation, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Base retry delay in seconds
    #[serde(default = "default_initial_interval")]
    pub initial_interval: f64,

    /// Retry delay multiplier
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Retry delay ceiling in seconds
    #[serde(default = "default_max_interval")]
    pub max_interval: f64,

    /// Whether retry delays are jittered
    #[serde(default = "default_jitter")]
    pub jitter: bool,

    /// Backend model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Superstep safety limit for the run loop
    #[serde(default = "default_max_supersteps")]
    pub max_supersteps: usize,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            max_chars: default_max_chars(),
            overhead: default_overhead(),
            long_form_threshold_secs: default_long_form_threshold_secs(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            initial_interval: default_initial_interval(),
            backoff_factor: default_backoff_factor(),
            max_interval: default_max_interval(),
            jitter: default_jitter(),
            model: default_model(),
            max_supersteps: default_max_supersteps(),
        }
    }
}

impl ClassifyConfig {
    /// Parse from a TOML string and validate.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or unknown keys,
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Check value ranges. Called by the loaders; call it directly after
    /// constructing a config in code.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_items == 0 {
            return Err(ConfigError::Invalid("max_items must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".to_string()));
        }
        if self.long_form_threshold_secs <= 0.0 {
            return Err(ConfigError::Invalid(
                "long_form_threshold_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Batch planner limits derived from this config.
    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_items: self.max_items,
            max_chars: self.max_chars,
            overhead: self.overhead,
        }
    }

    /// Retry policy derived from this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts)
            .with_initial_interval(self.initial_interval)
            .with_backoff_factor(self.backoff_factor)
            .with_max_interval(self.max_interval)
            .with_jitter(self.jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ClassifyConfig::default();
        assert_eq!(config.max_items, 15);
        assert_eq!(config.max_chars, 2000);
        assert_eq!(config.overhead, 500);
        assert_eq!(config.long_form_threshold_secs, 600.0);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.model, "deepseek-chat");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = ClassifyConfig::from_toml_str(
            r#"
            max_items = 10
            model = "qwen-plus"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_items, 10);
        assert_eq!(config.model, "qwen-plus");
        assert_eq!(config.max_chars, 2000);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = ClassifyConfig::from_toml_str("max_itemz = 10").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{err}");
    }

    #[test]
    fn zero_max_items_fails_fast() {
        let err = ClassifyConfig::from_toml_str("max_items = 0").unwrap_err();
        assert!(err.to_string().contains("max_items"), "{err}");
    }

    #[test]
    fn zero_max_attempts_fails_fast() {
        let err = ClassifyConfig::from_toml_str("max_attempts = 0").unwrap_err();
        assert!(err.to_string().contains("max_attempts"), "{err}");
    }

    #[test]
    fn retry_policy_carries_config_values() {
        let config = ClassifyConfig::from_toml_str(
            r#"
            max_attempts = 5
            initial_interval = 1.0
            backoff_factor = 3.0
            max_interval = 30.0
            jitter = false
            "#,
        )
        .unwrap();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff_factor, 3.0);
        assert!(!policy.jitter);
    }
}
