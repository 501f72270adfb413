//! Error types for the classification workflow
//!
//! The workflow inherits the engine's containment policy: classification is
//! best-effort enrichment, so per-item and per-batch trouble (malformed
//! backend output, unknown ids, a dead branch) is logged and absorbed,
//! leaving the affected fields null. What remains here is the genuinely
//! fatal surface: broken configuration and run-level engine errors.

use thiserror::Error;

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// Path that was attempted
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The TOML payload did not deserialize, including unknown keys.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field deserialized but carries an unusable value.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors surfaced by the classification run.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// Configuration rejected before the run started.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The engine aborted the run (validation, step limit, cancellation).
    #[error(transparent)]
    Engine(#[from] daygraph_core::ExecutorError),

    /// The aggregate state could not cross the engine boundary.
    #[error("State conversion failed: {0}")]
    State(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClassifyError>;
