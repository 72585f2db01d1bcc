//! Configuration error definitions

use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the configuration file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid JSON for this schema
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
