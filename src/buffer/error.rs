//! Buffer cache error definitions

use crate::config::ConfigError;
use crate::disk::DiskError;
use thiserror::Error;

/// Buffer cache error types
///
/// Pool exhaustion is not here: it halts the kernel.
#[derive(Debug, Error)]
pub enum BufferError {
    /// The block device failed the transfer
    #[error("Device error: {0}")]
    Device(#[from] DiskError),
    /// The cache was built from an invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for buffer cache operations
pub type BufferResult<T> = Result<T, BufferError>;
