//! Page allocator error definitions

use crate::config::ConfigError;
use thiserror::Error;

/// Page allocator error types
///
/// Misuse (double free, foreign address) is not here: it halts the kernel.
#[derive(Debug, Error)]
pub enum PageError {
    /// No core has a free page left
    #[error("Out of physical memory")]
    OutOfMemory,
    /// The allocator was built from an invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for page allocator operations
pub type PageResult<T> = Result<T, PageError>;
