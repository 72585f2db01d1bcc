//! Boot-time configuration
//!
//! Sizes of the buffer cache and the page allocator. Every field defaults to
//! the kernel parameter in [`crate::types`], so an empty JSON object is a
//! valid configuration.

use crate::infrastructure::hash::BucketHash;
use crate::types::{NBUCKET, NBUF, NCPU, PHYS_BASE, PHYS_PAGES, PGSIZE, STEAL_BATCH};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub mod error;
pub use error::{ConfigError, ConfigResult};

/// Buffer cache sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Buffers in the pool
    pub nbuf: usize,
    /// Hash buckets (shards)
    pub nbucket: usize,
    /// Bucket hash function
    pub hash: BucketHash,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            nbuf: NBUF,
            nbucket: NBUCKET,
            hash: BucketHash::default(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.nbucket == 0 {
            return Err(ConfigError::Invalid("cache.nbucket must be positive".into()));
        }
        if self.nbuf < self.nbucket {
            return Err(ConfigError::Invalid(format!(
                "cache.nbuf ({}) must be at least cache.nbucket ({})",
                self.nbuf, self.nbucket
            )));
        }
        Ok(())
    }
}

/// Page allocator sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocConfig {
    /// Cores, one free list each
    pub ncpu: usize,
    /// Pages taken per locked session when stealing
    pub steal_batch: usize,
    /// Pages of simulated physical memory
    pub phys_pages: usize,
    /// Physical address of the first page
    pub phys_base: u64,
}

impl Default for AllocConfig {
    fn default() -> Self {
        Self {
            ncpu: NCPU,
            steal_batch: STEAL_BATCH,
            phys_pages: PHYS_PAGES,
            phys_base: PHYS_BASE,
        }
    }
}

impl AllocConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.ncpu == 0 {
            return Err(ConfigError::Invalid("alloc.ncpu must be positive".into()));
        }
        if self.steal_batch == 0 {
            return Err(ConfigError::Invalid("alloc.steal_batch must be positive".into()));
        }
        if self.phys_pages == 0 {
            return Err(ConfigError::Invalid("alloc.phys_pages must be positive".into()));
        }
        if self.phys_base % PGSIZE as u64 != 0 {
            return Err(ConfigError::Invalid(format!(
                "alloc.phys_base {:#x} is not page aligned",
                self.phys_base
            )));
        }
        let bytes = (self.phys_pages as u64).checked_mul(PGSIZE as u64);
        if bytes.and_then(|b| self.phys_base.checked_add(b)).is_none() {
            return Err(ConfigError::Invalid("alloc physical range overflows".into()));
        }
        Ok(())
    }
}

/// Whole-kernel memory configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KmemConfig {
    pub cache: CacheConfig,
    pub alloc: AllocConfig,
    /// `off`, `error`, `warn`, `info`, `debug` or `trace`
    pub log_level: String,
}

impl Default for KmemConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            alloc: AllocConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl KmemConfig {
    /// Parses and validates a JSON configuration
    pub fn from_json(text: &str) -> ConfigResult<Self> {
        let config: KmemConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.cache.validate()?;
        self.alloc.validate()?;
        self.log_level()?;
        Ok(())
    }

    /// Parsed log level
    pub fn log_level(&self) -> ConfigResult<LevelFilter> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level: {}", self.log_level)))
    }
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
