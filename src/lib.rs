//! Kernel memory subsystems: a sharded block buffer cache and a per-core
//! physical page allocator with copy-on-write reference counts.

// Global type definitions
pub mod types;

#[macro_use]
mod macros;

#[doc(hidden)]
pub use log as __log;

// Import various modules
pub mod buffer;
pub mod config;
pub mod disk;
pub mod infrastructure;
pub mod page;

// Re-export the main entry points for easier access
pub use buffer::{BufGuard, BufId, BufferCache, BufferError, BufferResult, CacheStats};
pub use config::{AllocConfig, CacheConfig, ConfigError, KmemConfig};
pub use disk::{BlockDevice, DiskError, FileDisk, MemDisk};
pub use page::{AllocStats, PageAllocator, PageError, PageResult, PhysAddr};
