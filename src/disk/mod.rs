//! Block devices
//!
//! The buffer cache fills and flushes buffers through a [`BlockDevice`].
//! Two devices are provided: [`MemDisk`], an instrumented in-memory device,
//! and [`FileDisk`], a disk image accessed with positional reads and writes.

use crate::types::{BSIZE, BlockBuf, BlockNo, DeviceId};

pub mod error;
pub use error::{DiskError, DiskResult};

pub mod file;
pub use file::FileDisk;

pub mod mem;
pub use mem::MemDisk;

/// Synchronous transfer of one `BSIZE` block
pub trait BlockDevice: Send + Sync {
    /// Reads block `blockno` of device `dev` into `buf`
    fn read(&self, dev: DeviceId, blockno: BlockNo, buf: &mut BlockBuf) -> DiskResult<()>;

    /// Writes `buf` to block `blockno` of device `dev`
    fn write(&self, dev: DeviceId, blockno: BlockNo, buf: &BlockBuf) -> DiskResult<()>;
}

/// Byte offset of a block within its device
#[inline]
pub fn block_offset(blockno: BlockNo) -> u64 {
    blockno as u64 * BSIZE as u64
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
