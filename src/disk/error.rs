//! Block device error definitions

use crate::types::{BlockNo, DeviceId};
use thiserror::Error;

/// Block device error types
#[derive(Debug, Error)]
pub enum DiskError {
    /// The device number is not served by this device
    #[error("No such device: {0}")]
    NoSuchDevice(DeviceId),
    /// The block lies beyond the end of the device
    #[error("Block {blockno} out of range on device {dev}")]
    OutOfRange { dev: DeviceId, blockno: BlockNo },
    /// Transfer moved fewer bytes than a block
    #[error("Short transfer on block {blockno}: {done} of {expected} bytes")]
    ShortTransfer {
        blockno: BlockNo,
        done: usize,
        expected: usize,
    },
    /// I/O error from the host
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for block device operations
pub type DiskResult<T> = Result<T, DiskError>;
