// Hash functions for placing disk blocks into cache buckets

use crate::types::{BlockNo, DeviceId};
use serde::{Deserialize, Serialize};

/// xv6 bucket key: device in the high bits, block number in the low bits.
#[inline]
pub fn xv6_hash(dev: DeviceId, blockno: BlockNo) -> u64 {
    ((dev as u64) << 27) | blockno as u64
}

/// FNV-1a hash over a byte slice
/// Returns a 64-bit integer hash value
pub fn fnv1a_hash(bytes: &[u8]) -> u64 {
    // FNV-1a constants
    const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
    const FNV_PRIME: u64 = 1099511628211;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// XXH64 over a byte slice, seed 0
#[inline]
pub fn xxh64_hash(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh64::xxh64(bytes, 0)
}

/// Little-endian (dev, blockno) key bytes
#[inline]
fn key_bytes(dev: DeviceId, blockno: BlockNo) -> [u8; 8] {
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&dev.to_le_bytes());
    key[4..].copy_from_slice(&blockno.to_le_bytes());
    key
}

/// Which function maps a block to its cache bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketHash {
    /// `((dev << 27) | blockno) % nbucket`
    #[default]
    Xv6,
    /// FNV-1a over the key bytes
    Fnv1a,
    /// XXH64 over the key bytes
    Xxh64,
}

impl BucketHash {
    /// Hashes a (device, block) key
    pub fn hash(self, dev: DeviceId, blockno: BlockNo) -> u64 {
        match self {
            BucketHash::Xv6 => xv6_hash(dev, blockno),
            BucketHash::Fnv1a => fnv1a_hash(&key_bytes(dev, blockno)),
            BucketHash::Xxh64 => xxh64_hash(&key_bytes(dev, blockno)),
        }
    }

    /// Maps a (device, block) key to a bucket index below `nbucket`
    #[inline]
    pub fn bucket(self, dev: DeviceId, blockno: BlockNo, nbucket: usize) -> usize {
        (self.hash(dev, blockno) % nbucket as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
