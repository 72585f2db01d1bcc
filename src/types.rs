//! Global type definitions
//!
//! Kernel parameters, identifier aliases, and constants shared by the
//! buffer cache and the page allocator.

/// Device number type
pub type DeviceId = u32;

/// Block number type (index of a block on its device)
pub type BlockNo = u32;

/// Monotonic timer tick
pub type Ticks = u64;

/// Execution core index
pub type CpuId = usize;

/// Disk block size in bytes
pub const BSIZE: usize = 1024;

/// Max number of blocks any single file-system operation writes
pub const MAXOPBLOCKS: usize = 10;

/// Size of the disk block cache
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// Number of hash buckets in the block cache
pub const NBUCKET: usize = 13;

/// Physical page size in bytes
pub const PGSIZE: usize = 4096;

/// Maximum number of cores
pub const NCPU: usize = 8;

/// Pages moved per locked session when a core steals from another
pub const STEAL_BATCH: usize = 128;

/// Pages of simulated physical memory
pub const PHYS_PAGES: usize = 1024;

/// Physical address where simulated RAM starts
pub const PHYS_BASE: u64 = 0x8000_0000;

/// Byte pattern written over a page when it is handed out
pub const ALLOC_FILL: u8 = 0x05;

/// Byte pattern written over a page when it is freed
pub const FREE_FILL: u8 = 0x01;

/// Contents of one disk block
pub type BlockBuf = [u8; BSIZE];

/// Contents of one physical page
pub type PageBuf = [u8; PGSIZE];

/// Rounds `addr` up to the next page boundary
#[inline]
pub const fn pg_round_up(addr: u64) -> u64 {
    (addr + PGSIZE as u64 - 1) & !(PGSIZE as u64 - 1)
}

/// Rounds `addr` down to a page boundary
#[inline]
pub const fn pg_round_down(addr: u64) -> u64 {
    addr & !(PGSIZE as u64 - 1)
}
