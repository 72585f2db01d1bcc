//! In-memory block device
//!
//! Blocks never written read back as zeros. Every transfer is counted, per
//! block as well as in total, so callers can see exactly how often the
//! cache went to the device. An optional per-read delay stands in for disk
//! latency.

use crate::disk::error::{DiskError, DiskResult};
use crate::disk::BlockDevice;
use crate::types::{BSIZE, BlockBuf, BlockNo, DeviceId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct Slot {
    data: Option<Box<BlockBuf>>,
    reads: u64,
    writes: u64,
}

pub struct MemDisk {
    nblocks: BlockNo,
    slots: Mutex<HashMap<(DeviceId, BlockNo), Slot>>,
    reads: AtomicU64,
    writes: AtomicU64,
    latency: Duration,
}

impl MemDisk {
    /// A device of `nblocks` blocks per device number
    pub fn new(nblocks: BlockNo) -> Self {
        Self::with_latency(nblocks, Duration::ZERO)
    }

    /// Like [`MemDisk::new`], sleeping `latency` on every read
    pub fn with_latency(nblocks: BlockNo, latency: Duration) -> Self {
        Self {
            nblocks,
            slots: Mutex::new(HashMap::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            latency,
        }
    }

    /// Stores a block without counting a transfer
    pub fn poke(&self, dev: DeviceId, blockno: BlockNo, buf: &BlockBuf) {
        let mut slots = self.slots.lock();
        slots.entry((dev, blockno)).or_default().data = Some(Box::new(*buf));
    }

    /// Copies a block out without counting a transfer
    pub fn peek(&self, dev: DeviceId, blockno: BlockNo) -> Box<BlockBuf> {
        let slots = self.slots.lock();
        match slots.get(&(dev, blockno)).and_then(|s| s.data.as_ref()) {
            Some(data) => data.clone(),
            None => Box::new([0u8; BSIZE]),
        }
    }

    /// Total device reads
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Total device writes
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Reads of one block
    pub fn reads_of(&self, dev: DeviceId, blockno: BlockNo) -> u64 {
        self.slots
            .lock()
            .get(&(dev, blockno))
            .map_or(0, |s| s.reads)
    }

    /// Writes of one block
    pub fn writes_of(&self, dev: DeviceId, blockno: BlockNo) -> u64 {
        self.slots
            .lock()
            .get(&(dev, blockno))
            .map_or(0, |s| s.writes)
    }

    fn check(&self, dev: DeviceId, blockno: BlockNo) -> DiskResult<()> {
        if blockno >= self.nblocks {
            return Err(DiskError::OutOfRange { dev, blockno });
        }
        Ok(())
    }
}

impl BlockDevice for MemDisk {
    fn read(&self, dev: DeviceId, blockno: BlockNo, buf: &mut BlockBuf) -> DiskResult<()> {
        self.check(dev, blockno)?;
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        let mut slots = self.slots.lock();
        let slot = slots.entry((dev, blockno)).or_default();
        match &slot.data {
            Some(data) => buf.copy_from_slice(&data[..]),
            None => buf.fill(0),
        }
        slot.reads += 1;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write(&self, dev: DeviceId, blockno: BlockNo, buf: &BlockBuf) -> DiskResult<()> {
        self.check(dev, blockno)?;
        let mut slots = self.slots.lock();
        let slot = slots.entry((dev, blockno)).or_default();
        match &mut slot.data {
            Some(data) => data.copy_from_slice(buf),
            None => slot.data = Some(Box::new(*buf)),
        }
        slot.writes += 1;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
