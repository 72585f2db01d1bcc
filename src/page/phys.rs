//! Simulated physical memory
//!
//! A page-aligned run of frames starting at a fixed physical base address.
//! Each frame sits behind its own reader-writer lock.

use crate::types::{PGSIZE, PageBuf, pg_round_down, pg_round_up};
use parking_lot::RwLock;
use std::fmt;

/// Physical address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_page_aligned(self) -> bool {
        self.0 % PGSIZE as u64 == 0
    }

    #[inline]
    pub fn page_round_up(self) -> Self {
        PhysAddr(pg_round_up(self.0))
    }

    #[inline]
    pub fn page_round_down(self) -> Self {
        PhysAddr(pg_round_down(self.0))
    }

    /// Address `n` bytes above this one
    #[inline]
    pub fn offset(self, n: u64) -> Self {
        PhysAddr(self.0 + n)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

pub struct PhysMemory {
    base: u64,
    frames: Box<[RwLock<Box<PageBuf>>]>,
}

impl PhysMemory {
    /// `npages` zeroed frames starting at the page-aligned `base`
    pub fn new(base: u64, npages: usize) -> Self {
        let frames = (0..npages)
            .map(|_| RwLock::new(Box::new([0u8; PGSIZE])))
            .collect();
        Self { base, frames }
    }

    #[inline]
    pub fn base(&self) -> PhysAddr {
        PhysAddr(self.base)
    }

    /// First address past the last frame
    #[inline]
    pub fn end(&self) -> PhysAddr {
        PhysAddr(self.base + (self.frames.len() * PGSIZE) as u64)
    }

    #[inline]
    pub fn npages(&self) -> usize {
        self.frames.len()
    }

    /// Frame index of a page-aligned address inside the region
    pub fn index_of(&self, pa: PhysAddr) -> Option<usize> {
        if !pa.is_page_aligned() || pa < self.base() || pa >= self.end() {
            return None;
        }
        Some(((pa.0 - self.base) / PGSIZE as u64) as usize)
    }

    #[inline]
    pub fn addr_of(&self, idx: usize) -> PhysAddr {
        PhysAddr(self.base + (idx * PGSIZE) as u64)
    }

    #[inline]
    pub fn frame(&self, idx: usize) -> &RwLock<Box<PageBuf>> {
        &self.frames[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_and_addr() {
        let mem = PhysMemory::new(0x8000_0000, 4);
        assert_eq!(mem.end(), PhysAddr(0x8000_4000));
        assert_eq!(mem.index_of(PhysAddr(0x8000_0000)), Some(0));
        assert_eq!(mem.index_of(PhysAddr(0x8000_3000)), Some(3));
        assert_eq!(mem.addr_of(2), PhysAddr(0x8000_2000));
        assert_eq!(mem.index_of(PhysAddr(0x8000_4000)), None);
        assert_eq!(mem.index_of(PhysAddr(0x8000_0010)), None);
        assert_eq!(mem.index_of(PhysAddr(0x7fff_f000)), None);
    }

    #[test]
    fn test_rounding_and_display() {
        let pa = PhysAddr(0x8000_0001);
        assert_eq!(pa.page_round_up(), PhysAddr(0x8000_1000));
        assert_eq!(pa.page_round_down(), PhysAddr(0x8000_0000));
        assert_eq!(pa.offset(0xfff), PhysAddr(0x8000_1000));
        assert_eq!(PhysAddr(0x8000_1000).to_string(), "0x80001000");
    }
}
