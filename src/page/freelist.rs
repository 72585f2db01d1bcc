//! Intrusive free lists over frame indices
//!
//! The `next` link of every frame lives in one shared array owned by the
//! allocator. A frame is on at most one list at a time, and only the holder
//! of that list (or of a detached list) touches its link.

use std::sync::atomic::{AtomicUsize, Ordering};

/// End of a list
pub(crate) const NIL: usize = usize::MAX;

#[derive(Debug)]
pub(crate) struct FreeList {
    head: usize,
    tail: usize,
    len: usize,
}

impl FreeList {
    pub const fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == NIL
    }

    pub fn push(&mut self, links: &[AtomicUsize], idx: usize) {
        links[idx].store(self.head, Ordering::Relaxed);
        if self.tail == NIL {
            self.tail = idx;
        }
        self.head = idx;
        self.len += 1;
    }

    pub fn pop(&mut self, links: &[AtomicUsize]) -> Option<usize> {
        if self.head == NIL {
            return None;
        }
        let idx = self.head;
        self.head = links[idx].swap(NIL, Ordering::Relaxed);
        if self.head == NIL {
            self.tail = NIL;
        }
        self.len -= 1;
        Some(idx)
    }

    /// Splices `other` in front of this list in O(1)
    pub fn append(&mut self, links: &[AtomicUsize], other: FreeList) {
        if other.is_empty() {
            return;
        }
        links[other.tail].store(self.head, Ordering::Relaxed);
        if self.tail == NIL {
            self.tail = other.tail;
        }
        self.head = other.head;
        self.len += other.len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(n: usize) -> Box<[AtomicUsize]> {
        (0..n).map(|_| AtomicUsize::new(NIL)).collect()
    }

    #[test]
    fn test_push_pop_lifo() {
        let links = links(4);
        let mut list = FreeList::new();
        assert!(list.pop(&links).is_none());
        list.push(&links, 0);
        list.push(&links, 3);
        assert_eq!(list.len(), 2);
        assert_eq!(list.pop(&links), Some(3));
        assert_eq!(list.pop(&links), Some(0));
        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_append() {
        let links = links(6);
        let mut a = FreeList::new();
        a.push(&links, 0);
        a.push(&links, 1);
        let mut b = FreeList::new();
        b.push(&links, 4);
        b.push(&links, 5);
        a.append(&links, b);
        assert_eq!(a.len(), 4);

        let mut order = Vec::new();
        while let Some(idx) = a.pop(&links) {
            order.push(idx);
        }
        assert_eq!(order, vec![5, 4, 1, 0]);

        // appending onto an empty list keeps the tail usable
        let mut c = FreeList::new();
        let mut d = FreeList::new();
        d.push(&links, 2);
        c.append(&links, d);
        c.append(&links, FreeList::new());
        c.push(&links, 3);
        assert_eq!(c.pop(&links), Some(3));
        assert_eq!(c.pop(&links), Some(2));
        assert!(c.pop(&links).is_none());
    }
}
