//! Size-classed slab allocator over anonymous native memory.
//!
//! Each size class owns a lock-free list of addresses previously freed at
//! that class; a request takes the smallest class that fits. Requests
//! above the top class bypass the pool entirely and are tracked at their
//! exact size.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::SegQueue;

use crate::alloc::Allocator;
use crate::error::{Error, Result};
use crate::mem;

/// Block sizes the pool rounds requests up to, ascending.
pub const SIZE_CLASSES: [u32; 6] = [16, 64, 256, 1024, 4096, 16384];

/// Index of the smallest class that fits `size`, or `None` for oversize.
#[inline]
fn class_of(size: u32) -> Option<usize> {
    SIZE_CLASSES.iter().position(|&c| size <= c)
}

pub struct SlabAllocator {
    limit: u64,
    used: AtomicU64,
    free_lists: [SegQueue<u64>; SIZE_CLASSES.len()],
}

impl SlabAllocator {
    pub fn new(limit: u64) -> Self {
        SlabAllocator {
            limit,
            used: AtomicU64::new(0),
            free_lists: std::array::from_fn(|_| SegQueue::new()),
        }
    }

    /// Reserve `bytes` against the limit, failing without side effects
    /// when the limit would be exceeded.
    fn reserve(&self, bytes: u64) -> Result<()> {
        let prior = self.used.fetch_add(bytes, Ordering::SeqCst);
        if prior + bytes > self.limit {
            self.used.fetch_sub(bytes, Ordering::SeqCst);
            return Err(Error::OutOfSpace {
                requested: bytes,
                available: self.limit.saturating_sub(prior),
            });
        }
        Ok(())
    }
}

impl Allocator for SlabAllocator {
    fn allocate(&self, size: u32) -> Result<u64> {
        if size == 0 {
            return Err(Error::InvalidSize("zero-byte allocation"));
        }
        match class_of(size) {
            Some(class) => {
                let block = u64::from(SIZE_CLASSES[class]);
                self.reserve(block)?;
                if let Some(addr) = self.free_lists[class].pop() {
                    return Ok(addr);
                }
                match mem::alloc(block as usize) {
                    Ok(addr) => Ok(addr),
                    Err(e) => {
                        self.used.fetch_sub(block, Ordering::SeqCst);
                        Err(e)
                    }
                }
            }
            None => {
                // oversize: exact-size allocation, never pooled
                self.reserve(u64::from(size))?;
                match mem::alloc(size as usize) {
                    Ok(addr) => Ok(addr),
                    Err(e) => {
                        self.used.fetch_sub(u64::from(size), Ordering::SeqCst);
                        Err(e)
                    }
                }
            }
        }
    }

    fn free(&self, addr: u64, size: u32) {
        debug_assert_ne!(addr, 0);
        match class_of(size) {
            Some(class) => {
                self.free_lists[class].push(addr);
                self.used
                    .fetch_sub(u64::from(SIZE_CLASSES[class]), Ordering::SeqCst);
            }
            None => {
                unsafe { mem::dealloc(addr) };
                self.used.fetch_sub(u64::from(size), Ordering::SeqCst);
            }
        }
    }

    fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    fn total(&self) -> u64 {
        self.limit
    }

    fn close(&self) {
        for list in &self.free_lists {
            while let Some(addr) = list.pop() {
                unsafe { mem::dealloc(addr) };
            }
        }
    }
}

impl Drop for SlabAllocator {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_smallest_fitting_class() {
        assert_eq!(class_of(1), Some(0));
        assert_eq!(class_of(16), Some(0));
        assert_eq!(class_of(17), Some(1));
        assert_eq!(class_of(16384), Some(5));
        assert_eq!(class_of(16385), None);
    }

    #[test]
    fn conservation_over_alloc_free_sequences() {
        let slab = SlabAllocator::new(1 << 20);
        let mut live = Vec::new();
        for size in [1u32, 16, 17, 100, 1000, 5000, 16384] {
            live.push((slab.allocate(size).unwrap(), size));
        }
        let peak = slab.used();
        assert!(peak > 0);
        for (addr, size) in live.drain(..) {
            slab.free(addr, size);
        }
        assert_eq!(slab.used(), 0);
        slab.close();
        assert_eq!(slab.used(), 0);
    }

    #[test]
    fn recycles_freed_blocks_of_the_same_class() {
        let slab = SlabAllocator::new(1 << 20);
        let a = slab.allocate(50).unwrap();
        slab.free(a, 50);
        // 40 rounds to the same 64-byte class, so the block comes back
        let b = slab.allocate(40).unwrap();
        assert_eq!(a, b);
        slab.free(b, 40);
    }

    #[test]
    fn oversize_is_tracked_at_exact_size() {
        let slab = SlabAllocator::new(1 << 20);
        let addr = slab.allocate(100_000).unwrap();
        assert_eq!(slab.used(), 100_000);
        slab.free(addr, 100_000);
        assert_eq!(slab.used(), 0);
    }

    #[test]
    fn limit_is_enforced_without_side_effects() {
        let slab = SlabAllocator::new(100);
        let a = slab.allocate(60).unwrap(); // 64-byte class
        let before = slab.used();
        assert!(matches!(
            slab.allocate(60),
            Err(Error::OutOfSpace { .. })
        ));
        assert_eq!(slab.used(), before);
        slab.free(a, 60);
    }

    #[test]
    fn zero_size_is_invalid() {
        let slab = SlabAllocator::new(1 << 20);
        assert!(matches!(slab.allocate(0), Err(Error::InvalidSize(_))));
    }

    #[test]
    fn never_returns_zero() {
        let slab = SlabAllocator::new(1 << 20);
        for size in [1u32, 64, 20_000] {
            let addr = slab.allocate(size).unwrap();
            assert_ne!(addr, 0);
            slab.free(addr, size);
        }
    }
}
