//! Storage engines bind an allocator to its backing medium.
//!
//! The allocator manages addresses; the engine owns the medium — it
//! knows whether `flush` means anything and what closing releases.

use crate::alloc::{Allocator, MmapAllocator, SlabAllocator};
use crate::error::Result;

pub struct OffHeapStorage {
    pub alloc: SlabAllocator,
}

impl OffHeapStorage {
    pub fn new(alloc: SlabAllocator) -> Self {
        OffHeapStorage { alloc }
    }

    pub fn flush(&self) -> Result<()> {
        Ok(())
    }

    pub fn close(&self) {
        self.alloc.close();
    }
}

pub struct MmapStorage {
    pub alloc: MmapAllocator,
}

impl MmapStorage {
    pub fn new(alloc: MmapAllocator) -> Self {
        MmapStorage { alloc }
    }

    pub fn flush(&self) -> Result<()> {
        self.alloc.flush()
    }

    pub fn close(&self) {
        self.alloc.close();
    }
}

/// The backend actually wired into a store.
pub(crate) enum Storage {
    OffHeap(OffHeapStorage),
    Mmap(MmapStorage),
}

impl Storage {
    pub fn allocate(&self, size: u32) -> Result<u64> {
        match self {
            Storage::OffHeap(s) => s.alloc.allocate(size),
            Storage::Mmap(s) => s.alloc.allocate(size),
        }
    }

    pub fn free(&self, addr: u64, size: u32) {
        match self {
            Storage::OffHeap(s) => s.alloc.free(addr, size),
            Storage::Mmap(s) => s.alloc.free(addr, size),
        }
    }

    pub fn used(&self) -> u64 {
        match self {
            Storage::OffHeap(s) => s.alloc.used(),
            Storage::Mmap(s) => s.alloc.used(),
        }
    }

    pub fn total(&self) -> u64 {
        match self {
            Storage::OffHeap(s) => s.alloc.total(),
            Storage::Mmap(s) => s.alloc.total(),
        }
    }

    pub fn flush(&self) -> Result<()> {
        match self {
            Storage::OffHeap(s) => s.flush(),
            Storage::Mmap(s) => s.flush(),
        }
    }

    pub fn close(&self) {
        match self {
            Storage::OffHeap(s) => s.close(),
            Storage::Mmap(s) => s.close(),
        }
    }

    pub fn mmap(&self) -> Option<&MmapStorage> {
        match self {
            Storage::Mmap(s) => Some(s),
            Storage::OffHeap(_) => None,
        }
    }
}
