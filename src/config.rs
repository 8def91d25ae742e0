//! Configuration records for the two store backends.
//!
//! These are plain data: each constructor on [`crate::RawMap`] takes one,
//! validates it, and fails with [`Error::Config`] on nonsense.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Default off-heap memory limit: 1 GiB.
pub const DEFAULT_MAX_MEMORY: u64 = 1 << 30;

/// Default mmap file allocation size: 10 GiB.
pub const DEFAULT_ALLOCATE_SIZE: u64 = 10 << 30;

/// Default segment count for [`IndexKind::Segmented`].
pub const DEFAULT_SEGMENTS: u32 = 64;

/// Default initial index capacity. Primitive variants round this up to
/// the next power of two.
pub const DEFAULT_INITIAL_CAPACITY: u32 = 16;

/// Which index implementation backs the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    /// Single concurrent hash table.
    Hash,
    /// Hash table split into independently locked segments.
    Segmented {
        /// Segment count; must be a power of two.
        segments: u32,
    },
    /// Open-addressed parallel arrays keyed by `i64`.
    LongPrim,
    /// Open-addressed parallel arrays keyed by `i32`.
    IntPrim,
}

impl IndexKind {
    /// Numeric tag persisted in the file header.
    pub(crate) fn tag(self) -> u32 {
        match self {
            IndexKind::Hash => 0,
            IndexKind::Segmented { .. } => 1,
            IndexKind::LongPrim => 2,
            IndexKind::IntPrim => 3,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            IndexKind::Hash => "hash",
            IndexKind::Segmented { .. } => "segmented",
            IndexKind::LongPrim => "long-primitive",
            IndexKind::IntPrim => "int-primitive",
        }
    }

    fn validate(self) -> Result<()> {
        if let IndexKind::Segmented { segments } = self {
            if segments == 0 || !segments.is_power_of_two() {
                return Err(Error::Config(format!(
                    "segment count must be a power of two, got {segments}"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for the anonymous off-heap backend.
#[derive(Clone, Debug)]
pub struct OffHeapConfig {
    /// Upper bound on bytes handed out by the slab allocator.
    pub max_memory: u64,
    /// Index variant.
    pub index: IndexKind,
    /// Initial index capacity.
    pub initial_capacity: u32,
}

impl Default for OffHeapConfig {
    fn default() -> Self {
        OffHeapConfig {
            max_memory: DEFAULT_MAX_MEMORY,
            index: IndexKind::Segmented {
                segments: DEFAULT_SEGMENTS,
            },
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        }
    }
}

impl OffHeapConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_memory == 0 {
            return Err(Error::Config("max_memory must be at least 1".into()));
        }
        self.index.validate()
    }
}

/// Where the mmap backend keeps its file.
#[derive(Clone, Debug)]
pub enum MmapMode {
    /// A named file that survives graceful close and can be reopened.
    Persistent(PathBuf),
    /// A generated file in the OS temp directory, unlinked on close.
    /// No header is read or written.
    Temporary,
}

/// Configuration for the memory-mapped backend.
#[derive(Clone, Debug)]
pub struct MmapConfig {
    /// Backing file mode.
    pub mode: MmapMode,
    /// File size to allocate (and map) up front.
    pub allocate_size: u64,
    /// Index variant.
    pub index: IndexKind,
    /// Initial index capacity.
    pub initial_capacity: u32,
}

impl MmapConfig {
    /// Persistent-mode config with defaults for everything but the path.
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        MmapConfig {
            mode: MmapMode::Persistent(path.into()),
            allocate_size: DEFAULT_ALLOCATE_SIZE,
            index: IndexKind::Segmented {
                segments: DEFAULT_SEGMENTS,
            },
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        }
    }

    /// Temporary-mode config with a generated path.
    pub fn temporary() -> Self {
        MmapConfig {
            mode: MmapMode::Temporary,
            allocate_size: DEFAULT_ALLOCATE_SIZE,
            index: IndexKind::Segmented {
                segments: DEFAULT_SEGMENTS,
            },
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.allocate_size == 0 {
            return Err(Error::Config("allocate_size must be at least 1".into()));
        }
        self.index.validate()
    }
}
