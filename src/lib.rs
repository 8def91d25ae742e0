//! rawmap — an embedded key-value store holding very large working sets
//! outside the heap.
//!
//! Values live in a byte-addressable region: anonymous native memory
//! behind a size-classed slab allocator, or a memory-mapped file behind
//! a bump allocator. A pluggable index maps each key to the
//! `(address, size)` locator of its encoded value. Persistent mmap
//! stores write a header and a relative-offset index image on graceful
//! close, so a cold process re-attaches without rescanning values.
//!
//! ```no_run
//! use rawmap::{codec::I64Codec, IndexKind, OffHeapConfig, RawMap};
//!
//! # fn main() -> rawmap::Result<()> {
//! let map: RawMap<i64, i64> = RawMap::off_heap(
//!     OffHeapConfig {
//!         index: IndexKind::LongPrim,
//!         ..OffHeapConfig::default()
//!     },
//!     I64Codec,
//!     I64Codec,
//! )?;
//! map.put(1, &100)?;
//! assert_eq!(map.get(&1)?, Some(100));
//! map.close()?;
//! # Ok(())
//! # }
//! ```

pub mod alloc;
pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod map;
pub mod mem;
pub mod storage;

pub use codec::Codec;
pub use config::{IndexKind, MmapConfig, MmapMode, OffHeapConfig};
pub use error::{Error, Result};
pub use index::{Entry, Index, IndexKey};
pub use map::{RawMap, StoreStats};
