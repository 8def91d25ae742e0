//! The store façade: composes a codec pair, an allocator, and an index
//! into put/get/remove/clear with failure-safe ordering.
//!
//! The commit point of every mutation is the index's atomic swap. A new
//! value is fully encoded before the index learns its address, and an
//! old address is freed only after the index has stopped referencing
//! it, so a concurrent reader observes either the old locator or the
//! new one and never a torn pair.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::alloc::{Allocator, MmapAllocator, SlabAllocator};
use crate::codec::Codec;
use crate::config::{IndexKind, MmapConfig, OffHeapConfig};
use crate::error::{Error, Result};
use crate::index::{Entry, HashIndex, Index, IndexKey, SegmentedIndex};
use crate::storage::{MmapStorage, OffHeapStorage, Storage};

/// Counters reported by [`RawMap::stats`].
#[derive(Clone, Copy, Debug)]
pub struct StoreStats {
    pub entries: usize,
    pub used_bytes: u64,
    pub capacity_bytes: u64,
}

/// An embedded key-value store holding its values outside the heap, in
/// anonymous native memory or a memory-mapped file.
pub struct RawMap<K: IndexKey, V> {
    index: Box<dyn Index<K>>,
    key_codec: Box<dyn Codec<K>>,
    value_codec: Box<dyn Codec<V>>,
    storage: Storage,
    kind: IndexKind,
    closed: AtomicBool,
}

impl<K: IndexKey, V> std::fmt::Debug for RawMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawMap")
            .field("kind", &self.kind)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

fn build_index<K: IndexKey>(kind: IndexKind, capacity: u32) -> Result<Box<dyn Index<K>>> {
    match kind {
        IndexKind::Hash => Ok(Box::new(HashIndex::new(capacity))),
        IndexKind::Segmented { segments } => {
            Ok(Box::new(SegmentedIndex::new(segments, capacity)))
        }
        IndexKind::LongPrim | IndexKind::IntPrim => {
            K::primitive_index(kind, capacity).ok_or_else(|| {
                Error::Config(format!(
                    "a {} index requires the matching integer key type",
                    kind.name()
                ))
            })
        }
    }
}

impl<K: IndexKey, V> RawMap<K, V> {
    /// Open a store over anonymous off-heap memory.
    pub fn off_heap(
        config: OffHeapConfig,
        key_codec: impl Codec<K> + 'static,
        value_codec: impl Codec<V> + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let index = build_index::<K>(config.index, config.initial_capacity)?;
        debug!(
            max_memory = config.max_memory,
            index = config.index.name(),
            "opening off-heap store"
        );
        Ok(RawMap {
            index,
            key_codec: Box::new(key_codec),
            value_codec: Box::new(value_codec),
            storage: Storage::OffHeap(OffHeapStorage::new(SlabAllocator::new(
                config.max_memory,
            ))),
            kind: config.index,
            closed: AtomicBool::new(false),
        })
    }

    /// Open a store over a memory-mapped file. A persistent file that
    /// was closed gracefully is restored: the saved index is rebuilt
    /// and the bump offset resumes where it stopped.
    pub fn mmap(
        config: MmapConfig,
        key_codec: impl Codec<K> + 'static,
        value_codec: impl Codec<V> + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let index = build_index::<K>(config.index, config.initial_capacity)?;
        let alloc = MmapAllocator::open(&config.mode, config.allocate_size)?;

        if let Some(header) = alloc.restored().copied() {
            if header.index_type != config.index.tag() {
                return Err(Error::IncompatibleIndex(format!(
                    "file holds index type {}, store configured as {}",
                    header.index_type,
                    config.index.name()
                )));
            }
            let mut buf = vec![0u8; header.index_size as usize];
            alloc.read_at(header.index_offset, &mut buf)?;
            // SAFETY: the buffer holds `index_size` bytes written by
            // serialize_with_offsets at the last graceful close.
            unsafe {
                index.deserialize_with_offsets(
                    buf.as_ptr() as u64,
                    buf.len(),
                    &|offset| alloc.addr_of(offset),
                    &key_codec,
                )?;
            }
            if index.len() != header.entry_count as usize {
                return Err(Error::IncompatibleFile(format!(
                    "header records {} entries, index restored {}",
                    header.entry_count,
                    index.len()
                )));
            }
            info!(
                entries = index.len(),
                data_end = header.current_offset,
                "restored persisted store"
            );
        }

        Ok(RawMap {
            index,
            key_codec: Box::new(key_codec),
            value_codec: Box::new(value_codec),
            storage: Storage::Mmap(MmapStorage::new(alloc)),
            kind: config.index,
            closed: AtomicBool::new(false),
        })
    }

    #[inline]
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::AlreadyClosed);
        }
        Ok(())
    }

    /// Insert or update. Returns the value previously stored under
    /// `key`, decoded before its memory is released.
    pub fn put(&self, key: K, value: &V) -> Result<Option<V>> {
        self.ensure_open()?;
        let size = self.value_codec.size_of(value)?;
        let size = u32::try_from(size)
            .map_err(|_| Error::InvalidSize("encoded value exceeds 4 GiB"))?;
        let addr = self.storage.allocate(size)?;

        // SAFETY: `addr` was just allocated for exactly `size` bytes.
        let written = match unsafe { self.value_codec.encode(addr, value) } {
            Ok(n) => n as u32,
            Err(e) => {
                self.storage.free(addr, size);
                return Err(e);
            }
        };
        debug_assert_eq!(written, size);

        let old = match self.index.put_and_get_old(key, Entry { addr, len: written }) {
            Ok(old) => old,
            Err(e) => {
                self.storage.free(addr, size);
                return Err(e);
            }
        };

        match old {
            None => Ok(None),
            Some(prior) => {
                // decode before free: the bytes may be recycled after
                // SAFETY: the index recorded these bytes as one encoded value.
                let value = unsafe {
                    self.value_codec.decode(prior.addr, prior.len as usize)
                };
                self.storage.free(prior.addr, prior.len);
                value.map(Some)
            }
        }
    }

    /// Look up `key`.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.ensure_open()?;
        match self.index.get(key) {
            None => Ok(None),
            // SAFETY: the index only hands out locators of encoded values.
            Some(entry) => unsafe {
                self.value_codec.decode(entry.addr, entry.len as usize).map(Some)
            },
        }
    }

    /// Erase `key`, returning the stored value.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        self.ensure_open()?;
        match self.index.remove_and_get(key) {
            None => Ok(None),
            Some(entry) => {
                // SAFETY: as in `get`; decoded before the free below.
                let value = unsafe {
                    self.value_codec.decode(entry.addr, entry.len as usize)
                };
                self.storage.free(entry.addr, entry.len);
                value.map(Some)
            }
        }
    }

    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.index.contains_key(key))
    }

    /// Live entry count.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.len() == 0
    }

    /// Drop every entry, returning its memory to the allocator in one
    /// pass.
    pub fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        self.index
            .clear_with(&mut |entry| self.storage.free(entry.addr, entry.len));
        Ok(())
    }

    /// Force the backing medium to durable storage. A no-op off-heap.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.storage.flush()
    }

    /// Path of the backing file, for mmap stores.
    pub fn path(&self) -> Option<&std::path::Path> {
        self.storage.mmap().map(|s| s.alloc.path())
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entries: self.index.len(),
            used_bytes: self.storage.used(),
            capacity_bytes: self.storage.total(),
        }
    }

    /// Close the store. For a persistent mmap store this is the graceful
    /// path: the index is serialized at the current data end, the header
    /// written, and the file flushed — the only sequence that produces a
    /// reopenable file. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match &self.storage {
            Storage::Mmap(storage) if !storage.alloc.is_temporary() => {
                self.save_index(&storage.alloc)?;
                storage.flush()?;
                debug!(
                    entries = self.index.len(),
                    data_end = storage.alloc.used(),
                    "closed persistent store"
                );
            }
            Storage::Mmap(_) => {
                // temporary: nothing worth persisting, the file is unlinked below
            }
            Storage::OffHeap(_) => {
                // hand every live block back so close drains the whole pool
                self.index
                    .clear_with(&mut |entry| self.storage.free(entry.addr, entry.len));
            }
        }
        self.index.close();
        self.storage.close();
        Ok(())
    }

    fn save_index(&self, alloc: &MmapAllocator) -> Result<()> {
        let data_end = alloc.used();
        let size = self.index.serialized_size(&*self.key_codec)?;
        let mut buf = vec![0u8; size];
        // SAFETY: the buffer is exactly `serialized_size` bytes.
        let written = unsafe {
            self.index.serialize_with_offsets(
                buf.as_mut_ptr() as u64,
                &|addr| alloc.offset_of(addr),
                &*self.key_codec,
            )?
        };
        alloc.write_at(data_end, &buf[..written])?;
        alloc.write_header(
            self.kind.tag(),
            self.index.len() as u32,
            data_end,
            written as u64,
        );
        Ok(())
    }
}

impl<K: IndexKey, V> Drop for RawMap<K, V> {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            if let Err(e) = self.close() {
                warn!(error = %e, "store close during drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{I64Codec, StringCodec};
    use crate::config::{IndexKind, OffHeapConfig};

    fn long_store(kind: IndexKind) -> RawMap<i64, i64> {
        RawMap::off_heap(
            OffHeapConfig {
                max_memory: 1 << 20,
                index: kind,
                initial_capacity: 16,
            },
            I64Codec,
            I64Codec,
        )
        .unwrap()
    }

    #[test]
    fn put_get_remove_cycle() {
        let map = long_store(IndexKind::LongPrim);
        assert_eq!(map.put(1, &100).unwrap(), None);
        assert_eq!(map.put(2, &200).unwrap(), None);
        assert_eq!(map.put(1, &150).unwrap(), Some(100));
        assert_eq!(map.get(&1).unwrap(), Some(150));
        assert_eq!(map.get(&2).unwrap(), Some(200));
        assert_eq!(map.get(&3).unwrap(), None);
        assert_eq!(map.remove(&2).unwrap(), Some(200));
        assert_eq!(map.len(), 1);
        assert!(!map.contains_key(&2).unwrap());
        map.close().unwrap();
    }

    #[test]
    fn clear_returns_memory_to_the_pool() {
        let map = long_store(IndexKind::Hash);
        let baseline = map.stats().used_bytes;
        for k in 1..=100i64 {
            map.put(k, &(k * 10)).unwrap();
        }
        assert!(map.stats().used_bytes > baseline);
        map.clear().unwrap();
        assert_eq!(map.stats().used_bytes, baseline);
        assert!(map.is_empty());
    }

    #[test]
    fn string_store_with_segmented_index() {
        let map: RawMap<String, String> = RawMap::off_heap(
            OffHeapConfig {
                index: IndexKind::Segmented { segments: 64 },
                ..OffHeapConfig::default()
            },
            StringCodec,
            StringCodec,
        )
        .unwrap();
        assert_eq!(map.put("hello".into(), &"world".into()).unwrap(), None);
        assert_eq!(
            map.put("hello".into(), &"HELLO".into()).unwrap(),
            Some("world".into())
        );
        assert_eq!(map.get(&"hello".into()).unwrap(), Some("HELLO".into()));
        assert_eq!(map.len(), 1);
        assert_eq!(map.remove(&"missing".into()).unwrap(), None);
        map.close().unwrap();
    }

    #[test]
    fn operations_fail_after_close() {
        let map = long_store(IndexKind::Hash);
        map.put(1, &1).unwrap();
        map.close().unwrap();
        assert!(matches!(map.put(2, &2), Err(Error::AlreadyClosed)));
        assert!(matches!(map.get(&1), Err(Error::AlreadyClosed)));
        assert!(matches!(map.close(), Ok(())));
    }

    #[test]
    fn primitive_index_requires_matching_key_type() {
        let result: Result<RawMap<String, i64>> = RawMap::off_heap(
            OffHeapConfig {
                index: IndexKind::LongPrim,
                ..OffHeapConfig::default()
            },
            StringCodec,
            I64Codec,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn sentinel_put_fails_without_leaking() {
        let map = long_store(IndexKind::LongPrim);
        let before = map.stats().used_bytes;
        assert!(matches!(map.put(0, &1), Err(Error::InvalidKey(_))));
        assert_eq!(map.stats().used_bytes, before);
        map.close().unwrap();
    }

    #[test]
    fn out_of_space_reports_and_preserves_state() {
        let map: RawMap<i64, i64> = RawMap::off_heap(
            OffHeapConfig {
                max_memory: 40,
                index: IndexKind::Hash,
                initial_capacity: 16,
            },
            I64Codec,
            I64Codec,
        )
        .unwrap();
        map.put(1, &1).unwrap(); // one 16-byte class block
        map.put(2, &2).unwrap();
        let err = map.put(3, &3).unwrap_err();
        assert!(matches!(err, Error::OutOfSpace { .. }));
        assert_eq!(map.get(&1).unwrap(), Some(1));
        assert_eq!(map.len(), 2);
        map.close().unwrap();
    }
}
