//! Segmented concurrent index.
//!
//! An array of independently locked hash tables; a key's segment is
//! picked by its hash, so writers to different segments never interact.
//! The live count is kept in one external atomic updated inside each
//! segment's write-locked section, which keeps `len` linearizable.
//!
//! Segment membership is never persisted: on deserialize every entry is
//! re-hashed into whatever segment it maps to now.

use std::hash::BuildHasher;
use std::sync::atomic::{AtomicUsize, Ordering};

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::index::{
    read_keyed_entry, write_keyed_entry, Entry, Index, KEYED_ENTRY_OVERHEAD,
};
use crate::mem;

struct Segment<K> {
    map: RwLock<HashMap<K, Entry, ahash::RandomState>>,
}

pub struct SegmentedIndex<K> {
    segments: Box<[Segment<K>]>,
    hasher: ahash::RandomState,
    len: AtomicUsize,
}

impl<K: std::hash::Hash + Eq> SegmentedIndex<K> {
    /// `segments` must be a power of two (validated by the config layer).
    pub fn new(segments: u32, capacity: u32) -> Self {
        debug_assert!(segments.is_power_of_two());
        let per_segment = (capacity as usize / segments as usize).max(1);
        SegmentedIndex {
            segments: (0..segments)
                .map(|_| Segment {
                    map: RwLock::new(HashMap::with_capacity_and_hasher(
                        per_segment,
                        ahash::RandomState::new(),
                    )),
                })
                .collect(),
            hasher: ahash::RandomState::new(),
            len: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn segment_of(&self, key: &K) -> &Segment<K> {
        let h = self.hasher.hash_one(key) as usize;
        &self.segments[h & (self.segments.len() - 1)]
    }
}

impl<K> Index<K> for SegmentedIndex<K>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
{
    fn put_and_get_old(&self, key: K, entry: Entry) -> Result<Option<Entry>> {
        let segment = self.segment_of(&key);
        let mut map = segment.map.write();
        let old = map.insert(key, entry);
        if old.is_none() {
            self.len.fetch_add(1, Ordering::SeqCst);
        }
        Ok(old)
    }

    fn get(&self, key: &K) -> Option<Entry> {
        self.segment_of(key).map.read().get(key).copied()
    }

    fn remove_and_get(&self, key: &K) -> Option<Entry> {
        let segment = self.segment_of(key);
        let mut map = segment.map.write();
        let old = map.remove(key);
        if old.is_some() {
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
        old
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    fn clear_with(&self, f: &mut dyn FnMut(Entry)) {
        for segment in self.segments.iter() {
            let mut map = segment.map.write();
            let drained = map.len();
            for (_, entry) in map.drain() {
                f(entry);
            }
            self.len.fetch_sub(drained, Ordering::SeqCst);
        }
    }

    fn for_each(&self, f: &mut dyn FnMut(&K, Entry)) {
        for segment in self.segments.iter() {
            let map = segment.map.read();
            for (key, entry) in map.iter() {
                f(key, *entry);
            }
        }
    }

    fn serialized_size(&self, key_codec: &dyn Codec<K>) -> Result<usize> {
        let mut size = 8; // i32 segment count + i32 total entry count
        for segment in self.segments.iter() {
            let map = segment.map.read();
            for key in map.keys() {
                size += KEYED_ENTRY_OVERHEAD + key_codec.size_of(key)?;
            }
        }
        Ok(size)
    }

    unsafe fn serialize_with_offsets(
        &self,
        addr: u64,
        to_offset: &dyn Fn(u64) -> u64,
        key_codec: &dyn Codec<K>,
    ) -> Result<usize> {
        mem::store::<i32>(addr, self.segments.len() as i32);
        let total_at = addr + 4;
        let mut cursor = addr + 8;
        let mut total = 0i32;
        for segment in self.segments.iter() {
            let map = segment.map.read();
            for (key, entry) in map.iter() {
                write_keyed_entry(&mut cursor, key, *entry, to_offset, key_codec)?;
                total += 1;
            }
        }
        mem::store::<i32>(total_at, total);
        Ok((cursor - addr) as usize)
    }

    unsafe fn deserialize_with_offsets(
        &self,
        addr: u64,
        size: usize,
        to_addr: &dyn Fn(u64) -> u64,
        key_codec: &dyn Codec<K>,
    ) -> Result<()> {
        let persisted_segments = mem::load::<i32>(addr);
        if persisted_segments != self.segments.len() as i32 {
            return Err(Error::IncompatibleIndex(format!(
                "file was written with {persisted_segments} segments, store configured with {}",
                self.segments.len()
            )));
        }
        let count = mem::load::<i32>(addr + 4);
        if count < 0 {
            return Err(Error::IncompatibleFile(format!(
                "serialized index claims {count} entries"
            )));
        }
        let end = addr + size as u64;
        let mut cursor = addr + 8;
        for _ in 0..count {
            if cursor >= end {
                return Err(Error::IncompatibleFile(
                    "serialized index truncated".into(),
                ));
            }
            let (key, entry) = read_keyed_entry(&mut cursor, to_addr, key_codec)?;
            self.put_and_get_old(key, entry)?;
        }
        Ok(())
    }
}
