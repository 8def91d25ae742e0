//! Single-table concurrent index.
//!
//! A hash table behind one read-write lock; locators are small copies,
//! so every operation holds the lock only for the table touch. The
//! atomic forms are single critical sections by construction.

use std::sync::atomic::{AtomicUsize, Ordering};

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::index::{
    read_keyed_entry, write_keyed_entry, Entry, Index, KEYED_ENTRY_OVERHEAD,
};
use crate::mem;

pub struct HashIndex<K> {
    map: RwLock<HashMap<K, Entry, ahash::RandomState>>,
    len: AtomicUsize,
}

impl<K: std::hash::Hash + Eq> HashIndex<K> {
    pub fn new(capacity: u32) -> Self {
        HashIndex {
            map: RwLock::new(HashMap::with_capacity_and_hasher(
                capacity as usize,
                ahash::RandomState::new(),
            )),
            len: AtomicUsize::new(0),
        }
    }
}

impl<K> Index<K> for HashIndex<K>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
{
    fn put_and_get_old(&self, key: K, entry: Entry) -> Result<Option<Entry>> {
        let mut map = self.map.write();
        let old = map.insert(key, entry);
        if old.is_none() {
            self.len.fetch_add(1, Ordering::SeqCst);
        }
        Ok(old)
    }

    fn get(&self, key: &K) -> Option<Entry> {
        self.map.read().get(key).copied()
    }

    fn remove_and_get(&self, key: &K) -> Option<Entry> {
        let mut map = self.map.write();
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
        let mut map = self.map.write();
        for (_, entry) in map.drain() {
            f(entry);
        }
        self.len.store(0, Ordering::SeqCst);
    }

    fn for_each(&self, f: &mut dyn FnMut(&K, Entry)) {
        let map = self.map.read();
        for (key, entry) in map.iter() {
            f(key, *entry);
        }
    }

    fn serialized_size(&self, key_codec: &dyn Codec<K>) -> Result<usize> {
        let map = self.map.read();
        let mut size = 4; // i32 entry count
        for key in map.keys() {
            size += KEYED_ENTRY_OVERHEAD + key_codec.size_of(key)?;
        }
        Ok(size)
    }

    unsafe fn serialize_with_offsets(
        &self,
        addr: u64,
        to_offset: &dyn Fn(u64) -> u64,
        key_codec: &dyn Codec<K>,
    ) -> Result<usize> {
        let map = self.map.read();
        mem::store::<i32>(addr, map.len() as i32);
        let mut cursor = addr + 4;
        for (key, entry) in map.iter() {
            write_keyed_entry(&mut cursor, key, *entry, to_offset, key_codec)?;
        }
        Ok((cursor - addr) as usize)
    }

    unsafe fn deserialize_with_offsets(
        &self,
        addr: u64,
        size: usize,
        to_addr: &dyn Fn(u64) -> u64,
        key_codec: &dyn Codec<K>,
    ) -> Result<()> {
        let count = mem::load::<i32>(addr);
        if count < 0 {
            return Err(Error::IncompatibleFile(format!(
                "serialized index claims {count} entries"
            )));
        }
        let end = addr + size as u64;
        let mut cursor = addr + 4;
        let mut map = self.map.write();
        for _ in 0..count {
            if cursor >= end {
                return Err(Error::IncompatibleFile(
                    "serialized index truncated".into(),
                ));
            }
            let (key, entry) = read_keyed_entry(&mut cursor, to_addr, key_codec)?;
            map.insert(key, entry);
        }
        self.len.store(map.len(), Ordering::SeqCst);
        Ok(())
    }
}
