//! Index variants: map a user key to the `(address, size)` locator of
//! its encoded value.
//!
//! The index is the store's only synchronization object. The operations
//! that matter are the atomic forms — `put_and_get_old` and
//! `remove_and_get` — which read the prior locator and install (or
//! erase) the new one inside a single critical section, so the store can
//! free old memory strictly after the index stops referencing it.

pub mod hash;
pub mod primitive;
pub mod segmented;
pub mod stamped;

pub use hash::HashIndex;
pub use primitive::{IntIndex, LongIndex};
pub use segmented::SegmentedIndex;

use crate::codec::Codec;
use crate::config::IndexKind;
use crate::error::{Error, Result};
use crate::mem;

/// Locator of one encoded value inside the region.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Entry {
    /// Address where the encoded value begins. Never 0.
    pub addr: u64,
    /// Exact byte count the codec wrote.
    pub len: u32,
}

/// Common contract for every index variant.
pub trait Index<K>: Send + Sync {
    /// Atomically install `entry` under `key`, returning the prior
    /// locator if the key was present. The caller frees the prior
    /// address after this returns.
    fn put_and_get_old(&self, key: K, entry: Entry) -> Result<Option<Entry>>;

    /// Non-atomic form kept for single-threaded callers; returns the
    /// prior address or 0. Concurrent mutators must use
    /// [`Index::put_and_get_old`].
    fn put(&self, key: K, entry: Entry) -> Result<u64> {
        Ok(self.put_and_get_old(key, entry)?.map_or(0, |e| e.addr))
    }

    /// Current locator for `key`.
    fn get(&self, key: &K) -> Option<Entry>;

    /// Address for `key`, 0 when absent.
    fn get_addr(&self, key: &K) -> u64 {
        self.get(key).map_or(0, |e| e.addr)
    }

    /// Value size for `key`, -1 when absent.
    fn get_size(&self, key: &K) -> i32 {
        self.get(key).map_or(-1, |e| e.len as i32)
    }

    /// Atomically erase `key`, returning its locator for the caller to
    /// free.
    fn remove_and_get(&self, key: &K) -> Option<Entry>;

    /// Erase `key`; returns the prior address or 0.
    fn remove(&self, key: &K) -> u64 {
        self.remove_and_get(key).map_or(0, |e| e.addr)
    }

    fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Live entry count. Linearizable: maintained inside each write
    /// critical section.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    fn clear(&self) {
        self.clear_with(&mut |_| {});
    }

    /// Invoke `f` on every live locator, then drop all entries. Lets the
    /// caller free off-heap memory in one pass.
    fn clear_with(&self, f: &mut dyn FnMut(Entry));

    /// Visit every live entry.
    fn for_each(&self, f: &mut dyn FnMut(&K, Entry));

    /// Byte length of the serialized form.
    fn serialized_size(&self, key_codec: &dyn Codec<K>) -> Result<usize>;

    /// Write the index at `addr`, recording each address as the region
    /// offset `to_offset` maps it to. Returns bytes written.
    ///
    /// # Safety
    /// `addr` must be writable for `serialized_size` bytes.
    unsafe fn serialize_with_offsets(
        &self,
        addr: u64,
        to_offset: &dyn Fn(u64) -> u64,
        key_codec: &dyn Codec<K>,
    ) -> Result<usize>;

    /// Rebuild entries from a serialized form at `addr`, mapping each
    /// stored offset back to an address via `to_addr`.
    ///
    /// # Safety
    /// `addr` must be readable for `size` bytes previously produced by
    /// `serialize_with_offsets` on the same variant.
    unsafe fn deserialize_with_offsets(
        &self,
        addr: u64,
        size: usize,
        to_addr: &dyn Fn(u64) -> u64,
        key_codec: &dyn Codec<K>,
    ) -> Result<()>;

    /// Release auxiliary resources. Idempotent; the default does
    /// nothing because most variants release on drop.
    fn close(&self) {}
}

/// Keys usable with the store. Hash variants accept any implementor;
/// the primitive variants are only constructible for `i64` / `i32`,
/// which override [`IndexKey::primitive_index`].
pub trait IndexKey: std::hash::Hash + Eq + Clone + Send + Sync + 'static {
    /// Build a primitive index for this key type, if the variant
    /// applies to it.
    fn primitive_index(kind: IndexKind, capacity: u32) -> Option<Box<dyn Index<Self>>> {
        let _ = (kind, capacity);
        None
    }
}

impl IndexKey for String {}
impl IndexKey for Vec<u8> {}
impl IndexKey for i8 {}
impl IndexKey for i16 {}
impl IndexKey for u8 {}
impl IndexKey for u16 {}
impl IndexKey for u32 {}
impl IndexKey for u64 {}

impl IndexKey for i64 {
    fn primitive_index(kind: IndexKind, capacity: u32) -> Option<Box<dyn Index<Self>>> {
        match kind {
            IndexKind::LongPrim => Some(Box::new(LongIndex::new(capacity))),
            _ => None,
        }
    }
}

impl IndexKey for i32 {
    fn primitive_index(kind: IndexKind, capacity: u32) -> Option<Box<dyn Index<Self>>> {
        match kind {
            IndexKind::IntPrim => Some(Box::new(IntIndex::new(capacity))),
            _ => None,
        }
    }
}

/// MurmurHash3 64-bit finalizer.
#[inline]
pub(crate) fn mix64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;
    x
}

/// 32-bit avalanche mix.
#[inline]
pub(crate) fn mix32(mut x: u32) -> u32 {
    x ^= x >> 16;
    x = x.wrapping_mul(0x85eb_ca6b);
    x ^= x >> 13;
    x = x.wrapping_mul(0xc2b2_ae35);
    x ^= x >> 16;
    x
}

/// Per-entry serialized footprint beyond the key bytes: i32 key length,
/// i64 relative offset, i32 value size.
pub(crate) const KEYED_ENTRY_OVERHEAD: usize = 16;

/// Write one `[i32 key_len][key][i64 offset][i32 size]` record.
///
/// # Safety
/// `cursor` must be writable for the record's full footprint.
pub(crate) unsafe fn write_keyed_entry<K>(
    cursor: &mut u64,
    key: &K,
    entry: Entry,
    to_offset: &dyn Fn(u64) -> u64,
    key_codec: &dyn Codec<K>,
) -> Result<()> {
    let key_size = key_codec.size_of(key)?;
    mem::store::<i32>(*cursor, key_size as i32);
    *cursor += 4;
    let written = key_codec.encode(*cursor, key)?;
    *cursor += written as u64;
    mem::store::<i64>(*cursor, to_offset(entry.addr) as i64);
    *cursor += 8;
    mem::store::<i32>(*cursor, entry.len as i32);
    *cursor += 4;
    Ok(())
}

/// Read one record written by [`write_keyed_entry`].
///
/// # Safety
/// `cursor` must point into a buffer produced by the writer.
pub(crate) unsafe fn read_keyed_entry<K>(
    cursor: &mut u64,
    to_addr: &dyn Fn(u64) -> u64,
    key_codec: &dyn Codec<K>,
) -> Result<(K, Entry)> {
    let key_size = mem::load::<i32>(*cursor);
    *cursor += 4;
    if key_size < 0 {
        return Err(Error::Codec(format!(
            "corrupt serialized index: negative key length {key_size}"
        )));
    }
    let key = key_codec.decode(*cursor, key_size as usize)?;
    *cursor += key_size as u64;
    let rel = mem::load::<i64>(*cursor);
    *cursor += 8;
    let len = mem::load::<i32>(*cursor);
    *cursor += 4;
    Ok((
        key,
        Entry {
            addr: to_addr(rel as u64),
            len: len as u32,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix64_disperses_consecutive_keys() {
        let a = mix64(1);
        let b = mix64(2);
        assert_ne!(a, b);
        assert_ne!(a & 0xFFFF, b & 0xFFFF);
    }

    #[test]
    fn mix32_is_not_identity() {
        assert_ne!(mix32(7), 7);
        assert_eq!(mix32(0), 0);
    }
}
