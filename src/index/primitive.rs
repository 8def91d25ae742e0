//! Open-addressed index over parallel primitive arrays.
//!
//! Three arrays — `keys`, `addrs`, `lens` — probed linearly. Slot state
//! lives in the key itself: `0` is empty, the type minimum is a
//! tombstone, so both are rejected as user keys. Lookups run under an
//! optimistic stamp with volatile slot loads and revalidate afterwards;
//! mutation takes the write lock.
//!
//! Arrays replaced by a resize are parked until drop, so a stale
//! optimistic reader always dereferences live memory and then fails
//! validation.

use std::alloc::{handle_alloc_error, Layout};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::index::stamped::StampedLock;
use crate::index::{mix32, mix64, Entry, Index};
use crate::mem;

/// Index keyed by `i64`.
pub type LongIndex = PrimitiveIndex<i64>;

/// Index keyed by `i32`.
pub type IntIndex = PrimitiveIndex<i32>;

/// Fixed-width key with reserved sentinel values.
pub trait PrimKey: Copy + PartialEq + Send + Sync + 'static {
    const EMPTY: Self;
    const TOMBSTONE: Self;
    const WIDTH: usize;
    /// High-dispersion hash keeping probe chains short.
    fn spread(self) -> u64;
    /// # Safety
    /// `addr` must be an aligned live slot.
    unsafe fn load_slot(addr: u64) -> Self;
    /// # Safety
    /// `addr` must be an aligned live slot.
    unsafe fn store_slot(addr: u64, value: Self);
}

impl PrimKey for i64 {
    const EMPTY: Self = 0;
    const TOMBSTONE: Self = i64::MIN;
    const WIDTH: usize = 8;

    #[inline]
    fn spread(self) -> u64 {
        mix64(self as u64)
    }

    unsafe fn load_slot(addr: u64) -> Self {
        mem::load_volatile_i64(addr)
    }

    unsafe fn store_slot(addr: u64, value: Self) {
        mem::store_volatile_i64(addr, value);
    }
}

impl PrimKey for i32 {
    const EMPTY: Self = 0;
    const TOMBSTONE: Self = i32::MIN;
    const WIDTH: usize = 4;

    #[inline]
    fn spread(self) -> u64 {
        u64::from(mix32(self as u32))
    }

    unsafe fn load_slot(addr: u64) -> Self {
        mem::load_volatile_i32(addr)
    }

    unsafe fn store_slot(addr: u64, value: Self) {
        mem::store_volatile_i32(addr, value);
    }
}

/// The three parallel arrays. Zeroed at birth, so every key slot starts
/// EMPTY.
struct Tables {
    keys: u64,
    addrs: u64,
    lens: u64,
    capacity: usize,
}

fn array_layout(bytes: usize) -> Layout {
    Layout::from_size_align(bytes, 16).expect("array layout")
}

fn alloc_zeroed(bytes: usize) -> u64 {
    let layout = array_layout(bytes);
    let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
    if ptr.is_null() {
        handle_alloc_error(layout);
    }
    ptr as u64
}

impl Tables {
    fn alloc<K: PrimKey>(capacity: usize) -> Box<Tables> {
        debug_assert!(capacity.is_power_of_two());
        Box::new(Tables {
            keys: alloc_zeroed(capacity * K::WIDTH),
            addrs: alloc_zeroed(capacity * 8),
            lens: alloc_zeroed(capacity * 4),
            capacity,
        })
    }

    /// # Safety
    /// Must be called exactly once, with no readers left.
    unsafe fn release<K: PrimKey>(&self) {
        std::alloc::dealloc(
            self.keys as *mut u8,
            array_layout(self.capacity * K::WIDTH),
        );
        std::alloc::dealloc(self.addrs as *mut u8, array_layout(self.capacity * 8));
        std::alloc::dealloc(self.lens as *mut u8, array_layout(self.capacity * 4));
    }

    #[inline]
    fn key_slot<K: PrimKey>(&self, i: usize) -> u64 {
        self.keys + (i * K::WIDTH) as u64
    }

    #[inline]
    fn addr_slot(&self, i: usize) -> u64 {
        self.addrs + (i * 8) as u64
    }

    #[inline]
    fn len_slot(&self, i: usize) -> u64 {
        self.lens + (i * 4) as u64
    }

    #[inline]
    unsafe fn entry_at(&self, i: usize) -> Entry {
        Entry {
            addr: mem::load_volatile_i64(self.addr_slot(i)) as u64,
            len: mem::load_volatile_i32(self.len_slot(i)) as u32,
        }
    }

    #[inline]
    unsafe fn set_entry_at(&self, i: usize, entry: Entry) {
        mem::store_volatile_i64(self.addr_slot(i), entry.addr as i64);
        mem::store_volatile_i32(self.len_slot(i), entry.len as i32);
    }
}

pub struct PrimitiveIndex<K: PrimKey> {
    lock: StampedLock,
    tables: AtomicPtr<Tables>,
    len: AtomicUsize,
    tombstones: AtomicUsize,
    retired: Mutex<Vec<*mut Tables>>,
    _marker: PhantomData<K>,
}

unsafe impl<K: PrimKey> Send for PrimitiveIndex<K> {}
unsafe impl<K: PrimKey> Sync for PrimitiveIndex<K> {}

impl<K: PrimKey> PrimitiveIndex<K> {
    pub fn new(capacity: u32) -> Self {
        let capacity = (capacity.max(4) as usize).next_power_of_two();
        PrimitiveIndex {
            lock: StampedLock::new(),
            tables: AtomicPtr::new(Box::into_raw(Tables::alloc::<K>(capacity))),
            len: AtomicUsize::new(0),
            tombstones: AtomicUsize::new(0),
            retired: Mutex::new(Vec::new()),
            _marker: PhantomData,
        }
    }

    #[inline]
    fn is_sentinel(key: K) -> bool {
        key == K::EMPTY || key == K::TOMBSTONE
    }

    /// Probe for `key`. Terminates after at most `capacity` slots even
    /// on a torn snapshot; the caller validates the stamp afterwards.
    unsafe fn probe_entry(tables: &Tables, key: K) -> Option<Entry> {
        let mask = tables.capacity - 1;
        let mut i = (key.spread() as usize) & mask;
        for _ in 0..tables.capacity {
            let slot = K::load_slot(tables.key_slot::<K>(i));
            if slot == key {
                return Some(tables.entry_at(i));
            }
            if slot == K::EMPTY {
                return None;
            }
            i = (i + 1) & mask;
        }
        None
    }

    #[inline]
    fn current(&self) -> &Tables {
        // published pointers stay live until drop
        unsafe { &*self.tables.load(Ordering::Acquire) }
    }

    /// Grow (or rebuild at the same capacity, purging tombstones) and
    /// publish fresh tables. Caller holds the write lock.
    unsafe fn rebuild(&self, new_capacity: usize) {
        let old_ptr = self.tables.load(Ordering::Acquire);
        let old = &*old_ptr;
        let fresh = Tables::alloc::<K>(new_capacity);
        let mask = new_capacity - 1;
        for i in 0..old.capacity {
            let key = K::load_slot(old.key_slot::<K>(i));
            if key == K::EMPTY || key == K::TOMBSTONE {
                continue;
            }
            let mut j = (key.spread() as usize) & mask;
            while K::load_slot(fresh.key_slot::<K>(j)) != K::EMPTY {
                j = (j + 1) & mask;
            }
            fresh.set_entry_at(j, old.entry_at(i));
            K::store_slot(fresh.key_slot::<K>(j), key);
        }
        self.tables
            .store(Box::into_raw(fresh), Ordering::Release);
        self.tombstones.store(0, Ordering::SeqCst);
        self.retired.lock().push(old_ptr);
    }

    /// Double when live entries alone cross the load factor; otherwise a
    /// same-capacity rebuild purges tombstones.
    unsafe fn ensure_room(&self) {
        let tables = self.current();
        let live = self.len.load(Ordering::SeqCst);
        let occupied = live + self.tombstones.load(Ordering::SeqCst);
        if 4 * (occupied + 1) <= 3 * tables.capacity {
            return;
        }
        let new_capacity = if 4 * (live + 1) > 3 * tables.capacity {
            tables.capacity * 2
        } else {
            tables.capacity
        };
        self.rebuild(new_capacity);
    }
}

impl<K: PrimKey> Index<K> for PrimitiveIndex<K> {
    fn put_and_get_old(&self, key: K, entry: Entry) -> Result<Option<Entry>> {
        if Self::is_sentinel(key) {
            return Err(Error::InvalidKey(
                "0 and the type minimum are reserved slot markers",
            ));
        }
        let _guard = self.lock.write();
        unsafe {
            self.ensure_room();
            let tables = self.current();
            let mask = tables.capacity - 1;
            let mut i = (key.spread() as usize) & mask;
            let mut first_tombstone = None;
            for _ in 0..tables.capacity {
                let slot = K::load_slot(tables.key_slot::<K>(i));
                if slot == key {
                    let old = tables.entry_at(i);
                    tables.set_entry_at(i, entry);
                    return Ok(Some(old));
                }
                if slot == K::EMPTY {
                    break;
                }
                if slot == K::TOMBSTONE && first_tombstone.is_none() {
                    first_tombstone = Some(i);
                }
                i = (i + 1) & mask;
            }
            let target = first_tombstone.unwrap_or(i);
            tables.set_entry_at(target, entry);
            K::store_slot(tables.key_slot::<K>(target), key);
            if first_tombstone.is_some() {
                self.tombstones.fetch_sub(1, Ordering::SeqCst);
            }
            self.len.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    fn get(&self, key: &K) -> Option<Entry> {
        let key = *key;
        if Self::is_sentinel(key) {
            return None;
        }
        if let Some(stamp) = self.lock.optimistic_read() {
            let result = unsafe { Self::probe_entry(self.current(), key) };
            if self.lock.validate(stamp) {
                return result;
            }
        }
        let _guard = self.lock.read();
        unsafe { Self::probe_entry(self.current(), key) }
    }

    fn remove_and_get(&self, key: &K) -> Option<Entry> {
        let key = *key;
        if Self::is_sentinel(key) {
            return None;
        }
        let _guard = self.lock.write();
        unsafe {
            let tables = self.current();
            let mask = tables.capacity - 1;
            let mut i = (key.spread() as usize) & mask;
            for _ in 0..tables.capacity {
                let slot = K::load_slot(tables.key_slot::<K>(i));
                if slot == key {
                    let old = tables.entry_at(i);
                    K::store_slot(tables.key_slot::<K>(i), K::TOMBSTONE);
                    self.tombstones.fetch_add(1, Ordering::SeqCst);
                    self.len.fetch_sub(1, Ordering::SeqCst);
                    return Some(old);
                }
                if slot == K::EMPTY {
                    return None;
                }
                i = (i + 1) & mask;
            }
            None
        }
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    fn clear_with(&self, f: &mut dyn FnMut(Entry)) {
        let _guard = self.lock.write();
        unsafe {
            let tables = self.current();
            for i in 0..tables.capacity {
                let slot = K::load_slot(tables.key_slot::<K>(i));
                if slot != K::EMPTY && slot != K::TOMBSTONE {
                    f(tables.entry_at(i));
                }
            }
            mem::fill(tables.keys, tables.capacity * K::WIDTH, 0);
        }
        self.len.store(0, Ordering::SeqCst);
        self.tombstones.store(0, Ordering::SeqCst);
    }

    fn for_each(&self, f: &mut dyn FnMut(&K, Entry)) {
        let _guard = self.lock.read();
        unsafe {
            let tables = self.current();
            for i in 0..tables.capacity {
                let slot = K::load_slot(tables.key_slot::<K>(i));
                if slot != K::EMPTY && slot != K::TOMBSTONE {
                    f(&slot, tables.entry_at(i));
                }
            }
        }
    }

    fn serialized_size(&self, _key_codec: &dyn Codec<K>) -> Result<usize> {
        Ok(4 + self.len() * (K::WIDTH + 12))
    }

    unsafe fn serialize_with_offsets(
        &self,
        addr: u64,
        to_offset: &dyn Fn(u64) -> u64,
        _key_codec: &dyn Codec<K>,
    ) -> Result<usize> {
        let _guard = self.lock.read();
        let tables = self.current();
        mem::store::<i32>(addr, self.len.load(Ordering::SeqCst) as i32);
        let mut cursor = addr + 4;
        for i in 0..tables.capacity {
            let slot = K::load_slot(tables.key_slot::<K>(i));
            if slot == K::EMPTY || slot == K::TOMBSTONE {
                continue;
            }
            let entry = tables.entry_at(i);
            mem::store::<K>(cursor, slot);
            cursor += K::WIDTH as u64;
            mem::store::<i64>(cursor, to_offset(entry.addr) as i64);
            cursor += 8;
            mem::store::<i32>(cursor, entry.len as i32);
            cursor += 4;
        }
        Ok((cursor - addr) as usize)
    }

    unsafe fn deserialize_with_offsets(
        &self,
        addr: u64,
        size: usize,
        to_addr: &dyn Fn(u64) -> u64,
        _key_codec: &dyn Codec<K>,
    ) -> Result<()> {
        let count = mem::load::<i32>(addr);
        if count < 0 || 4 + count as usize * (K::WIDTH + 12) > size {
            return Err(Error::IncompatibleFile(format!(
                "serialized primitive index claims {count} entries in {size} bytes"
            )));
        }
        let mut cursor = addr + 4;
        for _ in 0..count {
            let key = mem::load::<K>(cursor);
            cursor += K::WIDTH as u64;
            let rel = mem::load::<i64>(cursor);
            cursor += 8;
            let len = mem::load::<i32>(cursor);
            cursor += 4;
            self.put_and_get_old(
                key,
                Entry {
                    addr: to_addr(rel as u64),
                    len: len as u32,
                },
            )?;
        }
        Ok(())
    }
}

impl<K: PrimKey> Drop for PrimitiveIndex<K> {
    fn drop(&mut self) {
        unsafe {
            let current = *self.tables.get_mut();
            (*current).release::<K>();
            drop(Box::from_raw(current));
            for ptr in self.retired.get_mut().drain(..) {
                (*ptr).release::<K>();
                drop(Box::from_raw(ptr));
            }
        }
    }
}
