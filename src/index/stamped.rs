//! Optimistic/read/write lock.
//!
//! A version counter over a read-write lock: writers hold the write
//! lock with the counter odd, so a reader that snapshots an even stamp
//! and revalidates it after reading has observed a quiescent table.
//! Failed optimistic reads escalate to the blocking read lock.

use std::sync::atomic::{fence, AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct StampedLock {
    seq: AtomicU64,
    rw: RwLock<()>,
}

impl StampedLock {
    pub fn new() -> Self {
        StampedLock {
            seq: AtomicU64::new(0),
            rw: RwLock::new(()),
        }
    }

    /// Snapshot a stamp without blocking. `None` while a writer holds
    /// the lock.
    #[inline]
    pub fn optimistic_read(&self) -> Option<u64> {
        let stamp = self.seq.load(Ordering::SeqCst);
        (stamp & 1 == 0).then_some(stamp)
    }

    /// True if no writer ran since the stamp was taken; reads performed
    /// in between are consistent.
    #[inline]
    pub fn validate(&self, stamp: u64) -> bool {
        fence(Ordering::SeqCst);
        self.seq.load(Ordering::SeqCst) == stamp
    }

    /// Blocking shared lock, the escalation path for failed optimistic
    /// reads.
    pub fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.rw.read()
    }

    /// Exclusive lock. The stamp is odd for the guard's lifetime.
    pub fn write(&self) -> StampedWriteGuard<'_> {
        let guard = self.rw.write();
        self.seq.fetch_add(1, Ordering::SeqCst);
        StampedWriteGuard {
            lock: self,
            _guard: guard,
        }
    }
}

impl Default for StampedLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StampedWriteGuard<'a> {
    lock: &'a StampedLock,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl Drop for StampedWriteGuard<'_> {
    fn drop(&mut self) {
        // back to even before the rw lock is released
        self.lock.seq.fetch_add(1, Ordering::SeqCst);
    }
}
