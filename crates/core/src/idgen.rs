//! Database reference allocation with recycling

use crate::DbRef;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{self, AtomicI64};

/// Thread-safe dbref allocator.
///
/// Recycled numbers are handed out again lowest first, each allocation
/// paired with a strictly increasing creation timestamp so that a reused
/// number never shares an objid with its previous holder.
pub struct DbRefAllocator {
    free: Mutex<BTreeSet<i64>>,
    next_id: AtomicI64,
    clock: AtomicI64,
}

impl DbRefAllocator {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(first: i64) -> Self {
        Self {
            free: Mutex::new(BTreeSet::new()),
            next_id: AtomicI64::new(first),
            clock: AtomicI64::new(1),
        }
    }

    /// Get the next available dbref and its creation timestamp
    pub fn allocate(&self) -> (DbRef, i64) {
        let created = self.clock.fetch_add(1, atomic::Ordering::Relaxed);
        let recycled = {
            let mut free = self.free.lock();
            let first = free.iter().next().copied();
            if let Some(id) = first {
                free.remove(&id);
            }
            first
        };
        let id = recycled.unwrap_or_else(|| self.next_id.fetch_add(1, atomic::Ordering::Relaxed));
        (DbRef(id), created)
    }

    /// Return a dbref to the free list
    pub fn recycle(&self, dbref: DbRef) {
        self.free.lock().insert(dbref.get());
    }

    /// Make sure fresh allocations start above an externally assigned number
    pub fn reserve(&self, dbref: DbRef) {
        self.next_id.fetch_max(dbref.get() + 1, atomic::Ordering::Relaxed);
    }
}

impl Default for DbRefAllocator {
    fn default() -> Self {
        Self::new()
    }
}
