//! Compiled locks keyed by `(object, lock type)`
//!
//! Readers compile outside any lock and publish the result through
//! [`LockCache::fill`]. Writers store the new text first and then publish
//! through [`LockCache::replace`], which bumps a generation counter while
//! holding the entry. A fill that started before any write is dropped
//! instead of cached, so text read before a `set` or `clear` never
//! outlives it.

use super::{CompiledLock, LockType};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mush_core::DbRef;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Key = (DbRef, LockType);

#[derive(Default)]
pub struct LockCache {
    entries: DashMap<Key, Arc<CompiledLock>>,
    generation: AtomicU64,
}

impl LockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, object: DbRef, lock: LockType) -> Option<Arc<CompiledLock>> {
        self.entries
            .get(&(object, lock))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Take this before reading lock text that will be passed to [`fill`](Self::fill)
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Cache a lock compiled from text read at generation `seen`.
    ///
    /// Returns the entry in force: an existing one wins, and a lock read
    /// before a later write is handed back without being cached.
    pub fn fill(
        &self,
        object: DbRef,
        lock: LockType,
        compiled: Arc<CompiledLock>,
        seen: u64,
    ) -> Arc<CompiledLock> {
        match self.entries.entry((object, lock)) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                if self.generation() == seen {
                    entry.insert(Arc::clone(&compiled));
                } else {
                    tracing::trace!("Dropping stale {} lock for {}", lock, object);
                }
                compiled
            }
        }
    }

    /// Publish a write whose text is already stored. `None` evicts.
    pub fn replace(&self, object: DbRef, lock: LockType, compiled: Option<Arc<CompiledLock>>) {
        match self.entries.entry((object, lock)) {
            Entry::Occupied(mut entry) => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                match compiled {
                    Some(compiled) => {
                        entry.insert(compiled);
                    }
                    None => {
                        entry.remove();
                    }
                }
            }
            Entry::Vacant(entry) => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                if let Some(compiled) = compiled {
                    entry.insert(compiled);
                }
            }
        }
    }

    /// Evict every lock on `object`
    pub fn invalidate(&self, object: DbRef) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.retain(|(dbref, _), _| *dbref != object);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
