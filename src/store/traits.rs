//! Shared store-level types: metrics snapshots, eviction order and the
//! listener hooks a [`ConcurrentReferenceTable`](crate::store::ConcurrentReferenceTable)
//! calls while it maintains itself.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of store-level metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreMetrics {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub updates: u64,
    pub removes: u64,
    /// Overflow evictions plus `remove_random` removals.
    pub evictions: u64,
    /// Reclaimed slots purged from the table.
    pub expirations: u64,
    pub resizes: u64,
}

/// Which end of a bucket chain eviction favours.
///
/// New slots are appended to the tail of their bucket and eviction always
/// takes the bucket head. `Recency` additionally moves a slot to the tail when
/// a lookup hits it, so heads approximate least-recently-used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EvictionOrder {
    #[default]
    Insertion,
    Recency,
}

/// Hooks invoked by a table while it maintains itself.
///
/// All hooks default to no-ops. They run on the calling thread after the
/// table lock has been released, before the triggering operation returns.
/// `None` stands for a null key or value.
pub trait TableListener<K, V>: Send + Sync {
    /// A slot whose key was reclaimed has been purged.
    fn key_expired(&self, value: Option<&V>) {
        let _ = value;
    }

    /// A slot whose value was reclaimed has been purged.
    fn value_expired(&self, key: Option<&K>) {
        let _ = key;
    }

    /// An entry was evicted because the table exceeded its maximum size.
    fn overflow_removed(&self, key: Option<&K>, value: Option<&V>) {
        let _ = (key, value);
    }
}

/// Atomic counters behind [`StoreMetrics`].
#[derive(Debug, Default)]
pub(crate) struct StoreCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    removes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    resizes: AtomicU64,
}

impl StoreCounters {
    pub(crate) fn snapshot(&self) -> StoreMetrics {
        StoreMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            resizes: self.resizes.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn inc_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_expirations(&self, n: usize) {
        self.expirations.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn inc_resize(&self) {
        self.resizes.fetch_add(1, Ordering::Relaxed);
    }
}
