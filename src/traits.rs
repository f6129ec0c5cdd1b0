//! # Shared Cache Traits
//!
//! Both containers in this crate are shared-access: every operation takes
//! `&self` and values come back as `Arc<V>`, so they can sit behind a plain
//! `Arc` and be used from many threads without an outer lock.
//!
//! ## Architecture
//!
//! ```text
//!                   ┌─────────────────────────────────────────┐
//!                   │          SharedCache<K, V>              │
//!                   │                                         │
//!                   │  get(&, &K) → Option<Arc<V>>            │
//!                   │  put(&, K, V) → Option<Arc<V>>          │
//!                   │  remove(&, &K) → Option<Arc<V>>         │
//!                   │  contains_key(&, &K) → bool             │
//!                   │  len(&) → usize                         │
//!                   │  is_empty(&) → bool                     │
//!                   │  clear(&)                               │
//!                   └──────────────────┬──────────────────────┘
//!                                      │
//!              ┌───────────────────────┴───────────────────────┐
//!              ▼                                               ▼
//!   ┌────────────────────────────┐              ┌────────────────────────────┐
//!   │ ConcurrentReferenceTable   │              │ CacheMap                   │
//!   │   single table, optional   │              │   pinned + hard + soft     │
//!   │   max size                 │              │   tiers, listener          │
//!   └────────────────────────────┘              └────────────────────────────┘
//! ```
//!
//! ## Trait Summary
//!
//! | Trait             | Extends       | Purpose                          |
//! |-------------------|---------------|----------------------------------|
//! | `SharedCache`     | -             | Map operations over `&self`      |
//! | `ConcurrentCache` | `Send + Sync` | Marker for thread-safe caches    |
//!
//! [`CacheTier`] names the tier of a [`CacheMap`] that holds a key.
//!
//! ## Example Usage
//!
//! ```
//! use tiercache::ds::ReferenceStrength::Strong;
//! use tiercache::manager::CacheMap;
//! use tiercache::store::ConcurrentReferenceTable;
//! use tiercache::traits::SharedCache;
//!
//! fn warm<C: SharedCache<u32, String>>(cache: &C) {
//!     for i in 0..4 {
//!         cache.put(i, format!("v{i}"));
//!     }
//! }
//!
//! let table = ConcurrentReferenceTable::new(Strong, Strong);
//! let cache = CacheMap::new(false, 2, -1);
//! warm(&table);
//! warm(&cache);
//! assert_eq!(SharedCache::len(&table), 4);
//! assert_eq!(SharedCache::len(&cache), 4);
//! ```

use std::hash::Hash;
use std::sync::Arc;

use crate::manager::CacheMap;
use crate::store::ConcurrentReferenceTable;

/// Map operations available through a shared reference.
pub trait SharedCache<K, V> {
    /// Returns the value for `key`.
    fn get(&self, key: &K) -> Option<Arc<V>>;

    /// Inserts or replaces `key`, returning the previous value.
    fn put(&self, key: K, value: V) -> Option<Arc<V>>;

    /// Removes `key`, returning its value.
    fn remove(&self, key: &K) -> Option<Arc<V>>;

    fn contains_key(&self, key: &K) -> bool;

    /// Number of visible entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);
}

/// Marker trait for caches that are safe to share across threads.
pub trait ConcurrentCache: Send + Sync {}

/// Tier of a [`CacheMap`] holding a key.
///
/// | Tier   | Bound                 | Reclaimable | Evicted to |
/// |--------|-----------------------|-------------|------------|
/// | Pinned | none                  | no          | never      |
/// | Hard   | `cache_size`          | no          | Soft       |
/// | Soft   | `soft_reference_size` | yes         | dropped    |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    Pinned,
    Hard,
    Soft,
}

impl<K, V> SharedCache<K, V> for ConcurrentReferenceTable<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<Arc<V>> {
        ConcurrentReferenceTable::get(self, key)
    }

    fn put(&self, key: K, value: V) -> Option<Arc<V>> {
        ConcurrentReferenceTable::put(self, key, value)
    }

    fn remove(&self, key: &K) -> Option<Arc<V>> {
        ConcurrentReferenceTable::remove(self, key)
    }

    fn contains_key(&self, key: &K) -> bool {
        ConcurrentReferenceTable::contains_key(self, key)
    }

    fn len(&self) -> usize {
        ConcurrentReferenceTable::len(self)
    }

    fn clear(&self) {
        ConcurrentReferenceTable::clear(self)
    }
}

impl<K, V> SharedCache<K, V> for CacheMap<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<Arc<V>> {
        CacheMap::get(self, key)
    }

    fn put(&self, key: K, value: V) -> Option<Arc<V>> {
        CacheMap::put(self, key, value)
    }

    fn remove(&self, key: &K) -> Option<Arc<V>> {
        CacheMap::remove(self, key)
    }

    fn contains_key(&self, key: &K) -> bool {
        CacheMap::contains_key(self, key)
    }

    fn len(&self) -> usize {
        CacheMap::len(self)
    }

    fn clear(&self) {
        CacheMap::clear(self)
    }
}

impl<K, V> ConcurrentCache for ConcurrentReferenceTable<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
}

impl<K, V> ConcurrentCache for CacheMap<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ds::ReferenceStrength::Strong;

    fn exercise<C: SharedCache<u32, u32> + ConcurrentCache>(cache: &C) {
        assert!(cache.is_empty());
        assert_eq!(cache.put(1, 10), None);
        assert_eq!(cache.put(1, 11).as_deref(), Some(&10));
        assert_eq!(cache.get(&1).as_deref(), Some(&11));
        assert!(cache.contains_key(&1));
        assert_eq!(cache.remove(&1).as_deref(), Some(&11));
        assert!(!cache.contains_key(&1));

        cache.put(2, 20);
        cache.put(3, 30);
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn table_implements_shared_cache() {
        exercise(&ConcurrentReferenceTable::new(Strong, Strong));
    }

    #[test]
    fn cache_map_implements_shared_cache() {
        exercise(&CacheMap::new(true, 10, -1));
    }

    #[test]
    fn shared_cache_is_object_safe() {
        let caches: Vec<Arc<dyn SharedCache<u32, u32> + Send + Sync>> = vec![
            Arc::new(ConcurrentReferenceTable::new(Strong, Strong)),
            Arc::new(CacheMap::new(false, 1, 0)),
        ];
        for cache in &caches {
            cache.put(1, 1);
            cache.put(2, 2);
        }
        assert_eq!(caches[0].len(), 2);
        assert_eq!(caches[1].len(), 1);
    }

    #[test]
    fn tiers_are_hashable() {
        use std::collections::HashSet;
        let tiers: HashSet<_> = [CacheTier::Pinned, CacheTier::Hard, CacheTier::Soft]
            .into_iter()
            .collect();
        assert_eq!(tiers.len(), 3);
    }
}
