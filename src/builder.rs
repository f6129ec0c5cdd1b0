//! Builders for reference tables and tiered caches.
//!
//! Both builders follow the same shape: required parameters go to `new`,
//! optional ones are chained, and construction ends with either `build()`
//! (panics on invalid configuration) or `try_build()` (returns
//! [`ConfigError`]).
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use tiercache::builder::{CacheMapBuilder, ReferenceTableBuilder};
//! use tiercache::ds::{MemoryReclaimer, ReferenceStrength};
//! use tiercache::store::EvictionOrder;
//!
//! let table = ReferenceTableBuilder::<u64, String>::new(
//!     ReferenceStrength::Strong,
//!     ReferenceStrength::Reclaimable,
//! )
//! .initial_capacity(64)
//! .max_size(Some(1000))
//! .eviction_order(EvictionOrder::Recency)
//! .build();
//! assert_eq!(table.capacity(), 64);
//!
//! let cache = CacheMapBuilder::<u64, String>::new(100, 500)
//!     .lru(true)
//!     .reclaimer(Arc::new(MemoryReclaimer::with_budget(500)))
//!     .try_build()
//!     .unwrap();
//! assert_eq!(cache.cache_size(), 100);
//! ```

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::ds::fractions::EvictionCursor;
use crate::ds::reclaim::{MemoryReclaimer, ReferenceStrength};
use crate::error::ConfigError;
use crate::manager::cache_map::{CacheConfig, CacheMap};
use crate::manager::listener::CacheListener;
use crate::store::reference_table::{
    ConcurrentReferenceTable, DEFAULT_LOAD_FACTOR, TableConfig, validate_load_factor,
};
use crate::store::traits::{EvictionOrder, TableListener};

fn checked_load_factor(load_factor: f32) -> Result<f32, ConfigError> {
    validate_load_factor(load_factor)
        .inspect_err(|e| log::warn!("rejecting configuration: {e}"))?;
    Ok(load_factor)
}

fn checked_cursor(fractions: Option<Arc<[f64]>>) -> Result<Option<EvictionCursor>, ConfigError> {
    fractions
        .map(EvictionCursor::new)
        .transpose()
        .inspect_err(|e| log::warn!("rejecting configuration: {e}"))
}

// ---------------------------------------------------------------------------
// ReferenceTableBuilder
// ---------------------------------------------------------------------------

/// Builder for [`ConcurrentReferenceTable`].
pub struct ReferenceTableBuilder<K, V> {
    config: TableConfig<K, V>,
    fractions: Option<Arc<[f64]>>,
}

impl<K, V> ReferenceTableBuilder<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Starts a builder with capacity 16, load factor 0.75, no size bound and
    /// insertion-order eviction.
    pub fn new(key_strength: ReferenceStrength, value_strength: ReferenceStrength) -> Self {
        Self {
            config: TableConfig::new(key_strength, value_strength),
            fractions: None,
        }
    }

    /// Initial bucket-array length. `0` is treated as `1`.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.config.initial_capacity = capacity;
        self
    }

    pub fn load_factor(mut self, load_factor: f32) -> Self {
        self.config.load_factor = load_factor;
        self
    }

    /// Maximum number of entries; `None` means unbounded.
    pub fn max_size(mut self, max_size: Option<usize>) -> Self {
        self.config.max_size = max_size;
        self
    }

    pub fn eviction_order(mut self, order: EvictionOrder) -> Self {
        self.config.eviction_order = order;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn TableListener<K, V>>) -> Self {
        self.config.listener = Some(listener);
        self
    }

    /// Reclaimer that clears this table's reclaimable payloads. Defaults to a
    /// private reclaimer without a budget.
    pub fn reclaimer(mut self, reclaimer: Arc<MemoryReclaimer>) -> Self {
        self.config.reclaimer = Some(reclaimer);
        self
    }

    /// Fraction array for `remove_random`. Defaults to the process-wide
    /// shared array. Checked by [`try_build`](Self::try_build).
    pub fn random_fractions(mut self, fractions: Arc<[f64]>) -> Self {
        self.fractions = Some(fractions);
        self
    }

    /// Builds the table.
    ///
    /// # Panics
    ///
    /// Panics if the load factor or the fraction array is invalid. For a
    /// non-panicking alternative, use [`try_build`](Self::try_build).
    pub fn build(self) -> ConcurrentReferenceTable<K, V> {
        match self.try_build() {
            Ok(table) => table,
            Err(e) => panic!("{}", e),
        }
    }

    /// Builds the table, returning an error on invalid parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the load factor is not finite, not
    /// positive or too small to hold one entry, or if the fraction array is
    /// empty or holds a value outside `[0, 1)`.
    pub fn try_build(mut self) -> Result<ConcurrentReferenceTable<K, V>, ConfigError> {
        checked_load_factor(self.config.load_factor)?;
        self.config.cursor = checked_cursor(self.fractions)?;
        Ok(ConcurrentReferenceTable::from_config(self.config))
    }
}

impl<K, V> fmt::Debug for ReferenceTableBuilder<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceTableBuilder")
            .field("key_strength", &self.config.key_strength)
            .field("value_strength", &self.config.value_strength)
            .field("initial_capacity", &self.config.initial_capacity)
            .field("load_factor", &self.config.load_factor)
            .field("max_size", &self.config.max_size)
            .field("eviction_order", &self.config.eviction_order)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// CacheMapBuilder
// ---------------------------------------------------------------------------

/// Builder for [`CacheMap`].
///
/// Both tier sizes are required: `cache_size` bounds the hard tier (`0`
/// disables it), `soft_reference_size` bounds the soft tier (`0` disables it,
/// any negative value means unbounded).
pub struct CacheMapBuilder<K, V> {
    config: CacheConfig<K, V>,
    fractions: Option<Arc<[f64]>>,
}

impl<K, V> CacheMapBuilder<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(cache_size: usize, soft_reference_size: isize) -> Self {
        Self {
            config: CacheConfig {
                lru: false,
                cache_size,
                soft_reference_size,
                load_factor: DEFAULT_LOAD_FACTOR,
                listener: None,
                reclaimer: None,
                cursor: None,
            },
            fractions: None,
        }
    }

    /// Arms recency-ordered eviction in both tiers.
    pub fn lru(mut self, lru: bool) -> Self {
        self.config.lru = lru;
        self
    }

    pub fn load_factor(mut self, load_factor: f32) -> Self {
        self.config.load_factor = load_factor;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn CacheListener<K, V>>) -> Self {
        self.config.listener = Some(listener);
        self
    }

    /// Reclaimer for the soft tier. Defaults to a private reclaimer without a
    /// budget.
    pub fn reclaimer(mut self, reclaimer: Arc<MemoryReclaimer>) -> Self {
        self.config.reclaimer = Some(reclaimer);
        self
    }

    /// Fraction array shared by both tiers' eviction probes.
    pub fn random_fractions(mut self, fractions: Arc<[f64]>) -> Self {
        self.fractions = Some(fractions);
        self
    }

    /// Builds the cache.
    ///
    /// # Panics
    ///
    /// Panics if the load factor or the fraction array is invalid. For a
    /// non-panicking alternative, use [`try_build`](Self::try_build).
    pub fn build(self) -> CacheMap<K, V> {
        match self.try_build() {
            Ok(cache) => cache,
            Err(e) => panic!("{}", e),
        }
    }

    /// Builds the cache, returning an error on invalid parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] under the same conditions as
    /// [`ReferenceTableBuilder::try_build`].
    pub fn try_build(mut self) -> Result<CacheMap<K, V>, ConfigError> {
        checked_load_factor(self.config.load_factor)?;
        self.config.cursor = checked_cursor(self.fractions)?;
        Ok(CacheMap::from_config(self.config))
    }
}

impl<K, V> fmt::Debug for CacheMapBuilder<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheMapBuilder")
            .field("lru", &self.config.lru)
            .field("cache_size", &self.config.cache_size)
            .field("soft_reference_size", &self.config.soft_reference_size)
            .field("load_factor", &self.config.load_factor)
            .finish_non_exhaustive()
    }
}
