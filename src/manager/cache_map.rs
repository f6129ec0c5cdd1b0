//! Tiered cache: pinned set, bounded hard tier, reclaimable soft tier.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │ CacheMap<K, V>                                                           │
//! │                                                                          │
//! │  RwLock<TierState>                                                       │
//! │    pinned: FxHashMap<K, Option<Arc<V>>>   never evicted, pin survives    │
//! │    cache_size, soft_reference_size       value removal                   │
//! │                                                                          │
//! │  hard: ConcurrentReferenceTable  Strong/Strong     max_size = cache_size │
//! │          │ overflow (returned, not notified)                             │
//! │          ▼                                                               │
//! │  soft: ConcurrentReferenceTable  Strong/Reclaimable max = soft size      │
//! │          │ overflow / reclaimed ──► Notifier ──► CacheListener           │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lookups go pinned → hard → soft. A hit in the soft tier is returned as is;
//! only a `put` brings a key back into the hard tier.
//!
//! When the hard tier overflows, the displaced entry moves to the soft tier
//! without a notification. With the soft tier disabled
//! (`soft_reference_size == 0`) it is dropped and reported as removed.
//!
//! ## Size settings
//!
//! | Setting               | `0`                    | `n > 0`      | `< 0`                |
//! |-----------------------|------------------------|--------------|----------------------|
//! | `cache_size`          | `put` becomes a no-op  | hard bound   | (unrepresentable)    |
//! | `soft_reference_size` | soft tier disabled     | soft bound   | unbounded, stored -1 |
//!
//! ## Concurrency
//!
//! Every compound operation holds the cache's `RwLock` (write for mutation,
//! read for lookups) around the table calls it makes, so pin state and tier
//! membership change atomically. Lock order is cache, then hard table, then
//! soft table.
//!
//! ## Example Usage
//!
//! ```
//! use std::sync::Arc;
//!
//! use tiercache::manager::{CacheMap, RecordingListener};
//!
//! let listener = Arc::new(RecordingListener::<String>::new());
//! let cache = CacheMap::<String, u32>::builder(2, 1)
//!     .listener(listener.clone())
//!     .build();
//!
//! cache.put("a".into(), 1);
//! cache.put("b".into(), 2);
//! cache.put("c".into(), 3); // one entry moves to the soft tier
//! assert_eq!(cache.len(), 3);
//!
//! assert!(cache.pin("a".into()));
//! cache.clear();
//! assert!(cache.is_empty());
//! assert!(cache.pinned_keys().contains(&"a".to_string()));
//! assert_eq!(listener.additions(), 3);
//! assert_eq!(listener.removals(), 3);
//! ```

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::builder::CacheMapBuilder;
use crate::ds::fractions::EvictionCursor;
use crate::ds::reclaim::{MemoryReclaimer, ReferenceStrength};
use crate::error::ConfigError;
use crate::manager::listener::CacheListener;
use crate::store::reference_table::{
    ConcurrentReferenceTable, DEFAULT_INITIAL_CAPACITY, DEFAULT_LOAD_FACTOR, NullableEntry,
    TableConfig,
};
use crate::store::traits::{EvictionOrder, TableListener};
use crate::traits::CacheTier;

/// Largest initial bucket count handed to the hard tier.
const MAX_INITIAL_HARD_CAPACITY: usize = 1 << 16;

/// Hard tier starts at the next power of two above half the cache size.
fn hard_tier_capacity(cache_size: usize) -> usize {
    (cache_size.saturating_add(1) / 2)
        .min(MAX_INITIAL_HARD_CAPACITY)
        .next_power_of_two()
}

fn soft_bound(soft_reference_size: isize) -> Option<usize> {
    usize::try_from(soft_reference_size).ok()
}

/// Snapshot of cache-level metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    pub pinned_hits: u64,
    pub hard_hits: u64,
    pub soft_hits: u64,
    pub misses: u64,
    pub additions: u64,
    /// Removals for any reason other than reclamation.
    pub removals: u64,
    /// Soft-tier values found cleared by the reclaimer.
    pub expirations: u64,
    /// Entries displaced from the hard tier into the soft tier.
    pub overflows: u64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    pinned_hits: AtomicU64,
    hard_hits: AtomicU64,
    soft_hits: AtomicU64,
    misses: AtomicU64,
    additions: AtomicU64,
    removals: AtomicU64,
    expirations: AtomicU64,
    overflows: AtomicU64,
}

impl CacheCounters {
    fn snapshot(&self) -> CacheMetrics {
        CacheMetrics {
            pinned_hits: self.pinned_hits.load(Ordering::Relaxed),
            hard_hits: self.hard_hits.load(Ordering::Relaxed),
            soft_hits: self.soft_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            additions: self.additions.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
        }
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Fans notifications out to the user listener and the counters. Also the
/// soft tier's table listener.
struct Notifier<K, V> {
    listener: Option<Arc<dyn CacheListener<K, V>>>,
    counters: CacheCounters,
}

impl<K, V> Notifier<K, V> {
    fn added(&self, key: &K, value: Option<&V>) {
        CacheCounters::inc(&self.counters.additions);
        if let Some(listener) = &self.listener {
            listener.entry_added(key, value);
        }
    }

    fn removed(&self, key: &K, value: Option<&V>, expired: bool) {
        if expired {
            CacheCounters::inc(&self.counters.expirations);
        } else {
            CacheCounters::inc(&self.counters.removals);
        }
        if let Some(listener) = &self.listener {
            listener.entry_removed(key, value, expired);
        }
    }
}

impl<K, V> TableListener<K, V> for Notifier<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn value_expired(&self, key: Option<&K>) {
        if let Some(key) = key {
            self.removed(key, None, true);
        }
    }

    fn overflow_removed(&self, key: Option<&K>, value: Option<&V>) {
        if let Some(key) = key {
            self.removed(key, value, false);
        }
    }
}

/// Construction parameters; produced by [`CacheMapBuilder`].
pub(crate) struct CacheConfig<K, V> {
    pub(crate) lru: bool,
    pub(crate) cache_size: usize,
    pub(crate) soft_reference_size: isize,
    pub(crate) load_factor: f32,
    pub(crate) listener: Option<Arc<dyn CacheListener<K, V>>>,
    pub(crate) reclaimer: Option<Arc<MemoryReclaimer>>,
    pub(crate) cursor: Option<EvictionCursor>,
}

struct TierState<K, V> {
    pinned: FxHashMap<K, Option<Arc<V>>>,
    cache_size: usize,
    soft_reference_size: isize,
}

/// Thread-safe cache with pinned, hard and soft tiers.
///
/// See the [module documentation](self) for the tier model.
pub struct CacheMap<K, V> {
    state: RwLock<TierState<K, V>>,
    hard: ConcurrentReferenceTable<K, V>,
    soft: ConcurrentReferenceTable<K, V>,
    lru: bool,
    notifier: Arc<Notifier<K, V>>,
}

impl<K, V> CacheMap<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a cache with load factor 0.75 and no listener.
    pub fn new(lru: bool, cache_size: usize, soft_reference_size: isize) -> Self {
        Self::from_config(CacheConfig {
            lru,
            cache_size,
            soft_reference_size,
            load_factor: DEFAULT_LOAD_FACTOR,
            listener: None,
            reclaimer: None,
            cursor: None,
        })
    }

    /// Creates a cache whose tiers use `load_factor`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `load_factor` is not finite or not positive.
    pub fn try_with_load_factor(
        lru: bool,
        cache_size: usize,
        soft_reference_size: isize,
        load_factor: f32,
    ) -> Result<Self, ConfigError> {
        Self::builder(cache_size, soft_reference_size)
            .lru(lru)
            .load_factor(load_factor)
            .try_build()
    }

    pub fn builder(cache_size: usize, soft_reference_size: isize) -> CacheMapBuilder<K, V> {
        CacheMapBuilder::new(cache_size, soft_reference_size)
    }

    pub(crate) fn from_config(config: CacheConfig<K, V>) -> Self {
        let soft_reference_size = config.soft_reference_size.max(-1);
        let order = if config.lru {
            EvictionOrder::Recency
        } else {
            EvictionOrder::Insertion
        };
        let notifier = Arc::new(Notifier {
            listener: config.listener,
            counters: CacheCounters::default(),
        });

        let hard = ConcurrentReferenceTable::from_config(TableConfig {
            initial_capacity: hard_tier_capacity(config.cache_size),
            load_factor: config.load_factor,
            max_size: Some(config.cache_size),
            eviction_order: order,
            cursor: config.cursor.clone(),
            ..TableConfig::new(ReferenceStrength::Strong, ReferenceStrength::Strong)
        });
        let soft_listener: Arc<dyn TableListener<K, V>> = notifier.clone();
        let soft = ConcurrentReferenceTable::from_config(TableConfig {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            load_factor: config.load_factor,
            max_size: soft_bound(soft_reference_size),
            eviction_order: order,
            listener: Some(soft_listener),
            reclaimer: config.reclaimer,
            cursor: config.cursor,
            ..TableConfig::new(ReferenceStrength::Strong, ReferenceStrength::Reclaimable)
        });

        Self {
            state: RwLock::new(TierState {
                pinned: FxHashMap::default(),
                cache_size: config.cache_size,
                soft_reference_size,
            }),
            hard,
            soft,
            lru: config.lru,
            notifier,
        }
    }

    /// Sends entries displaced from the hard tier to the soft tier, or drops
    /// them with a removal notice when the soft tier is disabled.
    fn route_overflow(&self, state: &TierState<K, V>, evicted: Vec<NullableEntry<K, V>>) {
        for (key, value) in evicted {
            let Some(key) = key else {
                continue;
            };
            match value {
                Some(value) if state.soft_reference_size != 0 => {
                    CacheCounters::inc(&self.notifier.counters.overflows);
                    self.soft.insert_entry(key, Some(value));
                },
                value => self.notifier.removed(&key, value.as_deref(), false),
            }
        }
    }

    // -- lookup ---------------------------------------------------------------

    /// Looks `key` up in the pinned set, then the hard tier, then the soft
    /// tier.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let counters = &self.notifier.counters;
        let state = self.state.read();
        if let Some(Some(value)) = state.pinned.get(key) {
            CacheCounters::inc(&counters.pinned_hits);
            return Some(value.clone());
        }
        if let Some(value) = self.hard.get(key) {
            CacheCounters::inc(&counters.hard_hits);
            return Some(value);
        }
        if let Some(value) = self.soft.get(key) {
            CacheCounters::inc(&counters.soft_hits);
            return Some(value);
        }
        CacheCounters::inc(&counters.misses);
        None
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let state = self.state.read();
        matches!(state.pinned.get(key), Some(Some(_)))
            || self.hard.contains_key(key)
            || self.soft.contains_key(key)
    }

    /// Whether a pinned key lacks a value or a hard-tier key maps to null.
    pub fn contains_null_value(&self) -> bool {
        let state = self.state.read();
        state.pinned.values().any(Option::is_none) || self.hard.contains_null_value()
    }

    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        let state = self.state.read();
        state
            .pinned
            .values()
            .any(|held| held.as_deref() == Some(value))
            || self.hard.contains_value(value)
            || self.soft.contains_value(value)
    }

    /// Which tier currently holds a value for `key`.
    pub fn locate(&self, key: &K) -> Option<CacheTier> {
        let state = self.state.read();
        if matches!(state.pinned.get(key), Some(Some(_))) {
            Some(CacheTier::Pinned)
        } else if self.hard.contains_key(key) {
            Some(CacheTier::Hard)
        } else if self.soft.contains_key(key) {
            Some(CacheTier::Soft)
        } else {
            None
        }
    }

    // -- mutation -------------------------------------------------------------

    /// Inserts or replaces `key`, returning the previous value.
    ///
    /// A pinned key is updated in place. Otherwise the entry goes to the hard
    /// tier (pulling it out of the soft tier if it was there); with a cache
    /// size of zero nothing is stored.
    pub fn put(&self, key: K, value: V) -> Option<Arc<V>> {
        self.put_arc(key, Arc::new(value))
    }

    pub fn put_arc(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        self.store(key, Some(value))
    }

    /// [`put`](Self::put) that also accepts a null value.
    ///
    /// A null value lives in the hard tier like any other: it counts toward
    /// [`len`](Self::len), [`contains_key`](Self::contains_key) sees it and
    /// [`get`](Self::get) reads it as `None`. It is dropped with a removal
    /// notice instead of moving to the soft tier. On a pinned key it leaves
    /// the pin without a value. Returns the previous non-null value.
    pub fn put_nullable(&self, key: K, value: Option<V>) -> Option<Arc<V>> {
        self.store(key, value.map(Arc::new))
    }

    fn store(&self, key: K, value: Option<Arc<V>>) -> Option<Arc<V>> {
        let mut state = self.state.write();

        if let Some(slot) = state.pinned.get_mut(&key) {
            let previous = std::mem::replace(slot, value.clone());
            if let Some(old) = &previous {
                self.notifier.removed(&key, Some(old), false);
            }
            if let Some(value) = &value {
                self.notifier.added(&key, Some(value.as_ref()));
            }
            return previous;
        }

        if state.cache_size == 0 {
            return None;
        }

        let from_soft = self.soft.remove(&key);
        let outcome = self.hard.insert_entry(key.clone(), value.clone());
        let previous = outcome.previous.or(from_soft.map(Some));
        if let Some(old) = &previous {
            self.notifier.removed(&key, old.as_deref(), false);
        }
        self.notifier.added(&key, value.as_deref());
        self.route_overflow(&state, outcome.evicted);
        previous.flatten()
    }

    /// Inserts every pair in order. With `replace_existing` unset, keys that
    /// already hold a value are left alone.
    pub fn put_all<I>(&self, entries: I, replace_existing: bool)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            if !replace_existing && self.contains_key(&key) {
                continue;
            }
            self.put(key, value);
        }
    }

    /// Removes the value for `key`. A pinned key stays pinned.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        let mut state = self.state.write();
        let previous = match state.pinned.get_mut(key) {
            Some(slot) => slot.take().map(Some),
            None => self
                .hard
                .remove_entry(key)
                .or_else(|| self.soft.remove_entry(key)),
        };
        if let Some(old) = &previous {
            self.notifier.removed(key, old.as_deref(), false);
        }
        previous.flatten()
    }

    /// Drops every value. Pins are kept.
    pub fn clear(&self) {
        let mut state = self.state.write();
        for (key, slot) in state.pinned.iter_mut() {
            if let Some(old) = slot.take() {
                self.notifier.removed(key, Some(&old), false);
            }
        }
        self.soft.remove_expired();
        for table in [&self.hard, &self.soft] {
            for (key, value) in table.snapshot() {
                if let Some(key) = key {
                    self.notifier.removed(&key, value.as_deref(), false);
                }
            }
            table.clear();
        }
    }

    // -- pinning --------------------------------------------------------------

    /// Pins `key`, moving its value out of the hard or soft tier.
    ///
    /// Returns whether the key has a value. An unknown key is still recorded
    /// as pinned. A null value is dropped with a removal notice and the pin
    /// is recorded without a value.
    pub fn pin(&self, key: K) -> bool {
        let mut state = self.state.write();
        if let Some(slot) = state.pinned.get(&key) {
            return slot.is_some();
        }
        let value = match self.hard.remove_entry(&key) {
            Some(None) => {
                self.notifier.removed(&key, None, false);
                None
            },
            Some(value) => value,
            None => self.soft.remove(&key),
        };
        let present = value.is_some();
        state.pinned.insert(key, value);
        present
    }

    /// Unpins `key`, returning its value (if any) to the hard tier.
    ///
    /// Returns whether the key was pinned.
    pub fn unpin(&self, key: &K) -> bool {
        let mut state = self.state.write();
        let Some(value) = state.pinned.remove(key) else {
            return false;
        };
        if let Some(value) = value {
            let evicted = if state.cache_size == 0 {
                vec![(Some(key.clone()), Some(value))]
            } else {
                self.hard.insert_entry(key.clone(), Some(value)).evicted
            };
            self.route_overflow(&state, evicted);
        }
        true
    }

    /// Every pinned key, with or without a value.
    pub fn pinned_keys(&self) -> Vec<K> {
        self.state.read().pinned.keys().cloned().collect()
    }

    // -- configuration --------------------------------------------------------

    /// Sets the hard-tier bound. Entries beyond it are displaced as on
    /// overflow.
    pub fn set_cache_size(&self, cache_size: usize) {
        let mut state = self.state.write();
        state.cache_size = cache_size;
        let evicted = self.hard.set_max_size(Some(cache_size));
        log::debug!(
            "cache size set to {cache_size}, {} entries displaced",
            evicted.len()
        );
        self.route_overflow(&state, evicted);
    }

    pub fn cache_size(&self) -> usize {
        self.state.read().cache_size
    }

    /// Sets the soft-tier bound. Negative means unbounded, zero disables and
    /// drains the tier. Dropped entries are reported as removed.
    pub fn set_soft_reference_size(&self, soft_reference_size: isize) {
        let mut state = self.state.write();
        let soft_reference_size = soft_reference_size.max(-1);
        state.soft_reference_size = soft_reference_size;
        let dropped = self.soft.set_max_size(soft_bound(soft_reference_size));
        log::debug!(
            "soft reference size set to {soft_reference_size}, {} entries dropped",
            dropped.len()
        );
    }

    /// Soft-tier bound; `-1` means unbounded.
    pub fn soft_reference_size(&self) -> isize {
        self.state.read().soft_reference_size
    }

    pub fn is_lru(&self) -> bool {
        self.lru
    }

    // -- introspection --------------------------------------------------------

    /// Pinned keys with a value plus both tiers.
    pub fn len(&self) -> usize {
        let state = self.state.read();
        let pinned = state.pinned.values().filter(|slot| slot.is_some()).count();
        pinned + self.hard.len() + self.soft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys counted by [`len`](Self::len), including those mapped to null.
    pub fn keys(&self) -> Vec<K> {
        let state = self.state.read();
        let pinned = state
            .pinned
            .iter()
            .filter(|(_, slot)| slot.is_some())
            .map(|(key, _)| key.clone());
        let tiers = self
            .hard
            .snapshot()
            .into_iter()
            .chain(self.soft.snapshot())
            .filter_map(|(key, _)| key);
        pinned.chain(tiers).collect()
    }

    pub fn values(&self) -> Vec<Arc<V>> {
        self.entries().into_iter().map(|(_, value)| value).collect()
    }

    /// Every entry with a value: pinned first, then hard, then soft.
    pub fn entries(&self) -> Vec<(K, Arc<V>)> {
        let state = self.state.read();
        let pinned = state
            .pinned
            .iter()
            .filter_map(|(key, slot)| slot.as_ref().map(|value| (key.clone(), value.clone())));
        let tiers = self
            .hard
            .snapshot()
            .into_iter()
            .chain(self.soft.snapshot())
            .filter_map(|(key, value)| Some((key?, value?)));
        pinned.chain(tiers).collect()
    }

    /// Purges soft-tier entries the reclaimer has cleared, reporting each as
    /// an expired removal. Returns how many were purged.
    pub fn remove_expired(&self) -> usize {
        let _state = self.state.read();
        self.soft.remove_expired()
    }

    /// The reclaimer that may clear soft-tier values.
    pub fn reclaimer(&self) -> &Arc<MemoryReclaimer> {
        self.soft.reclaimer()
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.notifier.counters.snapshot()
    }

    /// Validates tier invariants (debug-only).
    #[cfg(debug_assertions)]
    pub fn check_invariants(&self) -> Result<(), crate::error::InvariantError> {
        use crate::error::InvariantError;

        let state = self.state.read();
        self.hard.check_invariants()?;
        self.soft.check_invariants()?;

        let hard_len = self.hard.len();
        if hard_len > state.cache_size {
            return Err(InvariantError::new(format!(
                "hard tier holds {hard_len} entries, bound is {}",
                state.cache_size
            )));
        }
        if let Some(bound) = soft_bound(state.soft_reference_size) {
            let soft_len = self.soft.len();
            if soft_len > bound {
                return Err(InvariantError::new(format!(
                    "soft tier holds {soft_len} entries, bound is {bound}"
                )));
            }
        }
        if state
            .pinned
            .keys()
            .any(|key| self.hard.contains_key(key) || self.soft.contains_key(key))
        {
            return Err(InvariantError::new("pinned key also present in a tier"));
        }
        if self
            .hard
            .snapshot()
            .into_iter()
            .filter_map(|(key, _)| key)
            .any(|key| self.soft.contains_key(&key))
        {
            return Err(InvariantError::new("key present in both hard and soft tiers"));
        }
        Ok(())
    }
}

impl<K, V> fmt::Debug for CacheMap<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + fmt::Debug + 'static,
    V: Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries();
        let state = self.state.read();
        f.debug_struct("CacheMap")
            .field("lru", &self.lru)
            .field("cache_size", &state.cache_size)
            .field("soft_reference_size", &state.soft_reference_size)
            .field("pinned", &state.pinned.len())
            .field(
                "entries",
                &entries
                    .iter()
                    .map(|(key, value)| (key, value.as_ref()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
