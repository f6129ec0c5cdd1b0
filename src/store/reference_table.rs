//! Concurrent hash table with configurable reference strengths.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │ ConcurrentReferenceTable<K, V>                                           │
//! │                                                                          │
//! │  core: Arc<TableCore> ◄───────── KeyView / ValueView / EntryView         │
//! │   │                                                                      │
//! │   ├─ RwLock<Buckets>                                                     │
//! │   │    buckets: [ Vec<Slot> ; capacity ]   slot = (hash, Ref<K>, Ref<V>) │
//! │   │    count, threshold = floor(capacity * load_factor), max_size        │
//! │   │    cursor ──► shared fractions [f0, f1, ... f999]                    │
//! │   │                                                                      │
//! │   ├─ key/value ReferenceStrength, load_factor, EvictionOrder             │
//! │   ├─ listener: Option<Arc<dyn TableListener>>                            │
//! │   └─ reclaimer: Arc<MemoryReclaimer>                                     │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A single `RwLock` guards the bucket array. Lookups take the shared lock,
//! every structural change takes the exclusive one, so a reader sees either
//! the table before a resize or after it, never in between.
//!
//! ## Core Operations
//!
//! | Operation       | Lock      | Notes                                          |
//! |-----------------|-----------|------------------------------------------------|
//! | `get`           | read      | purges its bucket afterwards if it saw a stale slot |
//! | `put`           | write     | may resize to `capacity * 2 + 1`, may overflow |
//! | `remove`        | write     |                                                |
//! | `remove_random` | write     | nearest-index probe from a pseudo-random target |
//! | `random_entries`| write     | snapshot rotated to the next pseudo-random bucket |
//! | `len`           | read      | full purge sweep first if the reclaimer ran    |
//!
//! ## Approximate-random eviction
//!
//! `remove_random` computes `t = floor(fraction * capacity)` from the next
//! shared fraction, then takes the head of the first non-empty bucket in the
//! order `t, t-1, t+1, t-2, t+2, ...`, skipping indices outside the array.
//! The same probe picks the victim when an insert pushes the table past its
//! maximum size.
//!
//! ## Reclaimed slots
//!
//! Slots whose key or value was cleared by the [`MemoryReclaimer`] stay in
//! their bucket until a write touches that bucket, a resize rehashes them,
//! a read notices them, or `len`/`is_empty`/`remove_expired` sweeps the
//! whole table. Purging reports through [`TableListener::key_expired`] or
//! [`TableListener::value_expired`].
//!
//! ## Example Usage
//!
//! ```
//! use tiercache::ds::ReferenceStrength;
//! use tiercache::store::ConcurrentReferenceTable;
//!
//! let table = ConcurrentReferenceTable::try_with_capacity(
//!     ReferenceStrength::Strong,
//!     ReferenceStrength::Strong,
//!     10,
//!     0.75,
//! )
//! .unwrap();
//!
//! for i in 0..8 {
//!     table.put(i, i * 10);
//! }
//! assert_eq!(table.capacity(), 21);
//! assert_eq!(table.get(&3).as_deref(), Some(&30));
//!
//! let (key, _value) = table.remove_random().unwrap();
//! assert!(key.is_some());
//! assert_eq!(table.len(), 7);
//! ```

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;

use crate::builder::ReferenceTableBuilder;
use crate::ds::fractions::EvictionCursor;
use crate::ds::reclaim::{MemoryReclaimer, Ref, ReferenceStrength, Resolved};
use crate::error::{ConfigError, TableError};
use crate::store::traits::{EvictionOrder, StoreCounters, StoreMetrics, TableListener};
use crate::store::views::{EntryView, KeyView, ValueView, ViewIter};

/// Default bucket-array length.
pub const DEFAULT_INITIAL_CAPACITY: usize = 16;

/// Default ratio of entries to buckets that triggers a resize.
pub const DEFAULT_LOAD_FACTOR: f32 = 0.75;

/// A key/value pair in which either side may be null.
pub type NullableEntry<K, V> = (Option<K>, Option<Arc<V>>);

/// Result of an internal insert.
pub(crate) struct PutOutcome<K, V> {
    /// `None` if the key was absent, `Some(None)` if it mapped to null.
    pub(crate) previous: Option<Option<Arc<V>>>,
    /// Entries evicted because the table exceeded its maximum size.
    pub(crate) evicted: Vec<NullableEntry<K, V>>,
}

pub(crate) enum TableEvent<K, V> {
    KeyExpired(Option<Arc<V>>),
    ValueExpired(Option<Arc<K>>),
    Overflow(Option<K>, Option<Arc<V>>),
}

/// Largest bucket count a table may need before it can hold one entry.
const MAX_FIRST_ENTRY_CAPACITY: usize = u32::MAX as usize;

pub(crate) fn validate_load_factor(load_factor: f32) -> Result<(), ConfigError> {
    if !(load_factor.is_finite() && load_factor > 0.0) {
        return Err(ConfigError::new(format!(
            "load factor must be finite and > 0, got {load_factor}"
        )));
    }
    if threshold_for(MAX_FIRST_ENTRY_CAPACITY, load_factor) == 0 {
        return Err(ConfigError::new(format!(
            "load factor {load_factor} is too small to hold a single entry"
        )));
    }
    Ok(())
}

#[inline]
fn threshold_for(capacity: usize, load_factor: f32) -> usize {
    (capacity as f64 * f64::from(load_factor)) as usize
}

// ---------------------------------------------------------------------------
// Slots and buckets
// ---------------------------------------------------------------------------

struct Slot<K, V> {
    hash: u64,
    key: Ref<K>,
    value: Ref<V>,
}

impl<K, V> Slot<K, V>
where
    K: Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn matches(&self, hash: u64, key: Option<&K>) -> bool {
        if self.hash != hash {
            return false;
        }
        match (self.key.resolve(), key) {
            (Resolved::Null, None) => true,
            (Resolved::Live(held), Some(wanted)) => *held == *wanted,
            _ => false,
        }
    }

    /// Resolves both holders once: the live pair, or the event to report if
    /// either side is gone.
    fn resolve_pair(&self) -> Result<(Option<Arc<K>>, Option<Arc<V>>), TableEvent<K, V>> {
        match (self.key.resolve(), self.value.resolve()) {
            (Resolved::Reclaimed, value) => Err(TableEvent::KeyExpired(value.into_option())),
            (key, Resolved::Reclaimed) => Err(TableEvent::ValueExpired(key.into_option())),
            (key, value) => Ok((key.into_option(), value.into_option())),
        }
    }

    fn is_stale(&self) -> bool {
        self.key.is_reclaimed() || self.value.is_reclaimed()
    }

    /// The event to report if this slot has lost its key or value.
    fn expiration(&self) -> Option<TableEvent<K, V>> {
        if self.key.is_reclaimed() {
            Some(TableEvent::KeyExpired(self.value.get()))
        } else if self.value.is_reclaimed() {
            Some(TableEvent::ValueExpired(self.key.get()))
        } else {
            None
        }
    }
}

struct Buckets<K, V> {
    buckets: Vec<Vec<Slot<K, V>>>,
    count: usize,
    threshold: usize,
    load_factor: f32,
    max_size: Option<usize>,
    cursor: EvictionCursor,
}

impl<K, V> Buckets<K, V>
where
    K: Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn with_capacity(
        capacity: usize,
        load_factor: f32,
        max_size: Option<usize>,
        cursor: EvictionCursor,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            buckets: (0..capacity).map(|_| Vec::new()).collect(),
            count: 0,
            threshold: threshold_for(capacity, load_factor),
            load_factor,
            max_size,
            cursor,
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn index_of(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }

    fn position(&self, idx: usize, hash: u64, key: Option<&K>) -> Option<usize> {
        self.buckets[idx]
            .iter()
            .position(|slot| slot.matches(hash, key))
    }

    /// Drops stale slots from one bucket. Returns how many were dropped.
    fn purge(&mut self, idx: usize, events: &mut Vec<TableEvent<K, V>>) -> usize {
        let bucket = &mut self.buckets[idx];
        let before = bucket.len();
        bucket.retain(|slot| match slot.expiration() {
            Some(event) => {
                events.push(event);
                false
            },
            None => true,
        });
        let purged = before - bucket.len();
        self.count -= purged;
        purged
    }

    fn purge_all(&mut self, events: &mut Vec<TableEvent<K, V>>) -> usize {
        (0..self.buckets.len())
            .map(|idx| self.purge(idx, events))
            .sum()
    }

    fn rehash(&mut self, capacity: usize, events: &mut Vec<TableEvent<K, V>>) {
        let old = std::mem::replace(
            &mut self.buckets,
            (0..capacity).map(|_| Vec::new()).collect(),
        );
        self.count = 0;
        for slot in old.into_iter().flatten() {
            if let Some(event) = slot.expiration() {
                events.push(event);
                continue;
            }
            let idx = (slot.hash % capacity as u64) as usize;
            self.buckets[idx].push(slot);
            self.count += 1;
        }
        self.threshold = threshold_for(capacity, self.load_factor);
    }

    /// Removes the first live slot of bucket `idx`, purging stale heads.
    fn pop_live_head(
        &mut self,
        idx: usize,
        events: &mut Vec<TableEvent<K, V>>,
    ) -> Option<(Option<Arc<K>>, Option<Arc<V>>)> {
        while !self.buckets[idx].is_empty() {
            let slot = self.buckets[idx].remove(0);
            self.count -= 1;
            match slot.resolve_pair() {
                Ok(entry) => return Some(entry),
                Err(event) => events.push(event),
            }
        }
        None
    }

    /// Nearest-index probe from the next pseudo-random target.
    ///
    /// The cursor advances exactly once per call, even on an empty table.
    fn remove_near_random(
        &mut self,
        events: &mut Vec<TableEvent<K, V>>,
    ) -> Option<(Option<Arc<K>>, Option<Arc<V>>)> {
        let capacity = self.capacity();
        let target = self.cursor.next_target(capacity);
        if self.count == 0 {
            return None;
        }
        if let Some(entry) = self.pop_live_head(target, events) {
            return Some(entry);
        }
        for distance in 1..capacity {
            if distance <= target {
                if let Some(entry) = self.pop_live_head(target - distance, events) {
                    return Some(entry);
                }
            }
            if target + distance < capacity {
                if let Some(entry) = self.pop_live_head(target + distance, events) {
                    return Some(entry);
                }
            }
            if self.count == 0 {
                break;
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// TableCore
// ---------------------------------------------------------------------------

/// State shared between a table and its views.
pub(crate) struct TableCore<K, V> {
    inner: RwLock<Buckets<K, V>>,
    key_strength: ReferenceStrength,
    value_strength: ReferenceStrength,
    load_factor: f32,
    order: EvictionOrder,
    listener: Option<Arc<dyn TableListener<K, V>>>,
    reclaimer: Arc<MemoryReclaimer>,
    counters: StoreCounters,
    hasher: FxBuildHasher,
    swept_epoch: AtomicU64,
}

/// Everything needed to assemble a table; produced by the builder.
pub(crate) struct TableConfig<K, V> {
    pub(crate) key_strength: ReferenceStrength,
    pub(crate) value_strength: ReferenceStrength,
    pub(crate) initial_capacity: usize,
    pub(crate) load_factor: f32,
    pub(crate) max_size: Option<usize>,
    pub(crate) eviction_order: EvictionOrder,
    pub(crate) listener: Option<Arc<dyn TableListener<K, V>>>,
    pub(crate) reclaimer: Option<Arc<MemoryReclaimer>>,
    pub(crate) cursor: Option<EvictionCursor>,
}

impl<K, V> TableConfig<K, V> {
    pub(crate) fn new(key_strength: ReferenceStrength, value_strength: ReferenceStrength) -> Self {
        Self {
            key_strength,
            value_strength,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            load_factor: DEFAULT_LOAD_FACTOR,
            max_size: None,
            eviction_order: EvictionOrder::Insertion,
            listener: None,
            reclaimer: None,
            cursor: None,
        }
    }
}

impl<K, V> TableCore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn new(config: TableConfig<K, V>) -> Self {
        let cursor = config.cursor.unwrap_or_else(EvictionCursor::shared);
        let reclaimer = config
            .reclaimer
            .unwrap_or_else(|| Arc::new(MemoryReclaimer::new()));
        let swept_epoch = AtomicU64::new(reclaimer.epoch());
        Self {
            inner: RwLock::new(Buckets::with_capacity(
                config.initial_capacity,
                config.load_factor,
                config.max_size,
                cursor,
            )),
            key_strength: config.key_strength,
            value_strength: config.value_strength,
            load_factor: config.load_factor,
            order: config.eviction_order,
            listener: config.listener,
            reclaimer,
            counters: StoreCounters::default(),
            hasher: FxBuildHasher,
            swept_epoch,
        }
    }

    fn duplicate(&self) -> Self {
        let inner = self.inner.read();
        let mut copy = Buckets::with_capacity(
            inner.capacity(),
            self.load_factor,
            inner.max_size,
            inner.cursor.clone(),
        );
        for (idx, bucket) in inner.buckets.iter().enumerate() {
            for slot in bucket.iter().filter(|slot| !slot.is_stale()) {
                copy.buckets[idx].push(Slot {
                    hash: slot.hash,
                    key: slot.key.duplicate(&self.reclaimer),
                    value: slot.value.duplicate(&self.reclaimer),
                });
                copy.count += 1;
            }
        }
        Self {
            inner: RwLock::new(copy),
            key_strength: self.key_strength,
            value_strength: self.value_strength,
            load_factor: self.load_factor,
            order: self.order,
            listener: self.listener.clone(),
            reclaimer: self.reclaimer.clone(),
            counters: StoreCounters::default(),
            hasher: FxBuildHasher,
            swept_epoch: AtomicU64::new(self.reclaimer.epoch()),
        }
    }

    #[inline]
    fn hash_of(&self, key: Option<&K>) -> u64 {
        key.map_or(0, |key| self.hasher.hash_one(key))
    }

    fn has_reclaimable_side(&self) -> bool {
        !(self.key_strength.is_strong() && self.value_strength.is_strong())
    }

    fn check_nulls(&self, key_is_null: bool, value_is_null: bool) -> Result<(), TableError> {
        if key_is_null && !self.key_strength.is_strong() {
            return Err(TableError::InvalidArgument(
                "null key on a table with reclaimable keys".into(),
            ));
        }
        if value_is_null && !self.value_strength.is_strong() {
            return Err(TableError::InvalidArgument(
                "null value on a table with reclaimable values".into(),
            ));
        }
        Ok(())
    }

    fn dispatch(&self, events: Vec<TableEvent<K, V>>) {
        for event in events {
            match event {
                TableEvent::KeyExpired(value) => {
                    self.counters.add_expirations(1);
                    if let Some(listener) = &self.listener {
                        listener.key_expired(value.as_deref());
                    }
                },
                TableEvent::ValueExpired(key) => {
                    self.counters.add_expirations(1);
                    if let Some(listener) = &self.listener {
                        listener.value_expired(key.as_deref());
                    }
                },
                TableEvent::Overflow(key, value) => {
                    if let Some(listener) = &self.listener {
                        listener.overflow_removed(key.as_ref(), value.as_deref());
                    }
                },
            }
        }
    }

    fn to_entry(key: Option<Arc<K>>, value: Option<Arc<V>>) -> NullableEntry<K, V> {
        (key.map(|key| K::clone(&key)), value)
    }

    fn grow_if_needed(&self, inner: &mut Buckets<K, V>, events: &mut Vec<TableEvent<K, V>>) {
        while inner.count > inner.threshold {
            let old_capacity = inner.capacity();
            let new_capacity = old_capacity.saturating_mul(2).saturating_add(1);
            inner.rehash(new_capacity, events);
            self.counters.inc_resize();
            log::trace!(
                "reference table resized {old_capacity} -> {new_capacity} buckets ({} entries)",
                inner.count
            );
        }
    }

    fn enforce_max_size(
        &self,
        inner: &mut Buckets<K, V>,
        events: &mut Vec<TableEvent<K, V>>,
        evicted: &mut Vec<NullableEntry<K, V>>,
    ) {
        while let Some(max) = inner.max_size {
            if inner.count <= max {
                break;
            }
            let Some((key, value)) = inner.remove_near_random(events) else {
                break;
            };
            self.counters.inc_eviction();
            let entry = Self::to_entry(key, value);
            log::trace!("reference table over max size {max}, evicted one entry");
            events.push(TableEvent::Overflow(entry.0.clone(), entry.1.clone()));
            evicted.push(entry);
        }
    }

    pub(crate) fn insert(
        &self,
        key: Option<K>,
        value: Option<Arc<V>>,
    ) -> Result<PutOutcome<K, V>, TableError> {
        self.check_nulls(key.is_none(), value.is_none())?;
        let hash = self.hash_of(key.as_ref());
        let mut events = Vec::new();
        let mut evicted = Vec::new();
        let previous = {
            let mut inner = self.inner.write();
            let idx = inner.index_of(hash);
            inner.purge(idx, &mut events);
            match inner.position(idx, hash, key.as_ref()) {
                Some(pos) => {
                    let new_value = Ref::new(value, self.value_strength, &self.reclaimer);
                    let bucket = &mut inner.buckets[idx];
                    let old = std::mem::replace(&mut bucket[pos].value, new_value).get();
                    if self.order == EvictionOrder::Recency {
                        let slot = bucket.remove(pos);
                        bucket.push(slot);
                    }
                    self.counters.inc_update();
                    Some(old)
                },
                None => {
                    let slot = Slot {
                        hash,
                        key: Ref::new(key.map(Arc::new), self.key_strength, &self.reclaimer),
                        value: Ref::new(value, self.value_strength, &self.reclaimer),
                    };
                    inner.buckets[idx].push(slot);
                    inner.count += 1;
                    self.counters.inc_insert();
                    self.grow_if_needed(&mut inner, &mut events);
                    self.enforce_max_size(&mut inner, &mut events, &mut evicted);
                    None
                },
            }
        };
        self.dispatch(events);
        Ok(PutOutcome { previous, evicted })
    }

    pub(crate) fn lookup(&self, key: Option<&K>) -> Option<Option<Arc<V>>> {
        if key.is_none() && !self.key_strength.is_strong() {
            self.counters.inc_miss();
            return None;
        }
        let hash = self.hash_of(key);
        let (idx, found, saw_stale) = {
            let inner = self.inner.read();
            let idx = inner.index_of(hash);
            let mut saw_stale = false;
            let mut found = None;
            for slot in &inner.buckets[idx] {
                if slot.matches(hash, key) {
                    match slot.value.resolve() {
                        Resolved::Live(value) => found = Some(Some(value)),
                        Resolved::Null => found = Some(None),
                        Resolved::Reclaimed => saw_stale = true,
                    }
                    break;
                }
                saw_stale |= slot.is_stale();
            }
            (idx, found, saw_stale)
        };

        if saw_stale {
            self.purge_bucket(idx);
        }
        match found {
            Some(value) => {
                self.counters.inc_hit();
                if self.order == EvictionOrder::Recency {
                    self.touch(hash, key);
                }
                Some(value)
            },
            None => {
                self.counters.inc_miss();
                None
            },
        }
    }

    /// Moves a hit slot to its bucket tail without waiting for the lock.
    fn touch(&self, hash: u64, key: Option<&K>) {
        if let Some(mut inner) = self.inner.try_write() {
            let idx = inner.index_of(hash);
            if let Some(pos) = inner.position(idx, hash, key) {
                let bucket = &mut inner.buckets[idx];
                if pos + 1 != bucket.len() {
                    let slot = bucket.remove(pos);
                    bucket.push(slot);
                }
            }
        }
    }

    fn purge_bucket(&self, idx: usize) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.write();
            if idx < inner.capacity() {
                inner.purge(idx, &mut events);
            }
        }
        self.dispatch(events);
    }

    pub(crate) fn contains_key(&self, key: Option<&K>) -> bool {
        if key.is_none() && !self.key_strength.is_strong() {
            return false;
        }
        let hash = self.hash_of(key);
        let inner = self.inner.read();
        let idx = inner.index_of(hash);
        inner.buckets[idx]
            .iter()
            .any(|slot| slot.matches(hash, key) && !slot.value.is_reclaimed())
    }

    pub(crate) fn any_value(&self, mut predicate: impl FnMut(Option<&V>) -> bool) -> bool {
        let inner = self.inner.read();
        inner.buckets.iter().flatten().any(|slot| {
            if slot.key.is_reclaimed() {
                return false;
            }
            match slot.value.resolve() {
                Resolved::Live(value) => predicate(Some(value.as_ref())),
                Resolved::Null => predicate(None),
                Resolved::Reclaimed => false,
            }
        })
    }

    /// Removes `key`. `None` if absent, `Some(None)` if it mapped to null.
    pub(crate) fn remove_entry(&self, key: Option<&K>) -> Option<Option<Arc<V>>> {
        if key.is_none() && !self.key_strength.is_strong() {
            return None;
        }
        let hash = self.hash_of(key);
        let mut events = Vec::new();
        let removed = {
            let mut inner = self.inner.write();
            let idx = inner.index_of(hash);
            inner.purge(idx, &mut events);
            inner.position(idx, hash, key).map(|pos| {
                let slot = inner.buckets[idx].remove(pos);
                inner.count -= 1;
                self.counters.inc_remove();
                slot.value.get()
            })
        };
        self.dispatch(events);
        removed
    }

    /// Removes `key` only while `accept` approves its current value.
    pub(crate) fn remove_if(&self, key: Option<&K>, accept: impl FnOnce(Option<&V>) -> bool) -> bool {
        if key.is_none() && !self.key_strength.is_strong() {
            return false;
        }
        let hash = self.hash_of(key);
        let mut events = Vec::new();
        let removed = {
            let mut inner = self.inner.write();
            let idx = inner.index_of(hash);
            inner.purge(idx, &mut events);
            let accepted = inner
                .position(idx, hash, key)
                .filter(|&pos| accept(inner.buckets[idx][pos].value.get().as_deref()));
            match accepted {
                Some(pos) => {
                    inner.buckets[idx].remove(pos);
                    inner.count -= 1;
                    self.counters.inc_remove();
                    true
                },
                None => false,
            }
        };
        self.dispatch(events);
        removed
    }

    pub(crate) fn remove_random(&self) -> Option<NullableEntry<K, V>> {
        let mut events = Vec::new();
        let removed = {
            let mut inner = self.inner.write();
            inner.remove_near_random(&mut events)
        };
        self.dispatch(events);
        removed.map(|(key, value)| {
            self.counters.inc_eviction();
            Self::to_entry(key, value)
        })
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.inner.write();
        for bucket in &mut inner.buckets {
            bucket.clear();
        }
        inner.count = 0;
    }

    /// Purges every stale slot. Unless `force` is set, this only happens when
    /// the reclaimer has cleared something since the previous sweep.
    pub(crate) fn sweep(&self, force: bool) -> usize {
        if !self.has_reclaimable_side() {
            return 0;
        }
        let epoch = self.reclaimer.epoch();
        if !force && self.swept_epoch.load(Ordering::Acquire) == epoch {
            return 0;
        }
        let mut events = Vec::new();
        let purged = {
            let mut inner = self.inner.write();
            let purged = inner.purge_all(&mut events);
            self.swept_epoch.store(epoch, Ordering::Release);
            purged
        };
        if purged > 0 {
            log::debug!("reference table purged {purged} reclaimed slots");
        }
        self.dispatch(events);
        purged
    }

    pub(crate) fn len(&self) -> usize {
        self.sweep(false);
        self.inner.read().count
    }

    pub(crate) fn capacity(&self) -> usize {
        self.inner.read().capacity()
    }

    pub(crate) fn max_size(&self) -> Option<usize> {
        self.inner.read().max_size
    }

    pub(crate) fn set_max_size(&self, max_size: Option<usize>) -> Vec<NullableEntry<K, V>> {
        let mut events = Vec::new();
        let mut evicted = Vec::new();
        {
            let mut inner = self.inner.write();
            inner.max_size = max_size;
            self.enforce_max_size(&mut inner, &mut events, &mut evicted);
        }
        self.dispatch(events);
        evicted
    }

    fn live_entry(slot: &Slot<K, V>) -> Option<NullableEntry<K, V>> {
        let (key, value) = slot.resolve_pair().ok()?;
        Some(Self::to_entry(key, value))
    }

    /// Live entries at the moment of the call.
    pub(crate) fn snapshot(&self) -> Vec<NullableEntry<K, V>> {
        let inner = self.inner.read();
        inner
            .buckets
            .iter()
            .flatten()
            .filter_map(Self::live_entry)
            .collect()
    }

    /// Live entries in bucket order, starting at the next pseudo-random
    /// bucket and wrapping around. Advances the cursor once.
    pub(crate) fn random_snapshot(&self) -> Vec<NullableEntry<K, V>> {
        let mut inner = self.inner.write();
        let capacity = inner.capacity();
        let start = inner.cursor.next_target(capacity);
        let (before, after) = inner.buckets.split_at(start);
        after
            .iter()
            .chain(before)
            .flatten()
            .filter_map(Self::live_entry)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ConcurrentReferenceTable
// ---------------------------------------------------------------------------

/// Thread-safe hash table whose keys and values are held strongly or
/// reclaimably.
///
/// See the [module documentation](self) for the locking and eviction model.
pub struct ConcurrentReferenceTable<K, V> {
    core: Arc<TableCore<K, V>>,
    keys: KeyView<K, V>,
    values: ValueView<K, V>,
    entries: EntryView<K, V>,
}

impl<K, V> ConcurrentReferenceTable<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a table with capacity 16 and load factor 0.75.
    pub fn new(key_strength: ReferenceStrength, value_strength: ReferenceStrength) -> Self {
        Self::from_config(TableConfig::new(key_strength, value_strength))
    }

    /// Creates a table with an explicit initial capacity and load factor.
    ///
    /// A capacity of `0` is treated as `1`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `load_factor` is not finite or not positive.
    pub fn try_with_capacity(
        key_strength: ReferenceStrength,
        value_strength: ReferenceStrength,
        initial_capacity: usize,
        load_factor: f32,
    ) -> Result<Self, ConfigError> {
        Self::builder(key_strength, value_strength)
            .initial_capacity(initial_capacity)
            .load_factor(load_factor)
            .try_build()
    }

    /// Starts a [`ReferenceTableBuilder`].
    pub fn builder(
        key_strength: ReferenceStrength,
        value_strength: ReferenceStrength,
    ) -> ReferenceTableBuilder<K, V> {
        ReferenceTableBuilder::new(key_strength, value_strength)
    }

    pub(crate) fn from_config(config: TableConfig<K, V>) -> Self {
        Self::from_core(Arc::new(TableCore::new(config)))
    }

    fn from_core(core: Arc<TableCore<K, V>>) -> Self {
        Self {
            keys: KeyView::new(core.clone()),
            values: ValueView::new(core.clone()),
            entries: EntryView::new(core.clone()),
            core,
        }
    }

    // -- lookup ---------------------------------------------------------------

    /// Returns the value for `key`. A null value reads as `None`.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.core.lookup(Some(key)).flatten()
    }

    /// Nullable lookup. A null key on a table with reclaimable keys is simply
    /// not found.
    pub fn get_nullable(&self, key: Option<&K>) -> Option<Arc<V>> {
        self.core.lookup(key).flatten()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.core.contains_key(Some(key))
    }

    pub fn contains_key_nullable(&self, key: Option<&K>) -> bool {
        self.core.contains_key(key)
    }

    /// Linear scan for an equal value.
    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.core.any_value(|held| held == Some(value))
    }

    /// Whether any live key maps to a null value.
    pub fn contains_null_value(&self) -> bool {
        self.core.any_value(|held| held.is_none())
    }

    // -- mutation -------------------------------------------------------------

    /// Inserts or replaces `key`, returning the previous value.
    ///
    /// May resize the table and, if a maximum size is set, evict one entry
    /// (reported through [`TableListener::overflow_removed`]).
    pub fn put(&self, key: K, value: V) -> Option<Arc<V>> {
        self.put_arc(key, Arc::new(value))
    }

    /// [`put`](Self::put) with a value that is already shared.
    pub fn put_arc(&self, key: K, value: Arc<V>) -> Option<Arc<V>> {
        self.core
            .insert(Some(key), Some(value))
            .map(|outcome| outcome.previous.flatten())
            .unwrap_or_default()
    }

    /// Nullable insert.
    ///
    /// # Errors
    ///
    /// [`TableError::InvalidArgument`] if `key` is null and keys are
    /// reclaimable, or `value` is null and values are reclaimable.
    pub fn put_nullable(&self, key: Option<K>, value: Option<V>) -> Result<Option<Arc<V>>, TableError> {
        let outcome = self.core.insert(key, value.map(Arc::new))?;
        Ok(outcome.previous.flatten())
    }

    /// Insert used by the tiered cache. A null value on a reclaimable-value
    /// table is dropped.
    pub(crate) fn insert_entry(&self, key: K, value: Option<Arc<V>>) -> PutOutcome<K, V> {
        self.core
            .insert(Some(key), value)
            .unwrap_or_else(|_| PutOutcome {
                previous: None,
                evicted: Vec::new(),
            })
    }

    /// Inserts every pair from `source` in iteration order.
    ///
    /// # Errors
    ///
    /// [`TableError::NullArgument`] if `source` is `None`.
    pub fn put_all<I>(&self, source: Option<I>) -> Result<(), TableError>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let source = source.ok_or_else(|| TableError::NullArgument("put_all source".into()))?;
        for (key, value) in source {
            self.put(key, value);
        }
        Ok(())
    }

    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.core.remove_entry(Some(key)).flatten()
    }

    pub fn remove_nullable(&self, key: Option<&K>) -> Option<Arc<V>> {
        self.core.remove_entry(key).flatten()
    }

    /// `None` if absent, `Some(None)` if `key` mapped to null.
    pub(crate) fn remove_entry(&self, key: &K) -> Option<Option<Arc<V>>> {
        self.core.remove_entry(Some(key))
    }

    /// Removes the entry nearest to the next pseudo-random bucket index.
    ///
    /// Returns `None` only when the table holds no live entries.
    pub fn remove_random(&self) -> Option<NullableEntry<K, V>> {
        self.core.remove_random()
    }

    /// Purges every slot whose key or value has been reclaimed. Returns the
    /// number of slots purged.
    pub fn remove_expired(&self) -> usize {
        self.core.sweep(true)
    }

    /// Removes every entry. Capacity is kept.
    pub fn clear(&self) {
        self.core.clear();
    }

    // -- configuration --------------------------------------------------------

    /// Sets or removes the maximum size, evicting until it holds. Returns the
    /// evicted entries.
    pub fn set_max_size(&self, max_size: Option<usize>) -> Vec<NullableEntry<K, V>> {
        self.core.set_max_size(max_size)
    }

    pub fn max_size(&self) -> Option<usize> {
        self.core.max_size()
    }

    // -- introspection --------------------------------------------------------

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current bucket-array length.
    pub fn capacity(&self) -> usize {
        self.core.capacity()
    }

    pub fn load_factor(&self) -> f32 {
        self.core.load_factor
    }

    pub fn key_strength(&self) -> ReferenceStrength {
        self.core.key_strength
    }

    pub fn value_strength(&self) -> ReferenceStrength {
        self.core.value_strength
    }

    pub fn eviction_order(&self) -> EvictionOrder {
        self.core.order
    }

    /// Index of the next shared fraction `remove_random` will use.
    pub fn eviction_cursor(&self) -> usize {
        self.core.inner.read().cursor.position()
    }

    pub fn reclaimer(&self) -> &Arc<MemoryReclaimer> {
        &self.core.reclaimer
    }

    pub fn metrics(&self) -> StoreMetrics {
        self.core.counters.snapshot()
    }

    // -- views ----------------------------------------------------------------

    /// Key view. Always the same instance for this table.
    pub fn keys(&self) -> &KeyView<K, V> {
        &self.keys
    }

    /// Value view. Always the same instance for this table.
    pub fn values(&self) -> &ValueView<K, V> {
        &self.values
    }

    /// Entry view. Always the same instance for this table.
    pub fn entries(&self) -> &EntryView<K, V> {
        &self.entries
    }

    /// Iterates the live entries starting from the bucket the next
    /// pseudo-random fraction points at, wrapping around the bucket array.
    ///
    /// Uses up one position of the eviction cursor, like
    /// [`remove_random`](Self::remove_random). Yields nothing on an empty
    /// table.
    pub fn random_entries(&self) -> ViewIter<K, V, NullableEntry<K, V>> {
        ViewIter::from_snapshot(&self.core, self.core.random_snapshot(), |entry| entry)
    }

    pub(crate) fn snapshot(&self) -> Vec<NullableEntry<K, V>> {
        self.core.snapshot()
    }

    /// Validates internal invariants (debug-only).
    #[cfg(debug_assertions)]
    pub fn check_invariants(&self) -> Result<(), crate::error::InvariantError> {
        use crate::error::InvariantError;

        let inner = self.core.inner.read();
        let capacity = inner.capacity();
        if capacity == 0 {
            return Err(InvariantError::new("bucket array is empty"));
        }
        let slots: usize = inner.buckets.iter().map(Vec::len).sum();
        if slots != inner.count {
            return Err(InvariantError::new(format!(
                "count {} != {} slots in buckets",
                inner.count, slots
            )));
        }
        if inner.threshold != threshold_for(capacity, self.core.load_factor) {
            return Err(InvariantError::new(format!(
                "threshold {} does not match capacity {} * load factor {}",
                inner.threshold, capacity, self.core.load_factor
            )));
        }
        if inner.count > inner.threshold {
            return Err(InvariantError::new(format!(
                "count {} exceeds resize threshold {}",
                inner.count, inner.threshold
            )));
        }
        if let Some(max) = inner.max_size {
            if inner.count > max {
                return Err(InvariantError::new(format!(
                    "count {} exceeds max size {}",
                    inner.count, max
                )));
            }
        }
        for (idx, bucket) in inner.buckets.iter().enumerate() {
            if let Some(slot) = bucket.iter().find(|slot| inner.index_of(slot.hash) != idx) {
                return Err(InvariantError::new(format!(
                    "slot with hash {:#x} found in bucket {} instead of {}",
                    slot.hash,
                    idx,
                    inner.index_of(slot.hash)
                )));
            }
        }
        Ok(())
    }
}

impl<K, V> Clone for ConcurrentReferenceTable<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Copies every live entry into an independent table with the same
    /// capacity, configuration, listener and reclaimer.
    fn clone(&self) -> Self {
        Self::from_core(Arc::new(self.core.duplicate()))
    }
}

impl<K, V> fmt::Debug for ConcurrentReferenceTable<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.core.inner.read();
        f.debug_struct("ConcurrentReferenceTable")
            .field("key_strength", &self.core.key_strength)
            .field("value_strength", &self.core.value_strength)
            .field("len", &inner.count)
            .field("capacity", &inner.buckets.len())
            .field("load_factor", &self.core.load_factor)
            .field("max_size", &inner.max_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ds::fractions::fixed_fractions;
    use parking_lot::Mutex;

    use ReferenceStrength::{Reclaimable, Strong};

    #[derive(Default)]
    struct Recorder {
        key_expired: Mutex<Vec<Option<String>>>,
        value_expired: Mutex<Vec<Option<u32>>>,
        overflow: Mutex<Vec<(Option<u32>, Option<String>)>>,
    }

    impl TableListener<u32, String> for Recorder {
        fn key_expired(&self, value: Option<&String>) {
            self.key_expired.lock().push(value.cloned());
        }

        fn value_expired(&self, key: Option<&u32>) {
            self.value_expired.lock().push(key.copied());
        }

        fn overflow_removed(&self, key: Option<&u32>, value: Option<&String>) {
            self.overflow.lock().push((key.copied(), value.cloned()));
        }
    }

    fn strong_table() -> ConcurrentReferenceTable<u32, String> {
        ConcurrentReferenceTable::new(Strong, Strong)
    }

    // ==============================================
    // Basic Operations
    // ==============================================

    mod basic_operations {
        use super::*;

        #[test]
        fn put_get_remove_roundtrip() {
            let table = strong_table();
            assert_eq!(table.put(1, "one".into()), None);
            assert_eq!(table.get(&1).as_deref().map(String::as_str), Some("one"));
            assert!(table.contains_key(&1));
            assert_eq!(table.len(), 1);

            assert_eq!(table.remove(&1).as_deref().map(String::as_str), Some("one"));
            assert!(!table.contains_key(&1));
            assert!(table.is_empty());
            assert_eq!(table.remove(&1), None);
        }

        #[test]
        fn put_returns_previous_value() {
            let table = strong_table();
            table.put(7, "a".into());
            let old = table.put(7, "b".into());
            assert_eq!(old.as_deref().map(String::as_str), Some("a"));
            assert_eq!(table.get(&7).as_deref().map(String::as_str), Some("b"));
            assert_eq!(table.len(), 1);
        }

        #[test]
        fn contains_value_scans_live_values() {
            let table = strong_table();
            table.put(1, "x".into());
            table.put(2, "y".into());
            assert!(table.contains_value(&"y".to_string()));
            assert!(!table.contains_value(&"z".to_string()));
        }

        #[test]
        fn clear_keeps_capacity() {
            let table = strong_table();
            for i in 0..40 {
                table.put(i, i.to_string());
            }
            let capacity = table.capacity();
            table.clear();
            assert!(table.is_empty());
            assert_eq!(table.capacity(), capacity);
            assert_eq!(table.get(&3), None);
        }

        #[test]
        fn put_all_inserts_in_order_and_rejects_absent_source() {
            let table = strong_table();
            table
                .put_all(Some(vec![(1, "a".to_string()), (1, "b".to_string()), (2, "c".to_string())]))
                .unwrap();
            assert_eq!(table.len(), 2);
            assert_eq!(table.get(&1).as_deref().map(String::as_str), Some("b"));

            let err = table.put_all::<Vec<(u32, String)>>(None).unwrap_err();
            assert!(matches!(err, TableError::NullArgument(_)));
        }

        #[test]
        fn debug_lists_configuration() {
            let table = strong_table();
            table.put(1, "a".into());
            let text = format!("{table:?}");
            assert!(text.contains("ConcurrentReferenceTable"));
            assert!(text.contains("capacity: 16"));
            assert!(text.contains("len: 1"));
        }
    }

    // ==============================================
    // Null Keys and Values
    // ==============================================

    mod nulls {
        use super::*;

        #[test]
        fn strong_keys_accept_null_key() {
            let table = strong_table();
            assert_eq!(table.put_nullable(None, Some("nil".into())).unwrap(), None);
            assert!(table.contains_key_nullable(None));
            assert_eq!(
                table.get_nullable(None).as_deref().map(String::as_str),
                Some("nil")
            );
            assert_eq!(table.keys().iter().collect::<Vec<_>>(), vec![None]);
            assert_eq!(
                table.remove_nullable(None).as_deref().map(String::as_str),
                Some("nil")
            );
            assert!(table.is_empty());
        }

        #[test]
        fn strong_values_accept_null_value() {
            let table = strong_table();
            table.put_nullable(Some(3), None).unwrap();
            assert!(table.contains_key(&3));
            assert!(table.contains_null_value());
            assert_eq!(table.get(&3), None);
            assert_eq!(table.len(), 1);
        }

        #[test]
        fn reclaimable_keys_reject_null_key() {
            let table: ConcurrentReferenceTable<u32, String> =
                ConcurrentReferenceTable::new(Reclaimable, Strong);
            let err = table.put_nullable(None, Some("v".into())).unwrap_err();
            assert!(matches!(err, TableError::InvalidArgument(_)));
            assert_eq!(table.get_nullable(None), None);
            assert!(!table.contains_key_nullable(None));
            assert_eq!(table.remove_nullable(None), None);
            assert!(table.is_empty());
        }

        #[test]
        fn reclaimable_values_reject_null_value() {
            let table: ConcurrentReferenceTable<u32, String> =
                ConcurrentReferenceTable::new(Strong, Reclaimable);
            let err = table.put_nullable(Some(1), None).unwrap_err();
            assert!(matches!(err, TableError::InvalidArgument(_)));
            assert!(table.is_empty());
        }
    }

    // ==============================================
    // Resizing
    // ==============================================

    mod resizing {
        use super::*;

        #[test]
        fn capacity_follows_double_plus_one() {
            let table: ConcurrentReferenceTable<u32, u32> =
                ConcurrentReferenceTable::try_with_capacity(Strong, Strong, 10, 0.75).unwrap();
            let expected = [
                (8, 21),
                (16, 43),
                (33, 87),
                (66, 175),
                (132, 351),
                (264, 703),
                (528, 1407),
            ];
            let mut inserted = 0;
            for (size, capacity) in expected {
                while inserted < size - 1 {
                    table.put(inserted, inserted);
                    inserted += 1;
                }
                assert!(table.capacity() < capacity);
                table.put(inserted, inserted);
                inserted += 1;
                assert_eq!(table.capacity(), capacity, "after {size} entries");
            }
        }

        #[test]
        fn two_thousand_entries_reach_capacity_2815() {
            let table: ConcurrentReferenceTable<u32, u32> =
                ConcurrentReferenceTable::try_with_capacity(Strong, Strong, 10, 0.75).unwrap();
            for i in 0..2000 {
                table.put(i, i);
            }
            assert_eq!(table.len(), 2000);
            assert_eq!(table.capacity(), 2815);
            assert_eq!(table.metrics().resizes, 8);
            #[cfg(debug_assertions)]
            table.check_invariants().unwrap();
            for i in 0..2000 {
                assert_eq!(table.get(&i).as_deref(), Some(&i));
            }
        }

        #[test]
        fn zero_capacity_becomes_one() {
            let table: ConcurrentReferenceTable<u32, u32> =
                ConcurrentReferenceTable::try_with_capacity(Strong, Strong, 0, 0.75).unwrap();
            assert_eq!(table.capacity(), 1);
            table.put(1, 1);
            assert_eq!(table.capacity(), 3);
        }

        #[test]
        fn invalid_load_factor_is_rejected() {
            for lf in [0.0, -0.5, f32::NAN, f32::INFINITY, 1e-30, f32::MIN_POSITIVE] {
                let result: Result<ConcurrentReferenceTable<u32, u32>, _> =
                    ConcurrentReferenceTable::try_with_capacity(Strong, Strong, 16, lf);
                assert!(result.is_err(), "load factor {lf}");
            }
        }

        #[test]
        fn small_load_factor_grows_until_one_entry_fits() {
            let table: ConcurrentReferenceTable<u32, u32> =
                ConcurrentReferenceTable::try_with_capacity(Strong, Strong, 16, 0.01).unwrap();
            table.put(1, 1);
            assert_eq!(table.capacity(), 135);
            assert_eq!(table.metrics().resizes, 3);
        }
    }

    // ==============================================
    // Random Removal and Overflow
    // ==============================================

    mod eviction {
        use super::*;

        #[test]
        fn remove_random_on_empty_table_still_advances_cursor() {
            let table = strong_table();
            assert_eq!(table.eviction_cursor(), 0);
            assert_eq!(table.remove_random(), None);
            assert_eq!(table.eviction_cursor(), 1);
        }

        #[test]
        fn random_entries_rotate_from_the_cursor_bucket() {
            let table: ConcurrentReferenceTable<u32, String> =
                ConcurrentReferenceTable::builder(Strong, Strong)
                    .initial_capacity(8)
                    .load_factor(100.0)
                    .random_fractions(fixed_fractions(&[0.5, 0.0]).unwrap())
                    .build();
            for i in 0..20 {
                table.put(i, i.to_string());
            }
            let expected: Vec<u32> = {
                let inner = table.core.inner.read();
                inner.buckets[4..]
                    .iter()
                    .chain(&inner.buckets[..4])
                    .flatten()
                    .filter_map(|slot| slot.key.get().map(|key| *key))
                    .collect()
            };

            let keys: Vec<u32> = table
                .random_entries()
                .map(|(key, _)| key.unwrap())
                .collect();
            assert_eq!(keys, expected);
            assert_eq!(keys.len(), 20);
            assert_eq!(table.eviction_cursor(), 1);
            assert_eq!(table.len(), 20);
        }

        #[test]
        fn random_entries_on_empty_table_yield_nothing() {
            let table = strong_table();
            assert_eq!(table.random_entries().count(), 0);
            assert_eq!(table.eviction_cursor(), 1);
        }

        #[test]
        fn remove_random_removes_exactly_one_live_entry() {
            let table = strong_table();
            for i in 0..10 {
                table.put(i, i.to_string());
            }
            let (key, value) = table.remove_random().unwrap();
            let key = key.unwrap();
            assert_eq!(value.as_deref(), Some(&key.to_string()));
            assert!(!table.contains_key(&key));
            assert_eq!(table.len(), 9);
            assert_eq!(table.metrics().evictions, 1);
        }

        #[test]
        fn recency_order_spares_recently_read_entries() {
            let table: ConcurrentReferenceTable<u32, String> =
                ConcurrentReferenceTable::builder(Strong, Strong)
                    .initial_capacity(1)
                    .load_factor(100.0)
                    .eviction_order(EvictionOrder::Recency)
                    .build();
            table.put(1, "a".into());
            table.put(2, "b".into());
            table.put(3, "c".into());
            table.get(&1);

            let (key, _) = table.remove_random().unwrap();
            assert_eq!(key, Some(2));
        }

        #[test]
        fn insertion_order_evicts_bucket_head() {
            let table: ConcurrentReferenceTable<u32, String> =
                ConcurrentReferenceTable::builder(Strong, Strong)
                    .initial_capacity(1)
                    .load_factor(100.0)
                    .build();
            table.put(1, "a".into());
            table.put(2, "b".into());
            table.get(&1);

            let (key, _) = table.remove_random().unwrap();
            assert_eq!(key, Some(1));
        }

        #[test]
        fn overflow_evicts_and_notifies() {
            let recorder = Arc::new(Recorder::default());
            let table: ConcurrentReferenceTable<u32, String> =
                ConcurrentReferenceTable::builder(Strong, Strong)
                    .max_size(Some(3))
                    .listener(recorder.clone())
                    .build();
            for i in 0..5 {
                table.put(i, i.to_string());
                assert!(table.len() <= 3);
            }
            assert_eq!(table.len(), 3);
            let overflow = recorder.overflow.lock();
            assert_eq!(overflow.len(), 2);
            for (key, value) in overflow.iter() {
                assert_eq!(key.map(|k| k.to_string()), value.clone());
                assert!(!table.contains_key(&key.unwrap()));
            }
        }

        #[test]
        fn shrinking_max_size_evicts_down_to_bound() {
            let table = strong_table();
            for i in 0..10 {
                table.put(i, i.to_string());
            }
            let evicted = table.set_max_size(Some(4));
            assert_eq!(evicted.len(), 6);
            assert_eq!(table.len(), 4);
            assert_eq!(table.max_size(), Some(4));
            for (key, _) in evicted {
                assert!(!table.contains_key(&key.unwrap()));
            }
            assert!(table.set_max_size(None).is_empty());
        }
    }

    // ==============================================
    // Reclaimable References
    // ==============================================

    mod reclaimable {
        use super::*;

        #[test]
        fn reclaimed_values_vanish_and_report_their_key() {
            let recorder = Arc::new(Recorder::default());
            let table: ConcurrentReferenceTable<u32, String> =
                ConcurrentReferenceTable::builder(Strong, Reclaimable)
                    .listener(recorder.clone())
                    .build();
            table.put(1, "a".into());
            table.put(2, "b".into());

            assert_eq!(table.reclaimer().reclaim_all(), 2);
            assert_eq!(table.get(&1), None);
            assert!(!table.contains_key(&2));
            assert_eq!(table.len(), 0);

            let mut expired = recorder.value_expired.lock().clone();
            expired.sort();
            assert_eq!(expired, vec![Some(1), Some(2)]);
            assert_eq!(table.metrics().expirations, 2);
        }

        #[test]
        fn reclaimed_keys_report_their_value() {
            let recorder = Arc::new(Recorder::default());
            let table: ConcurrentReferenceTable<u32, String> =
                ConcurrentReferenceTable::builder(Reclaimable, Strong)
                    .listener(recorder.clone())
                    .build();
            table.put(9, "nine".into());
            table.reclaimer().reclaim_all();

            assert_eq!(table.remove_expired(), 1);
            assert_eq!(
                recorder.key_expired.lock().as_slice(),
                &[Some("nine".to_string())]
            );
            assert!(table.is_empty());
        }

        #[test]
        fn overflow_eviction_reports_reclaimed_heads_as_expired() {
            let recorder = Arc::new(Recorder::default());
            let table: ConcurrentReferenceTable<u32, String> =
                ConcurrentReferenceTable::builder(Strong, Reclaimable)
                    .initial_capacity(1)
                    .load_factor(100.0)
                    .listener(recorder.clone())
                    .build();
            table.put(1, "a".into());
            table.put(2, "b".into());
            assert_eq!(table.reclaimer().reclaim(1), 1);

            let evicted = table.set_max_size(Some(1));
            assert_eq!(evicted, vec![(Some(2), Some(Arc::new("b".to_string())))]);
            assert_eq!(recorder.value_expired.lock().as_slice(), &[Some(1)]);
            assert_eq!(
                recorder.overflow.lock().as_slice(),
                &[(Some(2), Some("b".to_string()))]
            );
            assert_eq!(table.metrics().expirations, 1);
        }

        #[test]
        fn partial_reclaim_keeps_younger_entries() {
            let table: ConcurrentReferenceTable<u32, String> =
                ConcurrentReferenceTable::new(Strong, Reclaimable);
            table.put(1, "old".into());
            table.put(2, "new".into());

            assert_eq!(table.reclaimer().reclaim(1), 1);
            assert_eq!(table.len(), 1);
            assert!(table.contains_key(&2));
            assert_eq!(table.snapshot().len(), 1);
        }

        #[test]
        fn budgeted_reclaimer_bounds_live_values() {
            let table: ConcurrentReferenceTable<u32, String> =
                ConcurrentReferenceTable::builder(Strong, Reclaimable)
                    .reclaimer(Arc::new(MemoryReclaimer::with_budget(3)))
                    .build();
            for i in 0..10 {
                table.put(i, i.to_string());
            }
            assert_eq!(table.len(), 3);
        }

        #[test]
        fn strong_tables_never_lose_entries() {
            let table = strong_table();
            table.put(1, "a".into());
            table.reclaimer().reclaim_all();
            assert_eq!(table.len(), 1);
            assert_eq!(table.remove_expired(), 0);
        }
    }

    // ==============================================
    // Views and Cloning
    // ==============================================

    mod views_and_clone {
        use super::*;

        #[test]
        fn views_have_stable_identity() {
            let table = strong_table();
            assert!(std::ptr::eq(table.keys(), table.keys()));
            assert!(std::ptr::eq(table.values(), table.values()));
            assert!(std::ptr::eq(table.entries(), table.entries()));
        }

        #[test]
        fn clone_is_independent() {
            let table = strong_table();
            for i in 0..20 {
                table.put(i, i.to_string());
            }
            let copy = table.clone();
            assert_eq!(copy.len(), table.len());
            assert_eq!(copy.capacity(), table.capacity());
            assert!(!std::ptr::eq(copy.keys(), table.keys()));

            copy.remove(&0);
            table.put(100, "x".into());
            assert!(table.contains_key(&0));
            assert!(!copy.contains_key(&100));
        }

        #[test]
        fn clone_reregisters_reclaimable_values() {
            let table: ConcurrentReferenceTable<u32, String> =
                ConcurrentReferenceTable::new(Strong, Reclaimable);
            table.put(1, "a".into());
            let copy = table.clone();
            assert_eq!(table.reclaimer().tracked(), 2);
            assert!(Arc::ptr_eq(table.reclaimer(), copy.reclaimer()));
        }
    }

    // ==============================================
    // Metrics
    // ==============================================

    #[test]
    fn metrics_track_operations() {
        let table = strong_table();
        table.get(&1);
        table.put(1, "a".into());
        table.put(1, "b".into());
        table.get(&1);
        table.remove(&1);

        let metrics = table.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.inserts, 1);
        assert_eq!(metrics.updates, 1);
        assert_eq!(metrics.removes, 1);
    }

    // ==============================================
    // Property Tests
    // ==============================================

    mod property_tests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashMap;

        #[derive(Debug, Clone)]
        enum Op {
            Put(u32, u32),
            Get(u32),
            Remove(u32),
            Contains(u32),
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0u32..64, any::<u32>()).prop_map(|(k, v)| Op::Put(k, v)),
                (0u32..64).prop_map(Op::Get),
                (0u32..64).prop_map(Op::Remove),
                (0u32..64).prop_map(Op::Contains),
            ]
        }

        /// Bucket order a nearest-index probe visits from `target`.
        fn probe_order(target: usize, capacity: usize) -> Vec<usize> {
            let mut order = vec![target];
            for d in 1..capacity {
                if d <= target {
                    order.push(target - d);
                }
                if target + d < capacity {
                    order.push(target + d);
                }
            }
            order
        }

        proptest! {
            #[cfg_attr(miri, ignore)]
            #[test]
            fn prop_matches_hashmap_model(
                capacity in 0usize..20,
                ops in prop::collection::vec(op_strategy(), 0..200)
            ) {
                let table: ConcurrentReferenceTable<u32, u32> =
                    ConcurrentReferenceTable::try_with_capacity(Strong, Strong, capacity, 0.75).unwrap();
                let mut model = HashMap::new();
                for op in ops {
                    match op {
                        Op::Put(k, v) => {
                            let old = table.put(k, v).map(|v| *v);
                            prop_assert_eq!(old, model.insert(k, v));
                        },
                        Op::Get(k) => prop_assert_eq!(table.get(&k).map(|v| *v), model.get(&k).copied()),
                        Op::Remove(k) => prop_assert_eq!(table.remove(&k).map(|v| *v), model.remove(&k)),
                        Op::Contains(k) => prop_assert_eq!(table.contains_key(&k), model.contains_key(&k)),
                    }
                    prop_assert_eq!(table.len(), model.len());
                    #[cfg(debug_assertions)]
                    table.check_invariants().unwrap();
                }
            }

            #[cfg_attr(miri, ignore)]
            #[test]
            fn prop_capacity_formula(
                initial in 1usize..50,
                load_factor in 0.25f32..2.0,
                n in 0u32..400
            ) {
                let table: ConcurrentReferenceTable<u32, u32> =
                    ConcurrentReferenceTable::try_with_capacity(Strong, Strong, initial, load_factor).unwrap();
                let mut expected = initial;
                for i in 0..n {
                    table.put(i, i);
                    while (i as usize + 1) > threshold_for(expected, load_factor) {
                        expected = expected * 2 + 1;
                    }
                    prop_assert_eq!(table.capacity(), expected);
                }
            }

            #[cfg_attr(miri, ignore)]
            #[test]
            fn prop_remove_random_takes_nearest_bucket_head(
                keys in prop::collection::hash_set(0u32..500, 1..60),
                fractions in prop::collection::vec(0.0f64..1.0, 1..8),
            ) {
                let table: ConcurrentReferenceTable<u32, u32> =
                    ConcurrentReferenceTable::builder(Strong, Strong)
                        .random_fractions(fixed_fractions(&fractions).unwrap())
                        .build();
                for &k in &keys {
                    table.put(k, k);
                }
                let mut remaining = keys.len();
                let mut position = 0usize;
                while remaining > 0 {
                    let expected = {
                        let inner = table.core.inner.read();
                        let capacity = inner.capacity();
                        let target = ((fractions[position] * capacity as f64) as usize).min(capacity - 1);
                        probe_order(target, capacity)
                            .into_iter()
                            .find_map(|idx| inner.buckets[idx].first().and_then(|slot| slot.key.get()))
                            .map(|k| *k)
                    };
                    let (key, value) = table.remove_random().unwrap();
                    position = (position + 1) % fractions.len();
                    prop_assert_eq!(key, expected);
                    prop_assert_eq!(value.map(|v| *v), expected);
                    remaining -= 1;
                    prop_assert_eq!(table.len(), remaining);
                    prop_assert_eq!(table.eviction_cursor(), position);
                }
                prop_assert_eq!(table.remove_random(), None);
            }

            #[cfg_attr(miri, ignore)]
            #[test]
            fn prop_max_size_is_never_exceeded(
                max in 1usize..20,
                keys in prop::collection::vec(0u32..100, 0..200)
            ) {
                let table: ConcurrentReferenceTable<u32, u32> =
                    ConcurrentReferenceTable::builder(Strong, Strong)
                        .max_size(Some(max))
                        .build();
                for k in keys {
                    table.put(k, k);
                    prop_assert!(table.len() <= max);
                }
            }
        }
    }
}
