//! Reference strengths and the explicit memory reclaimer.
//!
//! A table slot holds its key and value either *strongly* (the table owns the
//! payload until the entry is removed) or *reclaimably* (a [`MemoryReclaimer`]
//! may clear the payload at any moment between two table operations, the way
//! a collector clears a soft reference under memory pressure).
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                          Reclaimable payload                              │
//! │                                                                           │
//! │   table slot                           MemoryReclaimer                    │
//! │   ┌──────────────────────┐             ┌──────────────────────────────┐   │
//! │   │ Ref::Reclaimable ────┼──► Arc ◄────┼─ Weak<dyn Reclaim> (oldest)  │   │
//! │   └──────────────────────┘     │       │  Weak<dyn Reclaim>           │   │
//! │                                ▼       │  Weak<dyn Reclaim> (newest)  │   │
//! │                       ReclaimCell<T>   └──────────────────────────────┘   │
//! │                       Mutex<Option<Arc<T>>>                               │
//! │                                                                           │
//! │   reclaim(n) / reclaim_all():  cell.payload.take()  → slot now "cleared"  │
//! │   drop(slot):                  cell freed, registry entry goes dead       │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The reclaimer only holds weak handles, so removing an entry from a table
//! frees its payload immediately. A cleared slot stays in its bucket until the
//! table next touches it; see
//! [`ConcurrentReferenceTable`](crate::store::ConcurrentReferenceTable) for the
//! lazy purge rules.
//!
//! ## Example Usage
//!
//! ```
//! use std::sync::Arc;
//!
//! use tiercache::ds::{MemoryReclaimer, ReferenceStrength};
//! use tiercache::store::ConcurrentReferenceTable;
//!
//! let reclaimer = Arc::new(MemoryReclaimer::new());
//! let table = ConcurrentReferenceTable::<u32, String>::builder(
//!     ReferenceStrength::Strong,
//!     ReferenceStrength::Reclaimable,
//! )
//! .reclaimer(reclaimer.clone())
//! .build();
//!
//! table.put(1, "one".to_string());
//! assert_eq!(reclaimer.tracked(), 1);
//!
//! // Simulate memory pressure: the value disappears silently.
//! assert_eq!(reclaimer.reclaim_all(), 1);
//! assert_eq!(table.get(&1), None);
//! assert!(table.is_empty());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// How a table slot retains its key or value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ReferenceStrength {
    /// Never cleared implicitly. Nulls are accepted on a strong side.
    #[default]
    Strong,
    /// May be cleared by the table's [`MemoryReclaimer`] between operations.
    Reclaimable,
}

impl ReferenceStrength {
    /// Returns `true` for [`ReferenceStrength::Strong`].
    #[inline]
    pub fn is_strong(self) -> bool {
        matches!(self, ReferenceStrength::Strong)
    }
}

// ---------------------------------------------------------------------------
// Reclaimable cells
// ---------------------------------------------------------------------------

pub(crate) trait Reclaim: Send + Sync {
    /// Drops the payload. Returns `false` if it was already gone.
    fn clear(&self) -> bool;

    fn is_cleared(&self) -> bool;
}

pub(crate) struct ReclaimCell<T> {
    payload: Mutex<Option<Arc<T>>>,
}

impl<T> Reclaim for ReclaimCell<T>
where
    T: Send + Sync,
{
    fn clear(&self) -> bool {
        self.payload.lock().take().is_some()
    }

    fn is_cleared(&self) -> bool {
        self.payload.lock().is_none()
    }
}

/// What a [`Ref`] currently holds.
#[derive(Debug)]
pub(crate) enum Resolved<T> {
    Null,
    Live(Arc<T>),
    Reclaimed,
}

impl<T> Resolved<T> {
    /// Live payload, `None` for both null and reclaimed.
    pub(crate) fn into_option(self) -> Option<Arc<T>> {
        match self {
            Resolved::Live(value) => Some(value),
            Resolved::Null | Resolved::Reclaimed => None,
        }
    }
}

/// Key or value holder stored in a table slot.
pub(crate) enum Ref<T> {
    Null,
    Strong(Arc<T>),
    Reclaimable(Arc<ReclaimCell<T>>),
}

impl<T> Ref<T>
where
    T: Send + Sync + 'static,
{
    /// Wraps `payload` according to `strength`.
    ///
    /// Callers reject nulls for reclaimable sides before getting here; a null
    /// is always stored as [`Ref::Null`].
    pub(crate) fn new(
        payload: Option<Arc<T>>,
        strength: ReferenceStrength,
        reclaimer: &MemoryReclaimer,
    ) -> Self {
        match (payload, strength) {
            (None, _) => Ref::Null,
            (Some(value), ReferenceStrength::Strong) => Ref::Strong(value),
            (Some(value), ReferenceStrength::Reclaimable) => {
                let cell = Arc::new(ReclaimCell {
                    payload: Mutex::new(Some(value)),
                });
                reclaimer.register(cell.clone());
                Ref::Reclaimable(cell)
            },
        }
    }

    pub(crate) fn resolve(&self) -> Resolved<T> {
        match self {
            Ref::Null => Resolved::Null,
            Ref::Strong(value) => Resolved::Live(value.clone()),
            Ref::Reclaimable(cell) => match cell.payload.lock().as_ref() {
                Some(value) => Resolved::Live(value.clone()),
                None => Resolved::Reclaimed,
            },
        }
    }

    /// Payload as an option; a cleared payload reads as `None`.
    pub(crate) fn get(&self) -> Option<Arc<T>> {
        self.resolve().into_option()
    }

    pub(crate) fn is_reclaimed(&self) -> bool {
        match self {
            Ref::Null | Ref::Strong(_) => false,
            Ref::Reclaimable(cell) => cell.is_cleared(),
        }
    }

    /// Copies the holder for a cloned table. Reclaimable payloads get a fresh
    /// cell registered with `reclaimer`.
    pub(crate) fn duplicate(&self, reclaimer: &MemoryReclaimer) -> Self {
        match self {
            Ref::Null => Ref::Null,
            Ref::Strong(value) => Ref::Strong(value.clone()),
            Ref::Reclaimable(_) => match self.get() {
                Some(value) => Ref::new(Some(value), ReferenceStrength::Reclaimable, reclaimer),
                None => Ref::Null,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryReclaimer
// ---------------------------------------------------------------------------

/// The actor that clears reclaimable payloads.
///
/// Payloads are tracked oldest first. Clearing is driven explicitly through
/// [`reclaim`](Self::reclaim) / [`reclaim_all`](Self::reclaim_all), or
/// automatically by a budget set with [`with_budget`](Self::with_budget):
/// whenever a registration pushes the number of live payloads past the
/// budget, the oldest ones are cleared.
///
/// Every pass that clears at least one payload advances
/// [`epoch`](Self::epoch); tables use it to decide when a full purge sweep
/// is due.
pub struct MemoryReclaimer {
    registry: Mutex<VecDeque<Weak<dyn Reclaim>>>,
    budget: Option<usize>,
    epoch: AtomicU64,
}

impl MemoryReclaimer {
    /// Creates a reclaimer that only clears payloads when asked to.
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(VecDeque::new()),
            budget: None,
            epoch: AtomicU64::new(0),
        }
    }

    /// Creates a reclaimer that keeps at most `budget` payloads alive.
    pub fn with_budget(budget: usize) -> Self {
        Self {
            budget: Some(budget),
            ..Self::new()
        }
    }

    /// Returns the live-payload budget, if any.
    pub fn budget(&self) -> Option<usize> {
        self.budget
    }

    /// Returns the number of reclaim passes that cleared something.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Returns the number of payloads that are still alive and uncleared.
    pub fn tracked(&self) -> usize {
        let mut registry = self.registry.lock();
        Self::compact(&mut registry);
        registry.len()
    }

    /// Clears up to `max` of the oldest live payloads. Returns how many were
    /// cleared.
    pub fn reclaim(&self, max: usize) -> usize {
        let cleared = {
            let mut registry = self.registry.lock();
            Self::clear_oldest(&mut registry, max)
        };
        self.finish_pass(cleared);
        cleared
    }

    /// Clears every live payload. Returns how many were cleared.
    pub fn reclaim_all(&self) -> usize {
        self.reclaim(usize::MAX)
    }

    fn register(&self, cell: Arc<dyn Reclaim>) {
        let cleared = {
            let mut registry = self.registry.lock();
            registry.push_back(Arc::downgrade(&cell));
            match self.budget {
                Some(budget) if registry.len() > budget => {
                    Self::compact(&mut registry);
                    let excess = registry.len().saturating_sub(budget);
                    Self::clear_oldest(&mut registry, excess)
                },
                _ => 0,
            }
        };
        self.finish_pass(cleared);
    }

    fn clear_oldest(registry: &mut VecDeque<Weak<dyn Reclaim>>, max: usize) -> usize {
        let mut cleared = 0;
        while cleared < max {
            let Some(handle) = registry.pop_front() else {
                break;
            };
            if let Some(cell) = handle.upgrade() {
                if cell.clear() {
                    cleared += 1;
                }
            }
        }
        cleared
    }

    /// Drops registry entries whose slot is gone or already cleared.
    fn compact(registry: &mut VecDeque<Weak<dyn Reclaim>>) {
        registry.retain(|handle| match handle.upgrade() {
            Some(cell) => !cell.is_cleared(),
            None => false,
        });
    }

    fn finish_pass(&self, cleared: usize) {
        if cleared > 0 {
            self.epoch.fetch_add(1, Ordering::AcqRel);
            log::debug!("memory reclaimer cleared {cleared} reclaimable payloads");
        }
    }
}

impl Default for MemoryReclaimer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryReclaimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryReclaimer")
            .field("budget", &self.budget)
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}
