//! Live views over a [`ConcurrentReferenceTable`](crate::store::ConcurrentReferenceTable).
//!
//! A table owns exactly one view of each kind for its whole life, so
//! `table.keys()` always returns the same instance. Views read through to the
//! table: `len` and `contains` answer for the table's current state, removing
//! through a view removes from the table.
//!
//! Iteration walks a snapshot taken when `iter()` is called. Entries added
//! later are not seen, entries removed later may still be yielded.
//! [`ViewIter::remove`] deletes the entry behind the last yielded item.
//! [`ConcurrentReferenceTable::random_entries`](crate::store::ConcurrentReferenceTable::random_entries)
//! returns the same iterator, rotated to start at a pseudo-random bucket.
//!
//! ## Example Usage
//!
//! ```
//! use tiercache::ds::ReferenceStrength::Strong;
//! use tiercache::store::ConcurrentReferenceTable;
//!
//! let table = ConcurrentReferenceTable::new(Strong, Strong);
//! table.put("a", 1);
//! table.put("b", 2);
//!
//! let mut iter = table.keys().iter();
//! while let Some(key) = iter.next() {
//!     if key == Some("a") {
//!         assert!(iter.remove());
//!     }
//! }
//! assert_eq!(table.len(), 1);
//! assert!(!table.entries().remove(Some(&"b"), Some(&3)));
//! assert!(table.entries().remove(Some(&"b"), Some(&2)));
//! assert!(table.is_empty());
//! ```

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::vec;

use crate::store::reference_table::{NullableEntry, TableCore};

/// Iterator over a snapshot of a table, projected to keys, values or entries.
pub struct ViewIter<K, V, T> {
    core: Arc<TableCore<K, V>>,
    entries: vec::IntoIter<NullableEntry<K, V>>,
    last: Option<Option<K>>,
    project: fn(NullableEntry<K, V>) -> T,
}

impl<K, V, T> ViewIter<K, V, T>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn new(core: &Arc<TableCore<K, V>>, project: fn(NullableEntry<K, V>) -> T) -> Self {
        Self::from_snapshot(core, core.snapshot(), project)
    }

    pub(crate) fn from_snapshot(
        core: &Arc<TableCore<K, V>>,
        entries: Vec<NullableEntry<K, V>>,
        project: fn(NullableEntry<K, V>) -> T,
    ) -> Self {
        Self {
            entries: entries.into_iter(),
            core: core.clone(),
            last: None,
            project,
        }
    }

    /// Removes the entry behind the item most recently returned by `next`.
    ///
    /// Returns `false` if nothing has been yielded yet, the item was already
    /// removed through this iterator, or the entry is gone from the table.
    pub fn remove(&mut self) -> bool {
        match self.last.take() {
            Some(key) => self.core.remove_entry(key.as_ref()).is_some(),
            None => false,
        }
    }
}

impl<K, V, T> Iterator for ViewIter<K, V, T>
where
    K: Clone,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let entry = self.entries.next()?;
        self.last = Some(entry.0.clone());
        Some((self.project)(entry))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<K, V, T> ExactSizeIterator for ViewIter<K, V, T> where K: Clone {}

impl<K, V, T> fmt::Debug for ViewIter<K, V, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewIter")
            .field("remaining", &self.entries.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// KeyView
// ---------------------------------------------------------------------------

/// View of a table's keys. A null key appears as `None`.
pub struct KeyView<K, V> {
    core: Arc<TableCore<K, V>>,
}

impl<K, V> KeyView<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(core: Arc<TableCore<K, V>>) -> Self {
        Self { core }
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: Option<&K>) -> bool {
        self.core.contains_key(key)
    }

    /// Removes `key` from the table. Returns whether it was present.
    pub fn remove(&self, key: Option<&K>) -> bool {
        self.core.remove_entry(key).is_some()
    }

    pub fn iter(&self) -> ViewIter<K, V, Option<K>> {
        ViewIter::new(&self.core, |(key, _)| key)
    }
}

impl<'a, K, V> IntoIterator for &'a KeyView<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    type Item = Option<K>;
    type IntoIter = ViewIter<K, V, Option<K>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ---------------------------------------------------------------------------
// ValueView
// ---------------------------------------------------------------------------

/// View of a table's values. A null value appears as `None`.
pub struct ValueView<K, V> {
    core: Arc<TableCore<K, V>>,
}

impl<K, V> ValueView<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(core: Arc<TableCore<K, V>>) -> Self {
        Self { core }
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, value: Option<&V>) -> bool
    where
        V: PartialEq,
    {
        self.core.any_value(|held| held == value)
    }

    pub fn iter(&self) -> ViewIter<K, V, Option<Arc<V>>> {
        ViewIter::new(&self.core, |(_, value)| value)
    }
}

impl<'a, K, V> IntoIterator for &'a ValueView<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    type Item = Option<Arc<V>>;
    type IntoIter = ViewIter<K, V, Option<Arc<V>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ---------------------------------------------------------------------------
// EntryView
// ---------------------------------------------------------------------------

/// View of a table's entries.
pub struct EntryView<K, V> {
    core: Arc<TableCore<K, V>>,
}

impl<K, V> EntryView<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(core: Arc<TableCore<K, V>>) -> Self {
        Self { core }
    }

    pub fn len(&self) -> usize {
        self.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is present and currently maps to `value`.
    pub fn contains(&self, key: Option<&K>, value: Option<&V>) -> bool
    where
        V: PartialEq,
    {
        self.core
            .lookup(key)
            .is_some_and(|held| held.as_deref() == value)
    }

    /// Removes `key` only if it currently maps to `value`.
    ///
    /// A pair that does not match the table is not removed and `false` is
    /// returned.
    pub fn remove(&self, key: Option<&K>, value: Option<&V>) -> bool
    where
        V: PartialEq,
    {
        self.core.remove_if(key, |held| held == value)
    }

    pub fn iter(&self) -> ViewIter<K, V, NullableEntry<K, V>> {
        ViewIter::new(&self.core, |entry| entry)
    }
}

impl<'a, K, V> IntoIterator for &'a EntryView<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    type Item = NullableEntry<K, V>;
    type IntoIter = ViewIter<K, V, NullableEntry<K, V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

macro_rules! view_debug {
    ($($view:ident),*) => {
        $(
            impl<K, V> fmt::Debug for $view<K, V>
            where
                K: Clone + Eq + Hash + Send + Sync + 'static,
                V: Send + Sync + 'static,
            {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.debug_struct(stringify!($view))
                        .field("len", &self.core.len())
                        .finish()
                }
            }
        )*
    };
}

view_debug!(KeyView, ValueView, EntryView);
