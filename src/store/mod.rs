//! Reference-strength aware storage.
//!
//! - [`reference_table`]: the concurrent table itself.
//! - [`views`]: key/value/entry views bound to a table.
//! - [`traits`]: metrics snapshot, eviction order and listener hooks.

pub mod reference_table;
pub mod traits;
pub mod views;

pub use reference_table::{
    ConcurrentReferenceTable, DEFAULT_INITIAL_CAPACITY, DEFAULT_LOAD_FACTOR, NullableEntry,
};
pub use traits::{EvictionOrder, StoreMetrics, TableListener};
pub use views::{EntryView, KeyView, ValueView, ViewIter};
