pub use crate::builder::{CacheMapBuilder, ReferenceTableBuilder};
pub use crate::ds::{MemoryReclaimer, ReferenceStrength};
pub use crate::error::{ConfigError, TableError};
pub use crate::manager::{CacheEvent, CacheListener, CacheMap, CacheMetrics, RecordingListener};
pub use crate::store::{
    ConcurrentReferenceTable, EvictionOrder, NullableEntry, StoreMetrics, TableListener,
};
pub use crate::traits::{CacheTier, ConcurrentCache, SharedCache};
