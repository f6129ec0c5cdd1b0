//! Tiered cache built on reference tables.

pub mod cache_map;
pub mod listener;

pub use cache_map::{CacheMap, CacheMetrics};
pub use listener::{CacheEvent, CacheListener, RecordingListener};
