//! tiercache: concurrent reference tables and a tiered cache built on them.
//!
//! - [`store`]: [`ConcurrentReferenceTable`](store::ConcurrentReferenceTable),
//!   a hash table holding keys and values strongly or reclaimably, with an
//!   optional size bound enforced by approximate-random eviction.
//! - [`manager`]: [`CacheMap`](manager::CacheMap), a pinned/hard/soft tiered
//!   cache with change notifications.
//! - [`ds`]: reclamation handles and the shared eviction fractions.
//! - [`builder`]: builders for both containers.
//! - [`traits`]: the `&self` map interface both containers implement.

pub mod builder;
pub mod ds;
pub mod error;
pub mod manager;
pub mod prelude;
pub mod store;
pub mod traits;
