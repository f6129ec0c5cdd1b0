pub mod fractions;
pub mod reclaim;

pub use fractions::{EvictionCursor, SHARED_FRACTION_COUNT, fixed_fractions, shared_fractions};
pub use reclaim::{MemoryReclaimer, ReferenceStrength};
