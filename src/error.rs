//! Error types for the tiercache library.
//!
//! ## Key Components
//!
//! - [`ConfigError`]: Returned when table or cache configuration parameters
//!   are invalid (e.g. a non-positive load factor).
//! - [`TableError`]: Returned by table operations that reject their input
//!   (a null key or value the configured reference strength does not allow,
//!   or a bulk insert from an absent source).
//! - [`InvariantError`]: Returned when internal data-structure invariants are
//!   violated (debug-only `check_invariants` methods).
//!
//! Cache misses are never errors; lookups return `Option`.
//!
//! ## Example Usage
//!
//! ```
//! use tiercache::ds::ReferenceStrength;
//! use tiercache::error::TableError;
//! use tiercache::store::ConcurrentReferenceTable;
//!
//! let bad = ConcurrentReferenceTable::<String, i32>::try_with_capacity(
//!     ReferenceStrength::Strong,
//!     ReferenceStrength::Strong,
//!     16,
//!     0.0,
//! );
//! assert!(bad.is_err());
//!
//! let table = ConcurrentReferenceTable::<String, i32>::new(
//!     ReferenceStrength::Reclaimable,
//!     ReferenceStrength::Strong,
//! );
//! let err = table.put_nullable(None, Some(1)).unwrap_err();
//! assert!(matches!(err, TableError::InvalidArgument(_)));
//! ```

use std::fmt;

// ---------------------------------------------------------------------------
// InvariantError
// ---------------------------------------------------------------------------

/// Error returned when internal table or cache invariants are violated.
///
/// Produced by debug-only `check_invariants` methods (e.g.
/// [`ConcurrentReferenceTable::check_invariants`](crate::store::ConcurrentReferenceTable::check_invariants)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError(String);

impl InvariantError {
    /// Creates a new `InvariantError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InvariantError {}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when configuration parameters are invalid.
///
/// Produced by fallible constructors such as
/// [`ConcurrentReferenceTable::try_with_capacity`](crate::store::ConcurrentReferenceTable::try_with_capacity)
/// and builder `try_build()` methods.
///
/// # Example
///
/// ```
/// use tiercache::manager::CacheMap;
///
/// let err = CacheMap::<u64, u64>::try_with_load_factor(false, 10, -1, -1.0).unwrap_err();
/// assert!(err.to_string().contains("load factor"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(String);

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// TableError
// ---------------------------------------------------------------------------

/// Error returned by table operations that reject their arguments.
///
/// `InvalidArgument` means a null was passed where the table's reference
/// strength forbids it. `NullArgument` means the caller passed no source at
/// all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// A null key or value was given to a side configured as reclaimable.
    InvalidArgument(String),
    /// A bulk operation was given an absent source collection.
    NullArgument(String),
}

impl TableError {
    /// Returns the error description.
    pub fn message(&self) -> &str {
        match self {
            TableError::InvalidArgument(msg) | TableError::NullArgument(msg) => msg,
        }
    }
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            TableError::NullArgument(msg) => write!(f, "null argument: {msg}"),
        }
    }
}

impl std::error::Error for TableError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
