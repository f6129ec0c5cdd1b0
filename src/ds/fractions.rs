//! Shared pseudo-random fractions for approximate-random eviction.
//!
//! Tables never call an RNG on the eviction path. Instead every table walks a
//! shared, pre-generated array of fractions in `[0, 1)` with its own cursor:
//! the next eviction target is `floor(fractions[cursor] * capacity)` and the
//! cursor advances by one (wrapping at the end of the array).
//!
//! The process-wide array is generated once with `rand`. Tests can inject a
//! fixed array through the table builders to make targets deterministic.
//!
//! ## Example Usage
//!
//! ```
//! use tiercache::ds::{EvictionCursor, fixed_fractions};
//!
//! let mut cursor = EvictionCursor::new(fixed_fractions(&[0.5, 0.0]).unwrap()).unwrap();
//! assert_eq!(cursor.next_target(11), 5);
//! assert_eq!(cursor.next_target(11), 0);
//! assert_eq!(cursor.position(), 0); // wrapped
//! ```

use std::sync::{Arc, OnceLock};

use rand::Rng;

use crate::error::ConfigError;

/// Length of the process-wide fraction array.
pub const SHARED_FRACTION_COUNT: usize = 1000;

static SHARED_FRACTIONS: OnceLock<Arc<[f64]>> = OnceLock::new();

/// Returns the process-wide fraction array, generating it on first use.
pub fn shared_fractions() -> Arc<[f64]> {
    SHARED_FRACTIONS
        .get_or_init(|| {
            let mut rng = rand::thread_rng();
            (0..SHARED_FRACTION_COUNT)
                .map(|_| rng.gen_range(0.0..1.0))
                .collect()
        })
        .clone()
}

fn validate_fractions(values: &[f64]) -> Result<(), ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::new("fraction array must not be empty"));
    }
    if let Some(bad) = values.iter().find(|v| !(0.0..1.0).contains(*v)) {
        return Err(ConfigError::new(format!(
            "fraction {bad} is outside [0, 1)"
        )));
    }
    Ok(())
}

/// Validates a caller-supplied fraction array.
///
/// # Errors
///
/// Returns [`ConfigError`] if `values` is empty or any value lies outside
/// `[0, 1)`.
pub fn fixed_fractions(values: &[f64]) -> Result<Arc<[f64]>, ConfigError> {
    validate_fractions(values)?;
    Ok(values.into())
}

/// Per-table position in a fraction array.
#[derive(Debug, Clone)]
pub struct EvictionCursor {
    fractions: Arc<[f64]>,
    position: usize,
}

impl EvictionCursor {
    /// Creates a cursor at position zero.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `fractions` is empty or holds a value
    /// outside `[0, 1)`.
    pub fn new(fractions: Arc<[f64]>) -> Result<Self, ConfigError> {
        validate_fractions(&fractions)?;
        Ok(Self {
            fractions,
            position: 0,
        })
    }

    /// Cursor over the process-wide array.
    pub fn shared() -> Self {
        Self {
            fractions: shared_fractions(),
            position: 0,
        }
    }

    /// Returns the index of the next fraction to be used.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns the fraction array this cursor walks.
    pub fn fractions(&self) -> &Arc<[f64]> {
        &self.fractions
    }

    /// Returns `floor(fraction * capacity)` for the current fraction and
    /// advances the cursor by one.
    ///
    /// The result is always `< capacity` for a non-zero capacity.
    pub fn next_target(&mut self, capacity: usize) -> usize {
        let fraction = self.fractions[self.position];
        self.position = (self.position + 1) % self.fractions.len();
        let target = (fraction * capacity as f64) as usize;
        target.min(capacity.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_fractions_are_stable_and_in_range() {
        let a = shared_fractions();
        let b = shared_fractions();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), SHARED_FRACTION_COUNT);
        assert!(a.iter().all(|f| (0.0..1.0).contains(f)));
    }

    #[test]
    fn fixed_fractions_rejects_bad_input() {
        assert!(fixed_fractions(&[]).is_err());
        assert!(fixed_fractions(&[0.2, 1.0]).is_err());
        assert!(fixed_fractions(&[-0.1]).is_err());
        assert!(fixed_fractions(&[f64::NAN]).is_err());
        assert!(fixed_fractions(&[0.0, 0.999]).is_ok());
    }

    #[test]
    fn cursor_rejects_unvalidated_arrays() {
        assert!(EvictionCursor::new(Arc::from(Vec::<f64>::new())).is_err());
        assert!(EvictionCursor::new(Arc::from(vec![0.5, 1.5])).is_err());
        assert!(EvictionCursor::new(Arc::from(vec![0.5])).is_ok());
        assert_eq!(EvictionCursor::shared().fractions().len(), SHARED_FRACTION_COUNT);
    }

    #[test]
    fn cursor_advances_by_one_and_wraps() {
        let mut cursor = EvictionCursor::new(fixed_fractions(&[0.1, 0.2, 0.3]).unwrap()).unwrap();
        for expected in [1, 2, 0, 1] {
            cursor.next_target(10);
            assert_eq!(cursor.position(), expected);
        }
    }

    #[test]
    fn targets_scale_with_capacity() {
        let mut cursor = EvictionCursor::new(fixed_fractions(&[0.0, 0.5, 0.99]).unwrap()).unwrap();
        assert_eq!(cursor.next_target(10), 0);
        assert_eq!(cursor.next_target(10), 5);
        assert_eq!(cursor.next_target(10), 9);
        assert_eq!(cursor.next_target(1), 0);
    }
}
