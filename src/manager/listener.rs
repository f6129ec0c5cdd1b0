//! Change notifications for [`CacheMap`](crate::manager::CacheMap).

use std::fmt;

use parking_lot::Mutex;

/// Hooks a [`CacheMap`](crate::manager::CacheMap) calls on every state
/// transition.
///
/// Hooks run synchronously on the thread performing the operation, while the
/// cache's lock is held. They must not call back into the same cache.
pub trait CacheListener<K, V>: Send + Sync {
    /// `key` now maps to `value`; `None` is a null value.
    fn entry_added(&self, key: &K, value: Option<&V>) {
        let _ = (key, value);
    }

    /// `key` no longer maps to `value`.
    ///
    /// `expired` is `true` only when the value was cleared by the memory
    /// reclaimer; `value` is `None` in that case.
    fn entry_removed(&self, key: &K, value: Option<&V>, expired: bool) {
        let _ = (key, value, expired);
    }
}

/// One notification captured by [`RecordingListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent<K> {
    Added(K),
    Removed { key: K, had_value: bool, expired: bool },
}

/// Listener that records every notification, for tests and diagnostics.
pub struct RecordingListener<K> {
    events: Mutex<Vec<CacheEvent<K>>>,
}

impl<K> RecordingListener<K>
where
    K: Clone,
{
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// All events recorded so far, oldest first.
    pub fn events(&self) -> Vec<CacheEvent<K>> {
        self.events.lock().clone()
    }

    pub fn additions(&self) -> usize {
        self.count(|event| matches!(event, CacheEvent::Added(_)))
    }

    /// Removals that were not caused by the reclaimer.
    pub fn removals(&self) -> usize {
        self.count(|event| matches!(event, CacheEvent::Removed { expired: false, .. }))
    }

    pub fn expirations(&self) -> usize {
        self.count(|event| matches!(event, CacheEvent::Removed { expired: true, .. }))
    }

    /// Keys of every non-expired removal, in order.
    pub fn removed_keys(&self) -> Vec<K> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                CacheEvent::Removed {
                    key,
                    expired: false,
                    ..
                } => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn reset(&self) {
        self.events.lock().clear();
    }

    fn count(&self, predicate: impl Fn(&CacheEvent<K>) -> bool) -> usize {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }
}

impl<K> Default for RecordingListener<K>
where
    K: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CacheListener<K, V> for RecordingListener<K>
where
    K: Clone + Send + Sync,
{
    fn entry_added(&self, key: &K, _value: Option<&V>) {
        self.events.lock().push(CacheEvent::Added(key.clone()));
    }

    fn entry_removed(&self, key: &K, value: Option<&V>, expired: bool) {
        self.events.lock().push(CacheEvent::Removed {
            key: key.clone(),
            had_value: value.is_some(),
            expired,
        });
    }
}

impl<K> fmt::Debug for RecordingListener<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingListener")
            .field("events", &self.events.lock().len())
            .finish()
    }
}
