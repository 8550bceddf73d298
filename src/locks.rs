use dashmap::DashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

/// one mutex per key, created on demand and dropped when idle
///
/// Work on different keys never contends; work on the same key runs one
/// closure at a time.
#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash + Clone> {
    slots: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// run `f` while holding the lock for `key`
    pub fn with_lock<T>(&self, key: &K, f: impl FnOnce() -> T) -> T {
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        let result = {
            // nothing behind the mutex to corrupt
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        drop(slot);
        self.slots.remove_if(key, |_, s| Arc::strong_count(s) == 1);
        result
    }

    /// keys currently held or waited on
    pub fn active(&self) -> usize {
        self.slots.len()
    }
}
