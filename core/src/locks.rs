//! Per-key serialization for balance, badge and order mutation.
//!
//! RULES:
//!   - Anything that reads then writes a member's balance or badge lists
//!     holds that member's lock for the whole sequence.
//!   - Multi-key operations lock in sorted order.
//!   - An order lock is only ever taken first, with nothing else held.
//!   - A slot is dropped from the registry once nobody holds or waits on it,
//!     so the registry tracks in-flight keys only.

use crate::types::{LedgerKind, MemberId, OrderId};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    Balance(MemberId, LedgerKind),
    Badges(MemberId),
    Order(OrderId),
}

pub struct KeyedLocks<K = LockKey> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Clone + Eq + Hash + Ord> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Clone + Eq + Hash + Ord> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &K) -> Arc<Mutex<()>> {
        // A panic while holding a guard leaves no partial state behind
        // (the guarded data is `()`), so poisoning is ignored.
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` while holding every lock in `keys`.
    pub fn with_locked<R>(&self, keys: &[K], f: impl FnOnce() -> R) -> R {
        let mut ordered = keys.to_vec();
        ordered.sort();
        ordered.dedup();
        let result = {
            let slots: Vec<Arc<Mutex<()>>> = ordered.iter().map(|k| self.slot(k)).collect();
            let _guards: Vec<MutexGuard<'_, ()>> = slots
                .iter()
                .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner))
                .collect();
            f()
        };
        self.release(&ordered);
        result
    }

    /// Forget slots that only the registry still references. Any other
    /// holder cloned its Arc under the registry lock, so the count is exact.
    fn release(&self, keys: &[K]) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            if slots.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
                slots.remove(key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
