//! Per-key debouncing
//!
//! Collapses bursts of triggers for the same key into one delayed action.
//! Scheduling again for a key replaces the pending timer, so only the most
//! recent action for a key ever runs.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

struct Pending {
    generation: u64,
    timer: JoinHandle<()>,
}

/// Registry of pending per-key timers
pub struct Debouncer<K> {
    pending: Arc<Mutex<HashMap<K, Pending>>>,
    generation: AtomicU64,
}

impl<K> Default for Debouncer<K> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay` unless `key` is scheduled again first
    ///
    /// Returns `true` when an earlier pending action for `key` was replaced.
    /// Must be called from within a tokio runtime.
    pub fn debounce<F>(&self, key: K, delay: Duration, action: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let registry = self.pending.clone();
        let timer_key = key.clone();

        let mut pending = self.pending.lock();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let current = {
                let mut pending = registry.lock();
                match pending.get(&timer_key) {
                    Some(entry) if entry.generation == generation => {
                        pending.remove(&timer_key);
                        true
                    }
                    _ => false,
                }
            };
            if current {
                trace!("debounce fired for {:?}", timer_key);
                action();
            }
        });

        match pending.insert(key, Pending { generation, timer }) {
            Some(previous) => {
                previous.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Drop the pending action for `key`; returns whether one existed
    pub fn cancel(&self, key: &K) -> bool {
        match self.pending.lock().remove(key) {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Drop every pending action whose key matches; returns the keys dropped
    pub fn cancel_where(&self, mut matches: impl FnMut(&K) -> bool) -> Vec<K> {
        let mut pending = self.pending.lock();
        let keys: Vec<K> = pending.keys().filter(|k| matches(k)).cloned().collect();
        for key in &keys {
            if let Some(entry) = pending.remove(key) {
                entry.timer.abort();
            }
        }
        keys
    }

    /// Drop everything; returns how many actions were dropped
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Pending> = self.pending.lock().drain().map(|(_, p)| p).collect();
        for entry in &drained {
            entry.timer.abort();
        }
        drained.len()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.lock().contains_key(key)
    }

    /// Number of keys with a pending action
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        for (_, entry) in self.pending.lock().drain() {
            entry.timer.abort();
        }
    }
}
