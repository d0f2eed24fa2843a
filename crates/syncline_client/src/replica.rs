//! Local key-value replica fed by pull patches.
//!
//! The replica is the diff source for the client's views. Each applied
//! patch becomes one diff batch per subscriber, restricted to its prefix.
//! A key touched several times by one patch yields a single diff comparing
//! its value before and after the patch, so `clear` followed by re-putting
//! unchanged rows produces no diffs at all.
//!
//! Listener snapshots are taken before delivery; a subscriber dropped while
//! a batch is in flight may still receive that batch.

use crate::diff::Diff;
use crate::source::{DiffCallback, DiffSource, Subscription};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use syncline_protocol::PatchOperation;

/// Listener id.
type ListenerId = u64;

struct Listener {
    id: ListenerId,
    prefix: String,
    callback: DiffCallback<Value>,
}

/// In-memory store of synced rows keyed by `"/<table>/<id>"`.
pub struct Replica {
    data: RwLock<BTreeMap<String, Value>>,
    listeners: Arc<Mutex<Vec<Listener>>>,
    next_id: AtomicU64,
    // Serializes writes with their delivery so every subscriber sees
    // batches in write order and its initial batch first.
    delivery: ReentrantMutex<()>,
}

impl Replica {
    /// Creates an empty replica.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            delivery: ReentrantMutex::new(()),
        }
    }

    /// Applies a patch and notifies subscribers. Returns the number of
    /// keys whose value changed.
    pub fn apply_patch(&self, patch: &[PatchOperation]) -> usize {
        let _delivery = self.delivery.lock();
        let diffs = self.write(patch);
        if diffs.is_empty() {
            return 0;
        }

        let snapshot: Vec<(String, DiffCallback<Value>)> = self
            .listeners
            .lock()
            .iter()
            .map(|listener| (listener.prefix.clone(), Arc::clone(&listener.callback)))
            .collect();

        for (prefix, callback) in snapshot {
            let batch: Vec<Diff<Value>> = diffs
                .iter()
                .filter(|diff| diff.key().starts_with(&prefix))
                .cloned()
                .collect();
            if !batch.is_empty() {
                callback(&batch);
            }
        }

        tracing::trace!(ops = patch.len(), diffs = diffs.len(), "patch applied");
        diffs.len()
    }

    fn write(&self, patch: &[PatchOperation]) -> Vec<Diff<Value>> {
        let mut data = self.data.write();
        // Value of every touched key before the patch.
        let mut before: BTreeMap<String, Option<Value>> = BTreeMap::new();

        for op in patch {
            match op {
                PatchOperation::Clear => {
                    for (key, value) in std::mem::take(&mut *data) {
                        before.entry(key).or_insert(Some(value));
                    }
                }
                PatchOperation::Put { key, value } => {
                    let previous = data.insert(key.clone(), value.clone());
                    before.entry(key.clone()).or_insert(previous);
                }
                PatchOperation::Del { key } => {
                    let previous = data.remove(key);
                    before.entry(key.clone()).or_insert(previous);
                }
            }
        }

        before
            .into_iter()
            .filter_map(|(key, old)| match (old, data.get(&key)) {
                (None, Some(new)) => Some(Diff::Add {
                    key,
                    new_value: new.clone(),
                }),
                (Some(old), None) => Some(Diff::Del { key, old_value: old }),
                (Some(old), Some(new)) if old != *new => Some(Diff::Change {
                    key,
                    old_value: old,
                    new_value: new.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Returns the value at `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    /// Returns every entry under `prefix`, in key order.
    pub fn scan(&self, prefix: &str) -> Vec<(String, Value)> {
        self.data
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Returns the number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns the number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffSource<Value> for Replica {
    fn subscribe(&self, prefix: &str, callback: DiffCallback<Value>) -> Subscription {
        let _delivery = self.delivery.lock();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push(Listener {
            id,
            prefix: prefix.to_string(),
            callback: Arc::clone(&callback),
        });

        let initial: Vec<Diff<Value>> = self
            .scan(prefix)
            .into_iter()
            .map(|(key, new_value)| Diff::Add { key, new_value })
            .collect();
        callback(&initial);

        let listeners = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().retain(|listener| listener.id != id);
            }
        })
    }
}
