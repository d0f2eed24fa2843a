//! Live ordered list over a key prefix.
//!
//! The first batch after subscribing holds the current contents as `Add`
//! diffs and is loaded in one pass. Later batches are applied diff by diff
//! under a single write lock, so readers never see half a batch.
//!
//! Deletion swaps the last element into the freed slot. It is O(1) but does
//! not keep insertion order; sort downstream (e.g. with [`ScanView::refine`])
//! when order matters.

use crate::diff::Diff;
use crate::reconcile::Reconcile;
use crate::refine::Refined;
use crate::source::{DiffCallback, DiffSource, Subscription};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) struct ScanState<V> {
    pub(crate) prefix: String,
    pub(crate) generation: u64,
    pub(crate) items: Vec<V>,
    /// index -> key
    pub(crate) keys: Vec<String>,
    /// key -> index
    pub(crate) index: HashMap<String, usize>,
    pub(crate) ready: bool,
    pub(crate) revision: u64,
}

impl<V: Reconcile + Clone> ScanState<V> {
    fn new(prefix: String) -> Self {
        Self {
            prefix,
            generation: 0,
            items: Vec::new(),
            keys: Vec::new(),
            index: HashMap::new(),
            ready: false,
            revision: 0,
        }
    }

    fn reset(&mut self, prefix: String) {
        self.prefix = prefix;
        self.generation += 1;
        self.items.clear();
        self.keys.clear();
        self.index.clear();
        self.ready = false;
        self.revision += 1;
    }

    pub(crate) fn apply(&mut self, diffs: &[Diff<V>]) {
        if !self.ready {
            self.load(diffs);
            self.ready = true;
            self.revision += 1;
            return;
        }

        let mut changed = false;
        for diff in diffs {
            changed |= self.apply_one(diff);
        }
        if changed {
            self.revision += 1;
        }
    }

    /// Cold path: bulk insert in arrival order.
    fn load(&mut self, diffs: &[Diff<V>]) {
        let adds = diffs.iter().filter(|diff| diff.is_add()).count();
        self.items.reserve(adds);
        self.keys.reserve(adds);
        self.index.reserve(adds);

        for diff in diffs {
            match diff {
                Diff::Add { key, new_value } if !self.index.contains_key(key) => {
                    self.push(key, new_value.clone());
                }
                _ => {
                    self.apply_one(diff);
                }
            }
        }
    }

    fn apply_one(&mut self, diff: &Diff<V>) -> bool {
        match diff {
            Diff::Add { key, new_value } | Diff::Change { key, new_value, .. } => {
                match self.index.get(key) {
                    Some(&i) => self.items[i].reconcile(new_value.clone()),
                    None => {
                        self.push(key, new_value.clone());
                        true
                    }
                }
            }
            Diff::Del { key, .. } => self.remove(key),
        }
    }

    fn push(&mut self, key: &str, value: V) {
        self.index.insert(key.to_string(), self.items.len());
        self.keys.push(key.to_string());
        self.items.push(value);
    }

    fn remove(&mut self, key: &str) -> bool {
        let Some(i) = self.index.remove(key) else {
            return false;
        };
        let last = self.items.len() - 1;
        self.items.swap_remove(i);
        self.keys.swap_remove(i);
        if i != last {
            self.index.insert(self.keys[i].clone(), i);
        }
        true
    }
}

/// A live list of the values under a key prefix.
pub struct ScanView<V> {
    state: Arc<RwLock<ScanState<V>>>,
    source: Arc<dyn DiffSource<V>>,
    subscription: Mutex<Option<Subscription>>,
}

impl<V> ScanView<V>
where
    V: Reconcile + Clone + Send + Sync + 'static,
{
    /// Subscribes to `prefix` on `source`.
    pub fn watch(source: Arc<dyn DiffSource<V>>, prefix: impl Into<String>) -> Self {
        let view = Self {
            state: Arc::new(RwLock::new(ScanState::new(String::new()))),
            source,
            subscription: Mutex::new(None),
        };
        view.subscribe(prefix.into());
        view
    }

    /// Moves the view to another prefix.
    ///
    /// The old subscription is dropped and the list restarts from empty.
    /// Retargeting to the current prefix does nothing.
    pub fn retarget(&self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        if self.state.read().prefix == prefix {
            return;
        }
        let previous = self.subscription.lock().take();
        drop(previous);
        self.subscribe(prefix);
    }

    fn subscribe(&self, prefix: String) {
        let generation = {
            let mut state = self.state.write();
            state.reset(prefix.clone());
            state.generation
        };

        let state = Arc::clone(&self.state);
        let callback: DiffCallback<V> = Arc::new(move |diffs: &[Diff<V>]| {
            let mut state = state.write();
            // Batches from a subscription that has been replaced.
            if state.generation != generation {
                return;
            }
            state.apply(diffs);
        });

        tracing::trace!(prefix = %prefix, "scan subscribed");
        let subscription = self.source.subscribe(&prefix, callback);
        *self.subscription.lock() = Some(subscription);
    }

    /// Returns true once the initial contents have arrived.
    pub fn is_ready(&self) -> bool {
        self.state.read().ready
    }

    /// Returns the watched prefix.
    pub fn prefix(&self) -> String {
        self.state.read().prefix.clone()
    }

    /// Counter bumped on every visible change.
    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }

    /// Returns the number of items.
    pub fn len(&self) -> usize {
        self.state.read().items.len()
    }

    /// Returns true if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.state.read().items.is_empty()
    }

    /// Returns a copy of the items.
    pub fn items(&self) -> Vec<V> {
        self.state.read().items.clone()
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<V> {
        let state = self.state.read();
        state.index.get(key).map(|&i| state.items[i].clone())
    }

    /// Returns the position of `key` in the list.
    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.state.read().index.get(key).copied()
    }

    /// Returns the key at `index`.
    pub fn key_at(&self, index: usize) -> Option<String> {
        self.state.read().keys.get(index).cloned()
    }

    /// Returns the keys in list order.
    pub fn keys(&self) -> Vec<String> {
        self.state.read().keys.clone()
    }

    /// Derives a memoized view, recomputed only after the list changes.
    pub fn refine<R, F>(&self, refine: F) -> Refined<V, R>
    where
        F: Fn(&[V]) -> R + Send + Sync + 'static,
    {
        Refined::new(Arc::clone(&self.state), refine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::Replica;
    use proptest::prelude::*;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use syncline_protocol::PatchOperation;

    fn add(key: &str, value: i64) -> Diff<i64> {
        Diff::Add {
            key: key.into(),
            new_value: value,
        }
    }

    fn change(key: &str, old_value: i64, new_value: i64) -> Diff<i64> {
        Diff::Change {
            key: key.into(),
            old_value,
            new_value,
        }
    }

    fn del(key: &str, old_value: i64) -> Diff<i64> {
        Diff::Del {
            key: key.into(),
            old_value,
        }
    }

    fn ready_state(diffs: &[Diff<i64>]) -> ScanState<i64> {
        let mut state = ScanState::new("/t/".into());
        state.apply(diffs);
        state
    }

    fn assert_indexed(state: &ScanState<i64>) {
        assert_eq!(state.items.len(), state.keys.len());
        assert_eq!(state.items.len(), state.index.len());
        for (i, key) in state.keys.iter().enumerate() {
            assert_eq!(state.index[key], i);
        }
    }

    #[test]
    fn cold_load_keeps_arrival_order() {
        let state = ready_state(&[add("/t/b", 2), add("/t/a", 1), add("/t/c", 3)]);
        assert!(state.ready);
        assert_eq!(state.items, vec![2, 1, 3]);
        assert_eq!(state.keys, vec!["/t/b", "/t/a", "/t/c"]);
        assert_indexed(&state);
    }

    #[test]
    fn empty_first_batch_is_ready() {
        let state = ready_state(&[]);
        assert!(state.ready);
        assert!(state.items.is_empty());
    }

    #[test]
    fn add_appends_and_change_replaces_in_place() {
        let mut state = ready_state(&[add("/t/a", 1), add("/t/b", 2)]);
        state.apply(&[add("/t/c", 3), change("/t/a", 1, 10)]);
        assert_eq!(state.items, vec![10, 2, 3]);
        assert_indexed(&state);
    }

    #[test]
    fn delete_swaps_last_into_slot() {
        let mut state = ready_state(&[add("/t/a", 1), add("/t/b", 2), add("/t/c", 3), add("/t/d", 4)]);
        state.apply(&[del("/t/b", 2)]);
        assert_eq!(state.items, vec![1, 4, 3]);
        assert_eq!(state.keys, vec!["/t/a", "/t/d", "/t/c"]);
        assert_indexed(&state);

        state.apply(&[del("/t/c", 3)]);
        assert_eq!(state.items, vec![1, 4]);
        assert_indexed(&state);
    }

    #[test]
    fn unknown_delete_is_ignored() {
        let mut state = ready_state(&[add("/t/a", 1)]);
        let revision = state.revision;
        state.apply(&[del("/t/zz", 0)]);
        assert_eq!(state.items, vec![1]);
        assert_eq!(state.revision, revision);
    }

    #[test]
    fn unchanged_value_keeps_revision() {
        let mut state = ready_state(&[add("/t/a", 1)]);
        let revision = state.revision;
        state.apply(&[change("/t/a", 1, 1)]);
        assert_eq!(state.revision, revision);
        state.apply(&[change("/t/a", 1, 2)]);
        assert_eq!(state.revision, revision + 1);
    }

    #[test]
    fn view_follows_replica() {
        let replica = Arc::new(Replica::new());
        replica.apply_patch(&[
            PatchOperation::put("/stage/a", json!({"name": "a"})),
            PatchOperation::put("/app/x", json!({"name": "x"})),
        ]);

        let view = ScanView::watch(replica.clone() as Arc<dyn DiffSource<Value>>, "/stage/");
        assert!(view.is_ready());
        assert_eq!(view.items(), vec![json!({"name": "a"})]);

        replica.apply_patch(&[
            PatchOperation::put("/stage/b", json!({"name": "b"})),
            PatchOperation::put("/app/y", json!({"name": "y"})),
        ]);
        assert_eq!(view.keys(), vec!["/stage/a", "/stage/b"]);

        replica.apply_patch(&[PatchOperation::put("/stage/a", json!({"name": "a2"}))]);
        assert_eq!(view.get("/stage/a"), Some(json!({"name": "a2"})));
        assert_eq!(view.index_of("/stage/a"), Some(0));

        replica.apply_patch(&[PatchOperation::del("/stage/a")]);
        assert_eq!(view.keys(), vec!["/stage/b"]);
        assert_eq!(view.key_at(0).as_deref(), Some("/stage/b"));
    }

    #[test]
    fn retarget_restarts_from_new_prefix() {
        let replica = Arc::new(Replica::new());
        replica.apply_patch(&[
            PatchOperation::put("/stage/w1/a", json!(1)),
            PatchOperation::put("/stage/w2/b", json!(2)),
        ]);

        let view = ScanView::watch(replica.clone() as Arc<dyn DiffSource<Value>>, "/stage/w1/");
        assert_eq!(view.items(), vec![json!(1)]);

        view.retarget("/stage/w2/");
        assert_eq!(view.prefix(), "/stage/w2/");
        assert_eq!(view.items(), vec![json!(2)]);
        assert_eq!(replica.listener_count(), 1);

        replica.apply_patch(&[PatchOperation::put("/stage/w1/c", json!(3))]);
        assert_eq!(view.items(), vec![json!(2)]);
    }

    #[test]
    fn dropping_view_unsubscribes() {
        let replica = Arc::new(Replica::new());
        let view = ScanView::watch(replica.clone() as Arc<dyn DiffSource<Value>>, "/");
        assert_eq!(replica.listener_count(), 1);
        drop(view);
        assert_eq!(replica.listener_count(), 0);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Put(u8, i64),
        Del(u8),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0u8..16, any::<i64>()).prop_map(|(k, v)| Step::Put(k, v)),
            (0u8..16).prop_map(Step::Del),
        ]
    }

    proptest! {
        #[test]
        fn matches_reference_map(batches in prop::collection::vec(prop::collection::vec(step(), 0..8), 0..12)) {
            let mut reference: BTreeMap<String, i64> = BTreeMap::new();
            let mut state = ready_state(&[]);

            for batch in batches {
                let mut diffs = Vec::new();
                for step in batch {
                    match step {
                        Step::Put(k, v) => {
                            let key = format!("/t/{k}");
                            match reference.insert(key.clone(), v) {
                                Some(old) => diffs.push(change(&key, old, v)),
                                None => diffs.push(add(&key, v)),
                            }
                        }
                        Step::Del(k) => {
                            let key = format!("/t/{k}");
                            if let Some(old) = reference.remove(&key) {
                                diffs.push(del(&key, old));
                            }
                        }
                    }
                }
                state.apply(&diffs);

                assert_indexed(&state);
                let mut seen: Vec<(String, i64)> = state.keys.iter().cloned().zip(state.items.iter().copied()).collect();
                seen.sort();
                let expected: Vec<(String, i64)> = reference.iter().map(|(k, v)| (k.clone(), *v)).collect();
                prop_assert_eq!(seen, expected);
            }
        }

        #[test]
        fn delete_touches_only_slot_and_tail(len in 1usize..32, pick in any::<prop::sample::Index>()) {
            let diffs: Vec<Diff<i64>> = (0..len).map(|i| add(&format!("/t/{i}"), i as i64)).collect();
            let mut state = ready_state(&diffs);
            let victim = pick.index(len);
            let before = state.items.clone();

            state.apply(&[del(&format!("/t/{victim}"), victim as i64)]);

            prop_assert_eq!(state.items.len(), len - 1);
            for j in 0..len - 1 {
                if j == victim {
                    prop_assert_eq!(state.items[j], before[len - 1]);
                } else {
                    prop_assert_eq!(state.items[j], before[j]);
                }
            }
            assert_indexed(&state);
        }
    }
}
