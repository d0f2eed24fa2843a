//! Live optional value at one exact key.

use crate::diff::Diff;
use crate::reconcile::Reconcile;
use crate::source::{DiffCallback, DiffSource, Subscription};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

struct GetState<V> {
    path: String,
    generation: u64,
    value: Option<V>,
    ready: bool,
    revision: u64,
}

impl<V: Reconcile + Clone> GetState<V> {
    fn apply(&mut self, diffs: &[Diff<V>]) {
        let mut changed = !self.ready;
        self.ready = true;

        // Prefix subscriptions also see longer keys sharing the path.
        for diff in diffs.iter().filter(|diff| diff.key() == self.path) {
            changed |= match diff {
                Diff::Del { .. } => self.value.take().is_some(),
                Diff::Add { new_value, .. } | Diff::Change { new_value, .. } => {
                    match self.value.as_mut() {
                        Some(current) => current.reconcile(new_value.clone()),
                        None => {
                            self.value = Some(new_value.clone());
                            true
                        }
                    }
                }
            };
        }

        if changed {
            self.revision += 1;
        }
    }
}

/// A live view of the value at one key.
pub struct GetView<V> {
    state: Arc<RwLock<GetState<V>>>,
    source: Arc<dyn DiffSource<V>>,
    subscription: Mutex<Option<Subscription>>,
}

impl<V> GetView<V>
where
    V: Reconcile + Clone + Send + Sync + 'static,
{
    /// Subscribes to `path` on `source`.
    pub fn watch(source: Arc<dyn DiffSource<V>>, path: impl Into<String>) -> Self {
        let view = Self {
            state: Arc::new(RwLock::new(GetState {
                path: String::new(),
                generation: 0,
                value: None,
                ready: false,
                revision: 0,
            })),
            source,
            subscription: Mutex::new(None),
        };
        view.subscribe(path.into());
        view
    }

    /// Moves the view to another key, starting over as not ready.
    pub fn retarget(&self, path: impl Into<String>) {
        let path = path.into();
        if self.state.read().path == path {
            return;
        }
        let previous = self.subscription.lock().take();
        drop(previous);
        self.subscribe(path);
    }

    fn subscribe(&self, path: String) {
        let generation = {
            let mut state = self.state.write();
            state.path = path.clone();
            state.generation += 1;
            state.value = None;
            state.ready = false;
            state.revision += 1;
            state.generation
        };

        let state = Arc::clone(&self.state);
        let callback: DiffCallback<V> = Arc::new(move |diffs: &[Diff<V>]| {
            let mut state = state.write();
            if state.generation != generation {
                return;
            }
            state.apply(diffs);
        });
        let subscription = self.source.subscribe(&path, callback);
        *self.subscription.lock() = Some(subscription);
    }

    /// Returns true once the source confirmed presence or absence.
    pub fn is_ready(&self) -> bool {
        self.state.read().ready
    }

    /// Returns the watched key.
    pub fn path(&self) -> String {
        self.state.read().path.clone()
    }

    /// Returns a copy of the value.
    pub fn value(&self) -> Option<V> {
        self.state.read().value.clone()
    }

    /// Runs `f` over the value without copying it.
    pub fn with_value<R>(&self, f: impl FnOnce(Option<&V>) -> R) -> R {
        f(self.state.read().value.as_ref())
    }

    /// Counter bumped on every visible change.
    pub fn revision(&self) -> u64 {
        self.state.read().revision
    }
}
