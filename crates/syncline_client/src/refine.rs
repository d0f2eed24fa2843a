//! Memoized derived views over a scan.

use crate::reconcile::Reconcile;
use crate::scan::ScanState;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

type RefineFn<V, R> = dyn Fn(&[V]) -> R + Send + Sync;

/// A value derived from a [`ScanView`](crate::ScanView)'s items.
///
/// Recomputed lazily on [`get`](Refined::get) only when the scan's
/// revision moved since the last computation.
pub struct Refined<V, R> {
    state: Arc<RwLock<ScanState<V>>>,
    refine: Box<RefineFn<V, R>>,
    cache: Mutex<Option<(u64, Arc<R>)>>,
}

impl<V: Reconcile + Clone, R> Refined<V, R> {
    pub(crate) fn new<F>(state: Arc<RwLock<ScanState<V>>>, refine: F) -> Self
    where
        F: Fn(&[V]) -> R + Send + Sync + 'static,
    {
        Self {
            state,
            refine: Box::new(refine),
            cache: Mutex::new(None),
        }
    }

    /// Returns the derived value, recomputing it if the scan changed.
    pub fn get(&self) -> Arc<R> {
        let state = self.state.read();
        let mut cache = self.cache.lock();
        if let Some((revision, value)) = cache.as_ref() {
            if *revision == state.revision {
                return Arc::clone(value);
            }
        }
        let value = Arc::new((self.refine)(&state.items));
        *cache = Some((state.revision, Arc::clone(&value)));
        value
    }
}
