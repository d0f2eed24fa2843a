//! Diff stream source contract.

use crate::diff::Diff;
use std::fmt;
use std::sync::Arc;

/// Receives ordered diff batches.
pub type DiffCallback<V> = Arc<dyn Fn(&[Diff<V>]) + Send + Sync>;

/// A store that streams key-level diffs to prefix subscribers.
///
/// Implementations deliver the current contents under the prefix as `Add`
/// diffs in the first batch (possibly empty), then every later change as
/// one batch per write.
pub trait DiffSource<V>: Send + Sync {
    /// Subscribes `callback` to keys starting with `prefix`.
    fn subscribe(&self, prefix: &str, callback: DiffCallback<V>) -> Subscription;
}

/// Handle of a live subscription. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Creates a subscription that runs `cancel` once when dropped.
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Unsubscribes now.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
