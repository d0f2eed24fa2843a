//! In-place value updates.
//!
//! A `change` diff is merged into the value a view already holds instead of
//! replacing it, so parts that did not change keep their allocation and
//! stay equal to what readers already saw.

use serde_json::Value;

/// Updates a value in place to equal `next`.
pub trait Reconcile {
    /// Makes `self` equal to `next`, returning true if anything changed.
    fn reconcile(&mut self, next: Self) -> bool;
}

impl Reconcile for Value {
    fn reconcile(&mut self, next: Self) -> bool {
        match (self, next) {
            (Value::Object(current), Value::Object(next)) => {
                let before = current.len();
                current.retain(|key, _| next.contains_key(key));
                let mut changed = current.len() != before;
                for (key, value) in next {
                    match current.get_mut(&key) {
                        Some(existing) => changed |= existing.reconcile(value),
                        None => {
                            current.insert(key, value);
                            changed = true;
                        }
                    }
                }
                changed
            }
            (Value::Array(current), Value::Array(next)) => {
                let mut changed = current.len() != next.len();
                current.truncate(next.len());
                let mut rest = next.into_iter();
                for existing in current.iter_mut() {
                    if let Some(value) = rest.next() {
                        changed |= existing.reconcile(value);
                    }
                }
                current.extend(rest);
                changed
            }
            (current, next) => {
                if *current == next {
                    false
                } else {
                    *current = next;
                    true
                }
            }
        }
    }
}

macro_rules! reconcile_by_replace {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Reconcile for $ty {
                fn reconcile(&mut self, next: Self) -> bool {
                    if *self == next {
                        return false;
                    }
                    *self = next;
                    true
                }
            }
        )*
    };
}

reconcile_by_replace!(bool, i32, i64, u32, u64, f64, String);
