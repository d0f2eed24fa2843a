//! Key-level change vocabulary delivered by a diff source.

/// One change to one key.
///
/// A source guarantees per key the lifecycle `Add (Change)* Del`, repeated.
#[derive(Debug, Clone, PartialEq)]
pub enum Diff<V> {
    /// The key appeared.
    Add {
        /// Key.
        key: String,
        /// Value after the change.
        new_value: V,
    },
    /// The key's value was replaced.
    Change {
        /// Key.
        key: String,
        /// Value before the change.
        old_value: V,
        /// Value after the change.
        new_value: V,
    },
    /// The key went away.
    Del {
        /// Key.
        key: String,
        /// Value before the change.
        old_value: V,
    },
}

impl<V> Diff<V> {
    /// Returns the key this diff touches.
    pub fn key(&self) -> &str {
        match self {
            Diff::Add { key, .. } | Diff::Change { key, .. } | Diff::Del { key, .. } => key,
        }
    }

    /// Returns the value after the change, if the key still exists.
    pub fn new_value(&self) -> Option<&V> {
        match self {
            Diff::Add { new_value, .. } | Diff::Change { new_value, .. } => Some(new_value),
            Diff::Del { .. } => None,
        }
    }

    /// Returns the value before the change, if the key existed.
    pub fn old_value(&self) -> Option<&V> {
        match self {
            Diff::Change { old_value, .. } | Diff::Del { old_value, .. } => Some(old_value),
            Diff::Add { .. } => None,
        }
    }

    /// Returns true for an [`Diff::Add`].
    pub fn is_add(&self) -> bool {
        matches!(self, Diff::Add { .. })
    }
}
