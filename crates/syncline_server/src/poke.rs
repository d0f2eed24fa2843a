//! Poke notifications.
//!
//! A poke carries no data; it only tells connected clients of a scope to
//! pull again. Delivery is best effort.

use tokio::sync::broadcast;

/// Wake-up signal for clients of a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poke {
    /// Workspace to wake, or `None` for everyone.
    pub scope: Option<String>,
}

/// Fire-and-forget publisher used by the push handler.
pub trait PokeChannel: Send + Sync {
    /// Publishes a poke. Never fails.
    fn publish(&self, scope: Option<&str>);
}

/// Broadcast-backed [`PokeChannel`].
///
/// Slow receivers that fall behind the buffer lose old pokes, which is
/// harmless: any poke means "pull".
#[derive(Debug, Clone)]
pub struct PokeBus {
    sender: broadcast::Sender<Poke>,
}

impl PokeBus {
    /// Creates a bus buffering up to `capacity` pokes per receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to future pokes.
    pub fn subscribe(&self) -> broadcast::Receiver<Poke> {
        self.sender.subscribe()
    }

    /// Returns the number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PokeBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl PokeChannel for PokeBus {
    fn publish(&self, scope: Option<&str>) {
        let poke = Poke {
            scope: scope.map(str::to_string),
        };
        match self.sender.send(poke) {
            Ok(receivers) => tracing::info!(scope = ?scope, receivers, "poke sent"),
            Err(_) => tracing::debug!(scope = ?scope, "poke dropped, no subscribers"),
        }
    }
}
