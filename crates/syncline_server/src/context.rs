//! Per-request context.

use syncline_protocol::Actor;
use uuid::Uuid;

/// Identity and tracing id of one request, passed explicitly to the push
/// and pull handlers and to every mutation handler.
#[derive(Debug, Clone)]
pub struct RequestContext {
    actor: Actor,
    request_id: String,
}

impl RequestContext {
    /// Creates a context with a fresh request id.
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// Returns the caller.
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Returns the request id.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Derives a context acting as another actor within the same request,
    /// e.g. a system actor for a workspace a handler just created.
    pub fn with_actor(&self, actor: Actor) -> Self {
        Self {
            actor,
            request_id: self.request_id.clone(),
        }
    }
}
