//! Main sync server.

use crate::config::ServerConfig;
use crate::context::RequestContext;
use crate::entities::EntitySource;
use crate::error::{ServerError, ServerResult};
use crate::http::{HttpResponse, PULL_PATH, PUSH_PATH};
use crate::poke::{Poke, PokeBus, PokeChannel};
use crate::pull::PullHandler;
use crate::push::{PushHandler, PushOutcome};
use crate::registry::MutationRegistry;
use crate::store::{MemoryStore, SyncStore};
use std::sync::Arc;
use syncline_protocol::{PullRequest, PullResponse, PushRequest};
use tokio::sync::broadcast;

/// The sync server.
///
/// Owns the push and pull handlers and the poke bus. The actor of each
/// request is resolved by the embedding application and passed in through
/// a [`RequestContext`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use syncline_server::{MemoryEntityStore, MutationRegistry, ServerConfig, SyncServer};
///
/// let mut registry = MutationRegistry::new();
/// registry.expose("noop", |_ctx, _args| Ok(()));
///
/// let entities = Arc::new(MemoryEntityStore::new(["workspace", "stage"]));
/// let server = SyncServer::new(ServerConfig::default(), registry, entities);
/// assert_eq!(server.config().push_version, 1);
/// ```
pub struct SyncServer {
    config: ServerConfig,
    store: Arc<dyn SyncStore>,
    pokes: Arc<PokeBus>,
    push: PushHandler,
    pull: PullHandler,
}

impl SyncServer {
    /// Creates a server backed by an in-memory row store.
    pub fn new(
        config: ServerConfig,
        registry: MutationRegistry,
        entities: Arc<dyn EntitySource>,
    ) -> Self {
        Self::with_store(config, registry, entities, Arc::new(MemoryStore::new()))
    }

    /// Creates a server over an existing row store.
    pub fn with_store(
        config: ServerConfig,
        registry: MutationRegistry,
        entities: Arc<dyn EntitySource>,
        store: Arc<dyn SyncStore>,
    ) -> Self {
        let pokes = Arc::new(PokeBus::new(config.poke_capacity));
        let push = PushHandler::new(
            config.clone(),
            Arc::clone(&store),
            Arc::new(registry),
            Arc::clone(&pokes) as Arc<dyn PokeChannel>,
        );
        let pull = PullHandler::new(config.clone(), Arc::clone(&store), entities);
        tracing::debug!(
            push_version = config.push_version,
            cookie_version = config.cookie_version,
            "sync server created"
        );
        Self {
            config,
            store,
            pokes,
            push,
            pull,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the row store.
    pub fn store(&self) -> &Arc<dyn SyncStore> {
        &self.store
    }

    /// Subscribes to pokes sent after pushes.
    pub fn subscribe_pokes(&self) -> broadcast::Receiver<Poke> {
        self.pokes.subscribe()
    }

    /// Handles a push request.
    pub fn push(&self, ctx: &RequestContext, request: &PushRequest) -> ServerResult<PushOutcome> {
        self.push.handle(ctx, request)
    }

    /// Handles a pull request.
    pub fn pull(&self, ctx: &RequestContext, request: &PullRequest) -> ServerResult<PullResponse> {
        self.pull.handle(ctx, request)
    }

    /// Routes a `POST` to `/push` or `/pull` and maps the outcome to HTTP.
    pub fn handle_http(&self, ctx: &RequestContext, path: &str, body: &[u8]) -> HttpResponse {
        if path != PUSH_PATH && path != PULL_PATH {
            return HttpResponse::not_found(path);
        }
        if ctx.actor().is_public() {
            return HttpResponse::from_error(&ServerError::Unauthorized(
                "authentication required".into(),
            ));
        }

        if path == PUSH_PATH {
            let request = match PushRequest::from_json(body) {
                Ok(request) => request,
                Err(err) => return HttpResponse::from_error(&ServerError::InvalidRequest(err.to_string())),
            };
            match self.push(ctx, &request) {
                Ok(PushOutcome::Processed(_)) => HttpResponse::ok(),
                Ok(PushOutcome::Redirect { location }) => HttpResponse::redirect(&location),
                Err(err) => HttpResponse::from_error(&err),
            }
        } else {
            let request = match PullRequest::from_json(body) {
                Ok(request) => request,
                Err(err) => return HttpResponse::from_error(&ServerError::InvalidRequest(err.to_string())),
            };
            match self.pull(ctx, &request) {
                Ok(response) => HttpResponse::json(&response),
                Err(err) => HttpResponse::from_error(&err),
            }
        }
    }
}
