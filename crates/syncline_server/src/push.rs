//! Push protocol handler.
//!
//! Applies a batch of mutations exactly once and in order. Each mutation
//! runs in its own unit of work that locks the client group and client rows,
//! so counters stay monotonic under concurrent pushes from the same group.
//! Commits are per mutation: a batch aborted half way keeps what it applied,
//! and the client replays the rest, which the id comparison skips.

use crate::config::ServerConfig;
use crate::context::RequestContext;
use crate::error::{ServerError, ServerResult};
use crate::poke::PokeChannel;
use crate::registry::MutationRegistry;
use crate::store::{SyncStore, UnitOfWork};
use std::sync::Arc;
use syncline_protocol::{Client, ClientGroup, Mutation, PushRequest};

/// Result of a push request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The batch was processed.
    Processed(PushSummary),
    /// The push version is not served here; retry at `location`.
    Redirect {
        /// Endpoint to retry against.
        location: String,
    },
}

/// Per-batch counts, for logging and tests. Not sent to the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    /// Mutations whose handler succeeded.
    pub applied: usize,
    /// Mutations already applied earlier.
    pub skipped: usize,
    /// Mutations whose handler failed; their ids were still consumed.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MutationOutcome {
    Applied,
    Skipped,
    Failed,
}

/// Handles `POST /push`.
pub struct PushHandler {
    config: ServerConfig,
    store: Arc<dyn SyncStore>,
    registry: Arc<MutationRegistry>,
    pokes: Arc<dyn PokeChannel>,
}

impl PushHandler {
    /// Creates a push handler.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn SyncStore>,
        registry: Arc<MutationRegistry>,
        pokes: Arc<dyn PokeChannel>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            pokes,
        }
    }

    /// Processes a push batch.
    pub fn handle(&self, ctx: &RequestContext, request: &PushRequest) -> ServerResult<PushOutcome> {
        let actor = ctx.actor();
        if actor.is_public() {
            return Err(ServerError::Unauthorized("push requires an authenticated actor".into()));
        }

        if request.push_version != self.config.push_version {
            tracing::info!(
                push_version = request.push_version,
                supported = self.config.push_version,
                "redirecting unsupported push version"
            );
            return Ok(PushOutcome::Redirect {
                location: self.config.push_redirect.clone(),
            });
        }

        if request.mutations.len() > self.config.max_push_batch {
            return Err(ServerError::InvalidRequest(format!(
                "too many mutations: {} > {}",
                request.mutations.len(),
                self.config.max_push_batch
            )));
        }

        let span = tracing::info_span!(
            "push",
            request_id = %ctx.request_id(),
            client_group = %request.client_group_id,
            actor = actor.kind(),
        );
        let _entered = span.enter();

        let mut summary = PushSummary::default();
        for mutation in &request.mutations {
            match self.process(ctx, &request.client_group_id, mutation)? {
                MutationOutcome::Applied => summary.applied += 1,
                MutationOutcome::Skipped => summary.skipped += 1,
                MutationOutcome::Failed => summary.failed += 1,
            }
        }

        tracing::debug!(
            applied = summary.applied,
            skipped = summary.skipped,
            failed = summary.failed,
            "push processed"
        );

        if let Some(scope) = actor.poke_scope() {
            self.pokes.publish(Some(scope));
        }

        Ok(PushOutcome::Processed(summary))
    }

    fn process(
        &self,
        ctx: &RequestContext,
        client_group_id: &str,
        mutation: &Mutation,
    ) -> ServerResult<MutationOutcome> {
        let actor = ctx.actor();
        let mut outcome = MutationOutcome::Skipped;

        self.store.transact(client_group_id, &mut |tx: &mut dyn UnitOfWork| {
            let group = tx
                .client_group_for_update(client_group_id)?
                .unwrap_or_else(|| ClientGroup::new(client_group_id, actor.clone()));

            if group.actor != *actor {
                return Err(ServerError::Unauthorized(format!(
                    "{} is not authorized to push to {client_group_id}",
                    actor.kind()
                )));
            }

            let client = tx
                .client_for_update(&mutation.client_id)?
                .unwrap_or_else(|| Client::new(&mutation.client_id, client_group_id));

            if client.client_group_id != client_group_id {
                return Err(ServerError::Unauthorized(format!(
                    "client {} does not belong to {client_group_id}",
                    mutation.client_id
                )));
            }

            let next_mutation_id = client.mutation_id + 1;

            if mutation.id < next_mutation_id {
                tracing::debug!(
                    mutation_id = mutation.id,
                    client = %mutation.client_id,
                    "mutation already processed, skipping"
                );
                outcome = MutationOutcome::Skipped;
                return Ok(());
            }

            if mutation.id > next_mutation_id {
                tracing::error!(
                    mutation_id = mutation.id,
                    expected = next_mutation_id,
                    client = %mutation.client_id,
                    "mutation is from the future, aborting push"
                );
                return Err(ServerError::MutationFromFuture {
                    client_id: mutation.client_id.clone(),
                    expected: next_mutation_id,
                    received: mutation.id,
                });
            }

            tracing::debug!(mutation_id = mutation.id, name = %mutation.name, "processing mutation");
            outcome = match self.registry.execute(ctx, &mutation.name, mutation.args.clone()) {
                Ok(()) => MutationOutcome::Applied,
                Err(err) if err.is_visible() => {
                    tracing::warn!(
                        mutation_id = mutation.id,
                        name = %mutation.name,
                        error = %err,
                        "mutation rejected, sequence advanced"
                    );
                    MutationOutcome::Failed
                }
                Err(err) => {
                    tracing::error!(
                        mutation_id = mutation.id,
                        name = %mutation.name,
                        error = %err,
                        "mutation failed, sequence advanced without effect"
                    );
                    MutationOutcome::Failed
                }
            };

            let next_client_version = group.client_version + 1;
            tx.upsert_client_group(ClientGroup {
                client_version: next_client_version,
                ..group
            })?;
            tx.upsert_client(Client {
                id: mutation.client_id.clone(),
                client_group_id: client_group_id.to_string(),
                mutation_id: next_mutation_id,
                client_version: next_client_version,
            })?;
            Ok(())
        })?;

        Ok(outcome)
    }
}
