//! Pull protocol handler.
//!
//! Workspace-scoped actors get a patch computed by diffing the current row
//! markers against the client view record named in the cookie. Account
//! actors get a timestamp cursor over the rows their email can reach.

use crate::config::ServerConfig;
use crate::context::RequestContext;
use crate::entities::EntitySource;
use crate::error::{ServerError, ServerResult};
use crate::store::SyncStore;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use syncline_protocol::{
    cvr_key, entity_key, ActorScope, ClientViewRecord, CvrData, PatchOperation, PullRequest,
    PullResponse, SyncCookie, WorkspaceScope, INIT_KEY,
};
use uuid::Uuid;

/// Handles `POST /pull`.
pub struct PullHandler {
    config: ServerConfig,
    store: Arc<dyn SyncStore>,
    entities: Arc<dyn EntitySource>,
    last_created_ms: AtomicU64,
}

impl PullHandler {
    /// Creates a pull handler.
    pub fn new(config: ServerConfig, store: Arc<dyn SyncStore>, entities: Arc<dyn EntitySource>) -> Self {
        Self {
            config,
            store,
            entities,
            last_created_ms: AtomicU64::new(0),
        }
    }

    /// Creation timestamps are strictly increasing so retention never has
    /// to break ties between snapshots of one client.
    fn next_created_ms(&self) -> u64 {
        let now = now_ms();
        let mut current = self.last_created_ms.load(Ordering::SeqCst);
        loop {
            let next = now.max(current + 1);
            match self.last_created_ms.compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Computes the patch that brings the client up to date.
    pub fn handle(&self, ctx: &RequestContext, request: &PullRequest) -> ServerResult<PullResponse> {
        let span = tracing::info_span!(
            "pull",
            request_id = %ctx.request_id(),
            client = %request.client_id,
            actor = ctx.actor().kind(),
        );
        let _entered = span.enter();

        // A cookie from another schema generation is as good as none.
        let cookie = request
            .cookie()
            .filter(|cookie| cookie.version == self.config.cookie_version);
        if request.cookie.is_some() && cookie.is_none() {
            tracing::debug!("unusable cookie, resyncing from scratch");
        }

        let last_mutation_id = self.last_mutation_id(ctx, &request.client_id)?;

        let (patch, cookie) = match ctx.actor().scope() {
            ActorScope::Anonymous => {
                return Err(ServerError::Unauthorized("pull requires an authenticated actor".into()))
            }
            ActorScope::Workspace(scope) => {
                self.pull_workspace(ctx, &request.client_id, &scope, cookie)?
            }
            ActorScope::Account { email } => self.pull_account(&email, cookie)?,
        };

        tracing::debug!(ops = patch.len(), cvr = %cookie.cvr, "pull computed");
        Ok(PullResponse {
            last_mutation_id,
            patch,
            cookie,
        })
    }

    /// Sequence number of `client_id`, or 0 when its group belongs to
    /// another actor.
    fn last_mutation_id(&self, ctx: &RequestContext, client_id: &str) -> ServerResult<u64> {
        let Some(client) = self.store.client(client_id)? else {
            return Ok(0);
        };
        let owned = self
            .store
            .client_group(&client.client_group_id)?
            .is_some_and(|group| group.actor == *ctx.actor());
        if !owned {
            tracing::debug!(client = %client_id, "client belongs to another actor");
            return Ok(0);
        }
        Ok(client.mutation_id)
    }

    fn pull_workspace(
        &self,
        ctx: &RequestContext,
        client_id: &str,
        scope: &WorkspaceScope,
        cookie: Option<SyncCookie>,
    ) -> ServerResult<(Vec<PatchOperation>, SyncCookie)> {
        let cookie = cookie.unwrap_or_else(|| SyncCookie::initial(self.config.cookie_version));
        let old_cvr = self.load_cvr(ctx, &cookie.cvr)?;

        let mut patch = Vec::new();
        if old_cvr.is_none() {
            patch.push(PatchOperation::Clear);
            patch.push(PatchOperation::put(INIT_KEY, Value::Bool(true)));
        }

        let mut unseen = old_cvr.map(|cvr| cvr.data).unwrap_or_default();
        let mut next = CvrData::new();
        let mut changed: Vec<(String, Vec<String>)> = Vec::new();

        for table in self.entities.workspace_tables() {
            let mut ids = Vec::new();
            for row in self.entities.row_versions(&table, scope)? {
                let key = cvr_key(&table, &row.id);
                if unseen.remove(&key).as_ref() != Some(&row.modified) {
                    ids.push(row.id.clone());
                }
                next.insert(key, row.modified);
            }
            if !ids.is_empty() {
                changed.push((table, ids));
            }
        }

        for (table, ids) in &changed {
            for (id, value) in self.entities.fetch_rows(table, scope, ids)? {
                patch.push(PatchOperation::put(entity_key(table, &id), value));
            }
        }

        for key in unseen.keys() {
            patch.push(PatchOperation::del(format!("/{key}")));
        }

        if patch.is_empty() {
            return Ok((patch, cookie));
        }

        let cvr = ClientViewRecord {
            id: Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            actor: ctx.actor().clone(),
            data: next,
            created_at_ms: self.next_created_ms(),
        };
        self.store.put_cvr(&cvr)?;
        tracing::info!(
            cvr = %cvr.id,
            rows = cvr.data.len(),
            ops = patch.len(),
            "client view record created"
        );
        self.prune(client_id, cvr.created_at_ms);

        Ok((
            patch,
            SyncCookie {
                version: self.config.cookie_version,
                last_sync: cookie.last_sync,
                cvr: cvr.id,
            },
        ))
    }

    /// Loads the CVR named by a cookie. Missing records and records made
    /// for another actor both count as absent.
    fn load_cvr(&self, ctx: &RequestContext, id: &str) -> ServerResult<Option<ClientViewRecord>> {
        if id.is_empty() {
            return Ok(None);
        }
        match self.store.cvr(id)? {
            Some(cvr) if cvr.actor == *ctx.actor() => Ok(Some(cvr)),
            Some(_) => {
                tracing::warn!(cvr = %id, "client view record belongs to another actor");
                Ok(None)
            }
            None => {
                tracing::debug!(cvr = %id, "client view record not found");
                Ok(None)
            }
        }
    }

    fn prune(&self, client_id: &str, now_ms: u64) {
        let retention_ms = u64::try_from(self.config.cvr_retention.as_millis()).unwrap_or(u64::MAX);
        let cutoff = now_ms.saturating_sub(retention_ms);
        match self
            .store
            .prune_cvrs(client_id, cutoff, self.config.cvr_keep_latest)
        {
            Ok(0) => {}
            Ok(pruned) => tracing::debug!(pruned, "pruned client view records"),
            Err(err) => tracing::warn!(error = %err, "failed to prune client view records"),
        }
    }

    fn pull_account(
        &self,
        email: &str,
        cookie: Option<SyncCookie>,
    ) -> ServerResult<(Vec<PatchOperation>, SyncCookie)> {
        let full_resync = cookie.is_none();
        let mut cookie = cookie.unwrap_or_else(|| SyncCookie::initial(self.config.cookie_version));

        let mut patch = Vec::new();
        if full_resync {
            patch.push(PatchOperation::Clear);
            patch.push(PatchOperation::put(INIT_KEY, Value::Bool(true)));
        }

        // Rows can be reported twice when reachable through several paths.
        let mut rows = BTreeMap::new();
        for row in self.entities.account_rows_since(email, &cookie.last_sync)? {
            if row.modified > cookie.last_sync {
                cookie.last_sync = row.modified.clone();
            }
            rows.insert(entity_key(&row.table, &row.id), row.value);
        }
        patch.extend(rows.into_iter().map(|(key, value)| PatchOperation::put(key, value)));

        Ok((patch, cookie))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
