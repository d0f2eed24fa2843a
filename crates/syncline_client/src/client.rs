//! Sync client driver.
//!
//! Queues local mutations, pushes them in order, and pulls patches into the
//! local [`Replica`]. A pending mutation stays queued until a pull reports
//! a `lastMutationID` at or past its id, so a lost push response is
//! recovered by simply pushing again.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::get::GetView;
use crate::replica::Replica;
use crate::scan::ScanView;
use crate::source::DiffSource;
use crate::transport::SyncTransport;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use syncline_protocol::{key_path, Mutation, PullRequest, PushRequest, SyncCookie};
use uuid::Uuid;

/// Result of one pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullSummary {
    /// Patch operations received.
    pub operations: usize,
    /// Keys whose local value changed.
    pub changed: usize,
    /// Last mutation the server applied for this client.
    pub last_mutation_id: u64,
}

/// Result of a push followed by a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    /// Mutations sent.
    pub pushed: usize,
    /// Pull outcome.
    pub pull: PullSummary,
}

/// Counters about sync operations.
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    /// Successful pushes.
    pub pushes: u64,
    /// Successful pulls.
    pub pulls: u64,
    /// Retries performed by [`SyncClient::sync_with_retry`].
    pub retries: u64,
    /// Times the client identity was replaced after a desync.
    pub identity_resets: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

struct ClientState {
    client_id: String,
    pending: VecDeque<Mutation>,
    next_mutation_id: u64,
    cookie: Option<SyncCookie>,
    last_mutation_id: u64,
}

/// Drives push and pull for one client.
pub struct SyncClient<T: SyncTransport> {
    config: ClientConfig,
    transport: T,
    replica: Arc<Replica>,
    state: Mutex<ClientState>,
    stats: RwLock<ClientStats>,
}

impl<T: SyncTransport> SyncClient<T> {
    /// Creates a client with an empty replica.
    pub fn new(config: ClientConfig, transport: T) -> Self {
        let state = ClientState {
            client_id: config.client_id.clone(),
            pending: VecDeque::new(),
            next_mutation_id: 1,
            cookie: None,
            last_mutation_id: 0,
        };
        Self {
            config,
            transport,
            replica: Arc::new(Replica::new()),
            state: Mutex::new(state),
            stats: RwLock::new(ClientStats::default()),
        }
    }

    /// Returns the configuration the client was created with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the current client id.
    ///
    /// Differs from the configured id after a desync reset.
    pub fn client_id(&self) -> String {
        self.state.lock().client_id.clone()
    }

    /// Returns the local replica.
    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    /// Returns the cookie of the last pull.
    pub fn cookie(&self) -> Option<SyncCookie> {
        self.state.lock().cookie.clone()
    }

    /// Returns the last mutation id the server confirmed.
    pub fn last_mutation_id(&self) -> u64 {
        self.state.lock().last_mutation_id
    }

    /// Returns the queued mutations, oldest first.
    pub fn pending(&self) -> Vec<Mutation> {
        self.state.lock().pending.iter().cloned().collect()
    }

    /// Returns the number of queued mutations.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns the current stats.
    pub fn stats(&self) -> ClientStats {
        self.stats.read().clone()
    }

    /// Queues a mutation and returns its id.
    pub fn mutate(&self, name: impl Into<String>, args: Value) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_mutation_id;
        state.next_mutation_id += 1;
        let mutation = Mutation::new(id, state.client_id.clone(), name, args);
        tracing::debug!(mutation_id = id, name = %mutation.name, "mutation queued");
        state.pending.push_back(mutation);
        id
    }

    /// Live list of the rows under `/<parts...>`.
    pub fn watch_scan<S: AsRef<str>>(&self, parts: &[S]) -> ScanView<Value> {
        let mut prefix = key_path(parts);
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        ScanView::watch(self.source(), prefix)
    }

    /// Live value at `/<parts...>`.
    pub fn watch_get<S: AsRef<str>>(&self, parts: &[S]) -> GetView<Value> {
        GetView::watch(self.source(), key_path(parts))
    }

    fn source(&self) -> Arc<dyn DiffSource<Value>> {
        Arc::clone(&self.replica) as Arc<dyn DiffSource<Value>>
    }

    /// Pushes every queued mutation. Returns how many were sent.
    pub fn push(&self) -> ClientResult<usize> {
        let mutations = self.pending();
        if mutations.is_empty() {
            return Ok(0);
        }

        let request = PushRequest {
            client_group_id: self.config.client_group_id.clone(),
            push_version: self.config.push_version,
            mutations,
        };

        match self.transport.push(&request) {
            Ok(()) => {
                tracing::debug!(count = request.mutations.len(), "pushed mutations");
                self.stats.write().pushes += 1;
                Ok(request.mutations.len())
            }
            Err(err) => {
                if matches!(err, ClientError::Desync(_)) {
                    self.reset_identity();
                }
                self.record_error(&err);
                Err(err)
            }
        }
    }

    /// Pulls and applies a patch.
    pub fn pull(&self) -> ClientResult<PullSummary> {
        let (client_id, cookie) = {
            let state = self.state.lock();
            (state.client_id.clone(), state.cookie.clone())
        };
        let request = PullRequest::new(client_id.clone(), cookie.as_ref());

        let response = match self.transport.pull(&request) {
            Ok(response) => response,
            Err(err) => {
                self.record_error(&err);
                return Err(err);
            }
        };

        let changed = self.replica.apply_patch(&response.patch);

        {
            let mut state = self.state.lock();
            // An identity reset raced this pull; its answer is for the old id.
            if state.client_id == client_id {
                state.cookie = Some(response.cookie.clone());
                state.last_mutation_id = response.last_mutation_id;
                let acknowledged = response.last_mutation_id;
                state.pending.retain(|mutation| mutation.id > acknowledged);
            }
        }

        tracing::debug!(
            operations = response.patch.len(),
            changed,
            last_mutation_id = response.last_mutation_id,
            "pulled patch"
        );
        self.stats.write().pulls += 1;
        Ok(PullSummary {
            operations: response.patch.len(),
            changed,
            last_mutation_id: response.last_mutation_id,
        })
    }

    /// Pushes pending mutations, then pulls.
    pub fn sync(&self) -> ClientResult<SyncSummary> {
        let pushed = self.push()?;
        let pull = self.pull()?;
        Ok(SyncSummary { pushed, pull })
    }

    /// Runs [`sync`](Self::sync), retrying transient failures with backoff.
    pub fn sync_with_retry(&self) -> ClientResult<SyncSummary> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }
            match self.sync() {
                Ok(summary) => return Ok(summary),
                Err(err) if err.is_retryable() && attempt + 1 < retry.max_attempts => {
                    tracing::warn!(attempt, error = %err, "sync failed, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Reacts to a poke by pulling.
    pub fn handle_poke(&self) -> ClientResult<PullSummary> {
        tracing::debug!("poked");
        self.pull()
    }

    /// Continues under a fresh client id after the server reported this
    /// client ahead of its records. Pending mutations are renumbered from 1
    /// and the next pull is a full resync.
    fn reset_identity(&self) {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.client_id, Uuid::new_v4().to_string());
        let client_id = state.client_id.clone();
        for (mutation, id) in state.pending.iter_mut().zip(1u64..) {
            mutation.id = id;
            mutation.client_id = client_id.clone();
        }
        state.next_mutation_id = state.pending.len() as u64 + 1;
        state.cookie = None;
        state.last_mutation_id = 0;
        drop(state);

        tracing::error!(previous = %previous, client = %client_id, "client out of sync, identity reset");
        self.stats.write().identity_resets += 1;
    }

    fn record_error(&self, err: &ClientError) {
        self.stats.write().last_error = Some(err.to_string());
    }
}
