//! Row store for client groups, clients and client view records.
//!
//! The push handler runs each mutation inside [`SyncStore::transact`]. Rows
//! read through [`UnitOfWork`] are locked exclusively until the unit of work
//! ends, so two pushes for the same client group serialize while pushes for
//! different groups proceed in parallel. Writes are staged and only become
//! visible when the work returns `Ok`.

use crate::error::{ServerError, ServerResult};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use syncline_protocol::{Client, ClientGroup, ClientViewRecord};

/// Reads and writes inside one serializable unit of work.
pub trait UnitOfWork {
    /// Reads a client group, holding its row lock until the work ends.
    fn client_group_for_update(&mut self, id: &str) -> ServerResult<Option<ClientGroup>>;

    /// Reads a client, holding its row lock until the work ends.
    fn client_for_update(&mut self, id: &str) -> ServerResult<Option<Client>>;

    /// Inserts or replaces a client group.
    fn upsert_client_group(&mut self, group: ClientGroup) -> ServerResult<()>;

    /// Inserts or replaces a client.
    fn upsert_client(&mut self, client: Client) -> ServerResult<()>;
}

/// Work executed by [`SyncStore::transact`].
pub type Work<'a> = dyn FnMut(&mut dyn UnitOfWork) -> ServerResult<()> + 'a;

/// Persistence of sync bookkeeping rows.
pub trait SyncStore: Send + Sync {
    /// Runs `work` as one unit of work scoped to a client group.
    ///
    /// The group's row lock is taken before `work` starts. Staged writes
    /// commit only if `work` returns `Ok`.
    fn transact(&self, client_group_id: &str, work: &mut Work<'_>) -> ServerResult<()>;

    /// Point lookup of a client without locking.
    fn client(&self, id: &str) -> ServerResult<Option<Client>>;

    /// Point lookup of a client group without locking.
    fn client_group(&self, id: &str) -> ServerResult<Option<ClientGroup>>;

    /// Loads a client view record.
    fn cvr(&self, id: &str) -> ServerResult<Option<ClientViewRecord>>;

    /// Persists a new client view record.
    fn put_cvr(&self, cvr: &ClientViewRecord) -> ServerResult<()>;

    /// Deletes records of `client_id` created before `cutoff_ms`, keeping
    /// the newest `keep_latest`. Returns the number deleted.
    fn prune_cvrs(&self, client_id: &str, cutoff_ms: u64, keep_latest: usize) -> ServerResult<usize>;
}

/// A CVR as stored: CBOR snapshot plus the columns pruning needs.
struct StoredCvr {
    client_id: String,
    created_at_ms: u64,
    snapshot: Vec<u8>,
}

/// In-memory [`SyncStore`].
pub struct MemoryStore {
    groups: RwLock<HashMap<String, ClientGroup>>,
    clients: RwLock<HashMap<String, Client>>,
    cvrs: RwLock<HashMap<String, StoredCvr>>,
    row_locks: Mutex<HashSet<String>>,
    row_released: Condvar,
    lock_timeout: Duration,
}

impl MemoryStore {
    /// Creates an empty store with a 5 second row lock timeout.
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(5))
    }

    /// Creates an empty store with the given row lock timeout.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
            cvrs: RwLock::new(HashMap::new()),
            row_locks: Mutex::new(HashSet::new()),
            row_released: Condvar::new(),
            lock_timeout,
        }
    }

    /// Returns the number of stored client view records.
    pub fn cvr_count(&self) -> usize {
        self.cvrs.read().len()
    }

    fn lock_row(&self, key: &str) -> ServerResult<RowGuard<'_>> {
        let deadline = Instant::now() + self.lock_timeout;
        let mut locked = self.row_locks.lock();
        while locked.contains(key) {
            if self.row_released.wait_until(&mut locked, deadline).timed_out() && locked.contains(key) {
                return Err(ServerError::Storage(format!("timed out waiting for row lock {key}")));
            }
        }
        locked.insert(key.to_string());
        Ok(RowGuard {
            store: self,
            key: key.to_string(),
        })
    }
}

/// Exclusive lock on one row, released on drop.
struct RowGuard<'s> {
    store: &'s MemoryStore,
    key: String,
}

impl Drop for RowGuard<'_> {
    fn drop(&mut self) {
        self.store.row_locks.lock().remove(&self.key);
        self.store.row_released.notify_all();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryUnitOfWork<'s> {
    store: &'s MemoryStore,
    guards: Vec<RowGuard<'s>>,
    locked: HashSet<String>,
    groups: HashMap<String, ClientGroup>,
    clients: HashMap<String, Client>,
}

impl<'s> MemoryUnitOfWork<'s> {
    fn new(store: &'s MemoryStore) -> Self {
        Self {
            store,
            guards: Vec::new(),
            locked: HashSet::new(),
            groups: HashMap::new(),
            clients: HashMap::new(),
        }
    }

    fn lock(&mut self, key: String) -> ServerResult<()> {
        if self.locked.contains(&key) {
            return Ok(());
        }
        let guard = self.store.lock_row(&key)?;
        self.guards.push(guard);
        self.locked.insert(key);
        Ok(())
    }

    fn commit(self) {
        if !self.groups.is_empty() {
            self.store.groups.write().extend(self.groups);
        }
        if !self.clients.is_empty() {
            self.store.clients.write().extend(self.clients);
        }
        // Row locks release when the guards drop, after the writes land.
        drop(self.guards);
    }
}

fn group_lock_key(id: &str) -> String {
    format!("client_group/{id}")
}

fn client_lock_key(id: &str) -> String {
    format!("client/{id}")
}

impl UnitOfWork for MemoryUnitOfWork<'_> {
    fn client_group_for_update(&mut self, id: &str) -> ServerResult<Option<ClientGroup>> {
        self.lock(group_lock_key(id))?;
        if let Some(staged) = self.groups.get(id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.store.groups.read().get(id).cloned())
    }

    fn client_for_update(&mut self, id: &str) -> ServerResult<Option<Client>> {
        self.lock(client_lock_key(id))?;
        if let Some(staged) = self.clients.get(id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.store.clients.read().get(id).cloned())
    }

    fn upsert_client_group(&mut self, group: ClientGroup) -> ServerResult<()> {
        self.lock(group_lock_key(&group.id))?;
        self.groups.insert(group.id.clone(), group);
        Ok(())
    }

    fn upsert_client(&mut self, client: Client) -> ServerResult<()> {
        self.lock(client_lock_key(&client.id))?;
        self.clients.insert(client.id.clone(), client);
        Ok(())
    }
}

impl SyncStore for MemoryStore {
    fn transact(&self, client_group_id: &str, work: &mut Work<'_>) -> ServerResult<()> {
        let mut uow = MemoryUnitOfWork::new(self);
        uow.lock(group_lock_key(client_group_id))?;
        work(&mut uow)?;
        uow.commit();
        Ok(())
    }

    fn client(&self, id: &str) -> ServerResult<Option<Client>> {
        Ok(self.clients.read().get(id).cloned())
    }

    fn client_group(&self, id: &str) -> ServerResult<Option<ClientGroup>> {
        Ok(self.groups.read().get(id).cloned())
    }

    fn cvr(&self, id: &str) -> ServerResult<Option<ClientViewRecord>> {
        let cvrs = self.cvrs.read();
        match cvrs.get(id) {
            Some(stored) => Ok(Some(ClientViewRecord::decode(&stored.snapshot)?)),
            None => Ok(None),
        }
    }

    fn put_cvr(&self, cvr: &ClientViewRecord) -> ServerResult<()> {
        let stored = StoredCvr {
            client_id: cvr.client_id.clone(),
            created_at_ms: cvr.created_at_ms,
            snapshot: cvr.encode()?,
        };
        self.cvrs.write().insert(cvr.id.clone(), stored);
        Ok(())
    }

    fn prune_cvrs(&self, client_id: &str, cutoff_ms: u64, keep_latest: usize) -> ServerResult<usize> {
        let mut cvrs = self.cvrs.write();
        let mut owned: Vec<(u64, String)> = cvrs
            .iter()
            .filter(|(_, stored)| stored.client_id == client_id)
            .map(|(id, stored)| (stored.created_at_ms, id.clone()))
            .collect();
        // Newest first; ties broken by id so pruning is deterministic.
        owned.sort_unstable_by(|a, b| b.cmp(a));

        let mut removed = 0;
        for (created_at_ms, id) in owned.into_iter().skip(keep_latest) {
            if created_at_ms < cutoff_ms {
                cvrs.remove(&id);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use syncline_protocol::{Actor, CvrData, Marker};

    fn cvr(id: &str, client_id: &str, created_at_ms: u64) -> ClientViewRecord {
        let mut data = CvrData::new();
        data.insert("stage/s1".into(), Marker::from("t1"));
        ClientViewRecord {
            id: id.into(),
            client_id: client_id.into(),
            actor: Actor::user("u", "w"),
            data,
            created_at_ms,
        }
    }

    #[test]
    fn committed_writes_are_visible() {
        let store = MemoryStore::new();
        store
            .transact("g1", &mut |tx: &mut dyn UnitOfWork| {
                assert!(tx.client_group_for_update("g1")?.is_none());
                tx.upsert_client_group(ClientGroup::new("g1", Actor::user("u", "w")))?;
                tx.upsert_client(Client::new("c1", "g1"))?;
                // Reads inside the unit of work see staged rows.
                assert!(tx.client_for_update("c1")?.is_some());
                Ok(())
            })
            .unwrap();

        assert!(store.client_group("g1").unwrap().is_some());
        assert_eq!(store.client("c1").unwrap().unwrap().client_group_id, "g1");
    }

    #[test]
    fn failed_work_discards_writes() {
        let store = MemoryStore::new();
        let result = store.transact("g1", &mut |tx: &mut dyn UnitOfWork| {
            tx.upsert_client(Client::new("c1", "g1"))?;
            Err(ServerError::Internal("boom".into()))
        });

        assert!(result.is_err());
        assert!(store.client("c1").unwrap().is_none());
    }

    #[test]
    fn same_group_serializes() {
        let store = Arc::new(MemoryStore::with_lock_timeout(Duration::from_millis(50)));
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .transact("g1", &mut |_tx: &mut dyn UnitOfWork| {
                        locked_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        Ok(())
                    })
                    .unwrap();
            })
        };

        locked_rx.recv().unwrap();
        let blocked = store.transact("g1", &mut |_tx: &mut dyn UnitOfWork| Ok(()));
        assert!(matches!(blocked, Err(ServerError::Storage(_))));

        // A different group is not blocked.
        store
            .transact("g2", &mut |_tx: &mut dyn UnitOfWork| Ok(()))
            .unwrap();

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        store
            .transact("g1", &mut |_tx: &mut dyn UnitOfWork| Ok(()))
            .unwrap();
    }

    #[test]
    fn cvr_roundtrip_through_store() {
        let store = MemoryStore::new();
        let record = cvr("cvr_1", "c1", 10);
        store.put_cvr(&record).unwrap();
        assert_eq!(store.cvr("cvr_1").unwrap(), Some(record));
        assert_eq!(store.cvr("missing").unwrap(), None);
    }

    #[test]
    fn prune_keeps_latest_and_recent() {
        let store = MemoryStore::new();
        for i in 0..5u64 {
            store.put_cvr(&cvr(&format!("cvr_{i}"), "c1", i * 100)).unwrap();
        }
        store.put_cvr(&cvr("other", "c2", 0)).unwrap();

        // Keep the newest two; of the rest only those older than 250 go.
        let removed = store.prune_cvrs("c1", 250, 2).unwrap();
        assert_eq!(removed, 3);
        assert!(store.cvr("cvr_4").unwrap().is_some());
        assert!(store.cvr("cvr_3").unwrap().is_some());
        assert!(store.cvr("cvr_2").unwrap().is_none());
        assert!(store.cvr("other").unwrap().is_some());
        assert_eq!(store.cvr_count(), 3);
    }
}
