//! Entity source contract and an in-memory entity store.
//!
//! The sync engine does not own the business tables. It only needs a
//! `(id, marker)` projection per table scoped to a workspace, a bulk fetch
//! by id, and the membership rows an account can see.

use crate::error::ServerResult;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use syncline_protocol::{Marker, WorkspaceScope};

/// Table holding workspace rows.
pub const WORKSPACE_TABLE: &str = "workspace";
/// Table holding workspace membership rows.
pub const USER_TABLE: &str = "user";

/// Version projection of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowVersion {
    /// Entity id.
    pub id: String,
    /// Last-modified marker.
    pub modified: Marker,
}

/// A row visible to an account.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRow {
    /// Table name.
    pub table: String,
    /// Entity id.
    pub id: String,
    /// Last-modified marker.
    pub modified: Marker,
    /// Full row.
    pub value: Value,
}

/// Read access to the synchronized business tables.
pub trait EntitySource: Send + Sync {
    /// Tables synchronized to workspace-scoped clients, in patch order.
    fn workspace_tables(&self) -> Vec<String>;

    /// `(id, marker)` of every row of `table` visible in `scope`.
    fn row_versions(&self, table: &str, scope: &WorkspaceScope) -> ServerResult<Vec<RowVersion>>;

    /// Full rows of `table` for `ids`, restricted to `scope`.
    fn fetch_rows(
        &self,
        table: &str,
        scope: &WorkspaceScope,
        ids: &[String],
    ) -> ServerResult<Vec<(String, Value)>>;

    /// User and workspace rows reachable from `email` modified after `since`.
    fn account_rows_since(&self, email: &str, since: &Marker) -> ServerResult<Vec<AccountRow>>;
}

/// A stored entity row.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    /// Entity id.
    pub id: String,
    /// Owning workspace; workspace rows own themselves.
    pub workspace_id: String,
    /// Set for rows private to one user.
    pub user_id: Option<String>,
    /// Member email, for user rows.
    pub email: Option<String>,
    /// Last-modified marker.
    pub modified: Marker,
    /// Full row.
    pub value: Value,
}

impl EntityRow {
    fn visible_in(&self, scope: &WorkspaceScope) -> bool {
        if self.workspace_id != scope.workspace_id {
            return false;
        }
        match &self.user_id {
            Some(owner) => scope.user_id.as_deref() == Some(owner.as_str()),
            None => true,
        }
    }
}

/// In-memory [`EntitySource`] whose writes stamp a monotonic marker.
///
/// Markers are zero-padded counters so they sort like timestamps.
pub struct MemoryEntityStore {
    tables: RwLock<BTreeMap<String, BTreeMap<String, EntityRow>>>,
    synced_tables: Vec<String>,
    clock: AtomicU64,
}

impl MemoryEntityStore {
    /// Creates a store synchronizing `tables` to workspace clients.
    pub fn new<S: Into<String>>(tables: impl IntoIterator<Item = S>) -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            synced_tables: tables.into_iter().map(Into::into).collect(),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> Marker {
        let now = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        Marker::new(format!("{now:020}"))
    }

    fn insert(&self, table: &str, mut row: EntityRow) -> Marker {
        let marker = self.tick();
        row.modified = marker.clone();
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(row.id.clone(), row);
        marker
    }

    /// Inserts or replaces a workspace-owned row.
    pub fn put(&self, table: &str, workspace_id: &str, id: &str, value: Value) -> Marker {
        self.insert(
            table,
            EntityRow {
                id: id.into(),
                workspace_id: workspace_id.into(),
                user_id: None,
                email: None,
                modified: Marker::epoch(),
                value,
            },
        )
    }

    /// Inserts or replaces a row private to one user of a workspace.
    pub fn put_private(
        &self,
        table: &str,
        workspace_id: &str,
        user_id: &str,
        id: &str,
        value: Value,
    ) -> Marker {
        self.insert(
            table,
            EntityRow {
                id: id.into(),
                workspace_id: workspace_id.into(),
                user_id: Some(user_id.into()),
                email: None,
                modified: Marker::epoch(),
                value,
            },
        )
    }

    /// Inserts or replaces a workspace row.
    pub fn put_workspace(&self, id: &str, value: Value) -> Marker {
        self.put(WORKSPACE_TABLE, id, id, value)
    }

    /// Inserts or replaces a membership row.
    pub fn put_user(&self, workspace_id: &str, id: &str, email: &str, value: Value) -> Marker {
        self.insert(
            USER_TABLE,
            EntityRow {
                id: id.into(),
                workspace_id: workspace_id.into(),
                user_id: None,
                email: Some(email.into()),
                modified: Marker::epoch(),
                value,
            },
        )
    }

    /// Applies `update` to a row's value and restamps it.
    ///
    /// Returns `None` if the row does not exist.
    pub fn update(&self, table: &str, id: &str, update: impl FnOnce(&mut Value)) -> Option<Marker> {
        let marker = self.tick();
        let mut tables = self.tables.write();
        let row = tables.get_mut(table)?.get_mut(id)?;
        update(&mut row.value);
        row.modified = marker.clone();
        Some(marker)
    }

    /// Removes a row, returning it if it existed.
    pub fn remove(&self, table: &str, id: &str) -> Option<EntityRow> {
        self.tables.write().get_mut(table)?.remove(id)
    }

    /// Returns a row.
    pub fn get(&self, table: &str, id: &str) -> Option<EntityRow> {
        self.tables.read().get(table)?.get(id).cloned()
    }

    /// Full rows of `table` visible in `scope`, in id order.
    pub fn rows(&self, table: &str, scope: &WorkspaceScope) -> Vec<EntityRow> {
        self.tables
            .read()
            .get(table)
            .map(|rows| rows.values().filter(|row| row.visible_in(scope)).cloned().collect())
            .unwrap_or_default()
    }
}

impl EntitySource for MemoryEntityStore {
    fn workspace_tables(&self) -> Vec<String> {
        self.synced_tables.clone()
    }

    fn row_versions(&self, table: &str, scope: &WorkspaceScope) -> ServerResult<Vec<RowVersion>> {
        Ok(self
            .rows(table, scope)
            .into_iter()
            .map(|row| RowVersion {
                id: row.id,
                modified: row.modified,
            })
            .collect())
    }

    fn fetch_rows(
        &self,
        table: &str,
        scope: &WorkspaceScope,
        ids: &[String],
    ) -> ServerResult<Vec<(String, Value)>> {
        let tables = self.tables.read();
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id))
            .filter(|row| row.visible_in(scope))
            .map(|row| (row.id.clone(), row.value.clone()))
            .collect())
    }

    fn account_rows_since(&self, email: &str, since: &Marker) -> ServerResult<Vec<AccountRow>> {
        let tables = self.tables.read();
        let mut found = Vec::new();

        let memberships: Vec<&EntityRow> = tables
            .get(USER_TABLE)
            .map(|rows| {
                rows.values()
                    .filter(|row| row.email.as_deref() == Some(email))
                    .collect()
            })
            .unwrap_or_default();

        for user in &memberships {
            if user.modified > *since {
                found.push(AccountRow {
                    table: USER_TABLE.into(),
                    id: user.id.clone(),
                    modified: user.modified.clone(),
                    value: user.value.clone(),
                });
            }
        }

        if let Some(workspaces) = tables.get(WORKSPACE_TABLE) {
            for user in &memberships {
                let Some(workspace) = workspaces.get(&user.workspace_id) else {
                    continue;
                };
                let already = found
                    .iter()
                    .any(|row| row.table == WORKSPACE_TABLE && row.id == workspace.id);
                if workspace.modified > *since && !already {
                    found.push(AccountRow {
                        table: WORKSPACE_TABLE.into(),
                        id: workspace.id.clone(),
                        modified: workspace.modified.clone(),
                        value: workspace.value.clone(),
                    });
                }
            }
        }

        Ok(found)
    }
}
