//! Caller identity.
//!
//! An [`Actor`] is supplied per request by the surrounding transport and is
//! read-only to the sync engine. It is compared by value when a push targets
//! an existing client group, and it decides which pull strategy applies.

use serde::{Deserialize, Serialize};

/// The identity driving a push or pull.
///
/// Serialized as `{"type": "...", "properties": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "properties", rename_all = "lowercase")]
pub enum Actor {
    /// Unauthenticated caller.
    Public,
    /// A signed-in account that may belong to several workspaces.
    Account(AccountActor),
    /// A member acting inside one workspace.
    User(UserActor),
    /// Internal automation acting inside one workspace.
    System(SystemActor),
}

/// Properties of an [`Actor::Account`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountActor {
    /// Account identifier.
    #[serde(rename = "accountID")]
    pub account_id: String,
    /// Login email; membership rows are looked up by it.
    pub email: String,
}

/// Properties of an [`Actor::User`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserActor {
    /// User identifier within the workspace.
    #[serde(rename = "userID")]
    pub user_id: String,
    /// Workspace the user acts in.
    #[serde(rename = "workspaceID")]
    pub workspace_id: String,
}

/// Properties of an [`Actor::System`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemActor {
    /// Workspace the automation acts in.
    #[serde(rename = "workspaceID")]
    pub workspace_id: String,
}

/// Workspace visibility used by the CVR pull path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceScope {
    /// Workspace whose rows are visible.
    pub workspace_id: String,
    /// Caller's user id, for tables that are private per user.
    pub user_id: Option<String>,
}

/// What an actor is allowed to sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorScope {
    /// Nothing; the caller must authenticate.
    Anonymous,
    /// Every entity of one workspace.
    Workspace(WorkspaceScope),
    /// Membership rows reachable from an account email.
    Account {
        /// Account email.
        email: String,
    },
}

impl Actor {
    /// Creates a workspace user actor.
    pub fn user(user_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Actor::User(UserActor {
            user_id: user_id.into(),
            workspace_id: workspace_id.into(),
        })
    }

    /// Creates an account actor.
    pub fn account(account_id: impl Into<String>, email: impl Into<String>) -> Self {
        Actor::Account(AccountActor {
            account_id: account_id.into(),
            email: email.into(),
        })
    }

    /// Creates a system actor.
    pub fn system(workspace_id: impl Into<String>) -> Self {
        Actor::System(SystemActor {
            workspace_id: workspace_id.into(),
        })
    }

    /// Returns the variant name as used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Actor::Public => "public",
            Actor::Account(_) => "account",
            Actor::User(_) => "user",
            Actor::System(_) => "system",
        }
    }

    /// Returns true for unauthenticated callers.
    pub fn is_public(&self) -> bool {
        matches!(self, Actor::Public)
    }

    /// Returns the workspace this actor is bound to, if any.
    pub fn workspace_id(&self) -> Option<&str> {
        match self {
            Actor::User(user) => Some(&user.workspace_id),
            Actor::System(system) => Some(&system.workspace_id),
            Actor::Public | Actor::Account(_) => None,
        }
    }

    /// Resolves the sync scope of this actor.
    pub fn scope(&self) -> ActorScope {
        match self {
            Actor::Public => ActorScope::Anonymous,
            Actor::Account(account) => ActorScope::Account {
                email: account.email.clone(),
            },
            Actor::User(user) => ActorScope::Workspace(WorkspaceScope {
                workspace_id: user.workspace_id.clone(),
                user_id: Some(user.user_id.clone()),
            }),
            Actor::System(system) => ActorScope::Workspace(WorkspaceScope {
                workspace_id: system.workspace_id.clone(),
                user_id: None,
            }),
        }
    }

    /// Returns the poke scope for pushes by this actor.
    ///
    /// Workspace members get their workspace poked; account and public
    /// pushes notify nobody.
    pub fn poke_scope(&self) -> Option<&str> {
        match self {
            Actor::User(user) => Some(&user.workspace_id),
            Actor::System(system) => Some(&system.workspace_id),
            Actor::Public | Actor::Account(_) => None,
        }
    }
}
