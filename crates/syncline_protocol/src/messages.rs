//! Push and pull messages.
//!
//! Bodies are JSON with camelCase field names.

use crate::error::ProtocolResult;
use crate::records::Marker;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named unit of work queued by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Sequence number within the client's stream.
    pub id: u64,
    /// Client that produced the mutation.
    #[serde(rename = "clientID")]
    pub client_id: String,
    /// Registered mutation name.
    pub name: String,
    /// Raw arguments; validated by the handler.
    #[serde(default)]
    pub args: Value,
}

impl Mutation {
    /// Creates a mutation.
    pub fn new(id: u64, client_id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id,
            client_id: client_id.into(),
            name: name.into(),
            args,
        }
    }
}

/// Body of `POST /push`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Client group pushing the batch.
    #[serde(rename = "clientGroupID")]
    pub client_group_id: String,
    /// Push protocol version.
    pub push_version: u32,
    /// Mutations in application order.
    #[serde(default)]
    pub mutations: Vec<Mutation>,
}

impl PushRequest {
    /// Creates a version 1 push request.
    pub fn new(client_group_id: impl Into<String>, mutations: Vec<Mutation>) -> Self {
        Self {
            client_group_id: client_group_id.into(),
            push_version: 1,
            mutations,
        }
    }

    /// Decodes a JSON body.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encodes to a JSON body.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Client-held sync checkpoint, echoed back on every pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCookie {
    /// Protocol schema generation.
    pub version: u32,
    /// Timestamp cursor of the account pull path.
    pub last_sync: Marker,
    /// Id of the CVR the client has seen; empty before the first checkpoint.
    pub cvr: String,
}

impl SyncCookie {
    /// Cookie of a client that has never synced.
    pub fn initial(version: u32) -> Self {
        Self {
            version,
            last_sync: Marker::epoch(),
            cvr: String::new(),
        }
    }

    /// Parses a raw cookie value, returning `None` when it is malformed.
    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }
}

/// Body of `POST /pull`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Client asking for a patch.
    #[serde(rename = "clientID")]
    pub client_id: String,
    /// Cookie from the previous response, kept raw so malformed cookies
    /// degrade to a full resync instead of a decode error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<Value>,
}

impl PullRequest {
    /// Creates a pull request.
    pub fn new(client_id: impl Into<String>, cookie: Option<&SyncCookie>) -> Self {
        Self {
            client_id: client_id.into(),
            cookie: cookie.and_then(|c| serde_json::to_value(c).ok()),
        }
    }

    /// Returns the parsed cookie, if present and well formed.
    pub fn cookie(&self) -> Option<SyncCookie> {
        self.cookie.as_ref().and_then(SyncCookie::from_value)
    }

    /// Decodes a JSON body.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encodes to a JSON body.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// One step of a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    /// Drop all local state. Only ever the first operation.
    Clear,
    /// Insert or replace the value at `key`.
    Put {
        /// External key.
        key: String,
        /// Full row.
        value: Value,
    },
    /// Remove `key`.
    Del {
        /// External key.
        key: String,
    },
}

impl PatchOperation {
    /// Creates a put.
    pub fn put(key: impl Into<String>, value: Value) -> Self {
        PatchOperation::Put {
            key: key.into(),
            value,
        }
    }

    /// Creates a delete.
    pub fn del(key: impl Into<String>) -> Self {
        PatchOperation::Del { key: key.into() }
    }

    /// Returns the key touched, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            PatchOperation::Clear => None,
            PatchOperation::Put { key, .. } | PatchOperation::Del { key } => Some(key),
        }
    }
}

/// Body of a successful pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Last mutation id the server applied for the pulling client.
    #[serde(rename = "lastMutationID")]
    pub last_mutation_id: u64,
    /// Operations that bring the client to the server's state.
    pub patch: Vec<PatchOperation>,
    /// Checkpoint to send on the next pull.
    pub cookie: SyncCookie,
}

impl PullResponse {
    /// Decodes a JSON body.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encodes to a JSON body.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
