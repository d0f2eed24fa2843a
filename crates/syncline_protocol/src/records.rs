//! Persisted sync records.

use crate::actor::Actor;
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque last-modified marker of an entity row.
///
/// The CVR path only compares markers for equality. The account path orders
/// them lexically, so sources must emit fixed-width sortable timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marker(String);

impl Marker {
    /// Creates a marker.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The marker sorting before every real timestamp.
    pub fn epoch() -> Self {
        Self(String::new())
    }

    /// Returns true for [`Marker::epoch`].
    pub fn is_epoch(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the raw marker.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Marker {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Marker {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A logical client install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientGroup {
    /// Group id chosen by the client.
    pub id: String,
    /// Owner; immutable once the row exists.
    pub actor: Actor,
    /// Bumped once per applied mutation.
    pub client_version: u64,
    /// Last CVR baseline.
    pub cvr_version: u64,
}

impl ClientGroup {
    /// Zero-valued group used when no row exists yet.
    pub fn new(id: impl Into<String>, actor: Actor) -> Self {
        Self {
            id: id.into(),
            actor,
            client_version: 0,
            cvr_version: 0,
        }
    }
}

/// One mutation stream inside a client group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Client id.
    pub id: String,
    /// Owning group.
    pub client_group_id: String,
    /// Id of the last applied mutation; 0 before the first.
    pub mutation_id: u64,
    /// Group version at the last update.
    pub client_version: u64,
}

impl Client {
    /// Zero-valued client used when no row exists yet.
    pub fn new(id: impl Into<String>, client_group_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            client_group_id: client_group_id.into(),
            mutation_id: 0,
            client_version: 0,
        }
    }
}

/// `"<table>/<id>"` to last-modified marker.
pub type CvrData = BTreeMap<String, Marker>;

/// What a client has already seen at one sync checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientViewRecord {
    /// Checkpoint id handed out in the cookie.
    pub id: String,
    /// Client the checkpoint was computed for.
    pub client_id: String,
    /// Actor that pulled it.
    pub actor: Actor,
    /// Row markers observed.
    pub data: CvrData,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at_ms: u64,
}

impl ClientViewRecord {
    /// Encodes to a CBOR snapshot.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(ProtocolError::cbor_encode)?;
        Ok(bytes)
    }

    /// Decodes a CBOR snapshot.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(ProtocolError::cbor_decode)
    }
}
