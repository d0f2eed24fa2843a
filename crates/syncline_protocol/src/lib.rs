//! # Syncline Protocol
//!
//! Wire and record types shared by the syncline server and client.
//!
//! This crate provides:
//! - `Actor` for caller identity and its sync scope
//! - Push/pull messages (`PushRequest`, `PullRequest`, `PullResponse`)
//! - `PatchOperation` and `SyncCookie`
//! - Persisted sync records (`ClientGroup`, `Client`, `ClientViewRecord`)
//! - Key helpers for `"/<table>/<id>"` paths
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod actor;
mod error;
mod keys;
mod messages;
mod records;

pub use actor::{AccountActor, Actor, ActorScope, SystemActor, UserActor, WorkspaceScope};
pub use error::{ProtocolError, ProtocolResult};
pub use keys::{cvr_key, entity_key, key_path, INIT_KEY};
pub use messages::{Mutation, PatchOperation, PullRequest, PullResponse, PushRequest, SyncCookie};
pub use records::{Client, ClientGroup, ClientViewRecord, CvrData, Marker};
