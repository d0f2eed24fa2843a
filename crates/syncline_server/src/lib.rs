//! # Syncline Server
//!
//! Server half of the syncline push/pull protocol.
//!
//! This crate provides:
//! - A named mutation registry with typed and raw handlers
//! - The push handler: exactly-once, in-order mutation application
//! - The pull handler: patches computed from client view record diffs
//! - Row store and entity source contracts with in-memory implementations
//! - A poke bus telling clients of a workspace to pull again
//! - HTTP status mapping for `/push` and `/pull`
//!
//! # Architecture
//!
//! Every push mutation runs in its own unit of work holding exclusive locks
//! on its client group and client rows, so pushes from one group serialize
//! while different groups run in parallel. Pulls take no locks; a patch that
//! races a push is corrected by the next pull because CVR diffing is
//! idempotent.
//!
//! # Protocol
//!
//! 1. The client pushes pending mutations with contiguous ids per client
//! 2. The server applies each id once, skipping replays and rejecting gaps
//! 3. The server pokes the workspace
//! 4. The client pulls with its cookie and applies the returned patch

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod config;
mod context;
mod entities;
mod error;
mod http;
mod poke;
mod pull;
mod push;
mod registry;
mod server;
mod store;

pub use config::ServerConfig;
pub use context::RequestContext;
pub use entities::{
    AccountRow, EntityRow, EntitySource, MemoryEntityStore, RowVersion, USER_TABLE,
    WORKSPACE_TABLE,
};
pub use error::{DispatchError, MutationError, ServerError, ServerResult};
pub use http::{HttpResponse, PULL_PATH, PUSH_PATH};
pub use poke::{Poke, PokeBus, PokeChannel};
pub use pull::PullHandler;
pub use push::{PushHandler, PushOutcome, PushSummary};
pub use registry::{MutationFn, MutationRegistry};
pub use server::SyncServer;
pub use store::{MemoryStore, SyncStore, UnitOfWork, Work};
