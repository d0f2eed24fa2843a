//! # Syncline Client
//!
//! Client half of the syncline push/pull protocol.
//!
//! This crate provides:
//! - `SyncClient`: pending mutation queue, push, pull, retry with backoff
//! - `Replica`: the local key-value copy that pull patches are applied to
//! - The incremental view engine: `ScanView` (live list over a prefix),
//!   `GetView` (live value at one key) and memoized `Refined` views
//! - HTTP transport abstraction with an in-process loopback client
//!
//! ## Views
//!
//! Views subscribe to a [`DiffSource`] and apply each diff batch under one
//! write lock. `change` diffs are merged into the held value through
//! [`Reconcile`] rather than replacing it. Scan deletion swaps the last item
//! into the freed slot, so list order is not stable across deletions.
//!
//! ## Key Invariants
//!
//! - Mutation ids are contiguous per client, starting at 1
//! - A mutation leaves the queue only once a pull acknowledges it
//! - Readers never observe a partially applied batch

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod diff;
mod error;
mod get;
mod http;
mod reconcile;
mod refine;
mod replica;
mod scan;
mod source;
mod transport;

pub use client::{ClientStats, PullSummary, SyncClient, SyncSummary};
pub use config::{ClientConfig, RetryConfig};
pub use diff::Diff;
pub use error::{ClientError, ClientResult};
pub use get::GetView;
pub use http::{HttpClient, HttpReply, HttpTransport, LoopbackClient, LoopbackServer};
pub use reconcile::Reconcile;
pub use refine::Refined;
pub use replica::Replica;
pub use scan::ScanView;
pub use source::{DiffCallback, DiffSource, Subscription};
pub use transport::SyncTransport;
