//! Transport layer abstraction for sync operations.

use crate::error::ClientResult;
use syncline_protocol::{PullRequest, PullResponse, PushRequest};

/// Carries push and pull requests to the server.
///
/// Implementations map non-success responses to the matching
/// [`ClientError`](crate::ClientError) variant.
pub trait SyncTransport: Send + Sync {
    /// Pushes mutations. Success carries no payload.
    fn push(&self, request: &PushRequest) -> ClientResult<()>;

    /// Pulls a patch.
    fn pull(&self, request: &PullRequest) -> ClientResult<PullResponse>;
}
