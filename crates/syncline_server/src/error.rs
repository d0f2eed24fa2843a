//! Error types for the sync server.

use syncline_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that abort a push or pull request.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Actor missing, public, or not the owner of the client group.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// Request body or batch is unusable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The client is ahead of what the server has recorded.
    #[error("mutation {received} from client {client_id} is from the future, expected {expected}")]
    MutationFromFuture {
        /// Client that sent the mutation.
        client_id: String,
        /// Next mutation id the server would accept.
        expected: u64,
        /// Mutation id received.
        received: u64,
    },

    /// Row store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Entity query failure.
    #[error("entity source error: {0}")]
    Entity(String),

    /// Snapshot encoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::Unauthorized(_)
                | ServerError::InvalidRequest(_)
                | ServerError::MutationFromFuture { .. }
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// HTTP status the error surfaces as.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::Unauthorized(_) => 401,
            ServerError::InvalidRequest(_) => 400,
            ServerError::MutationFromFuture { .. } => 409,
            ServerError::Storage(_)
            | ServerError::Entity(_)
            | ServerError::Codec(_)
            | ServerError::Internal(_) => 500,
        }
    }
}

/// Failure reported by a mutation handler.
///
/// Handler failures never abort a push; they are logged and the client's
/// sequence still advances.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// Arguments did not match the handler's input type.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// Expected business failure, safe to show to a user.
    #[error("{0}")]
    Visible(String),

    /// Unexpected failure inside the handler.
    #[error("mutation failed: {0}")]
    Internal(String),
}

impl MutationError {
    /// Returns true for user-facing failures.
    pub fn is_visible(&self) -> bool {
        matches!(self, MutationError::Visible(_))
    }
}

/// Failure of [`MutationRegistry::execute`](crate::MutationRegistry::execute).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No handler registered under the name.
    #[error("mutation \"{0}\" not found")]
    NotFound(String),

    /// The handler ran and failed.
    #[error(transparent)]
    Handler(#[from] MutationError),
}

impl DispatchError {
    /// Returns true for user-facing handler failures.
    pub fn is_visible(&self) -> bool {
        matches!(self, DispatchError::Handler(err) if err.is_visible())
    }
}
