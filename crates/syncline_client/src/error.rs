//! Error types for the sync client.

use syncline_protocol::ProtocolError;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur while pushing or pulling.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server refused the caller's credentials.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// The server has fewer mutations recorded than this client sent.
    #[error("client out of sync with server: {0}")]
    Desync(String),

    /// The server does not speak this push version.
    #[error("push version not supported, retry at {location}")]
    Redirect {
        /// Endpoint the server pointed at.
        location: String,
    },

    /// Any other non-success response.
    #[error("server returned {status}: {message}")]
    Server {
        /// HTTP status.
        status: u16,
        /// Error message from the body.
        message: String,
    },

    /// Request or response could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ClientError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { retryable, .. } => *retryable,
            ClientError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
