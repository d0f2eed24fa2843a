//! HTTP transport implementation.
//!
//! The HTTP client itself is abstracted behind [`HttpClient`] so any
//! library (or an in-process loopback) can carry the JSON bodies.

use crate::error::{ClientError, ClientResult};
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use serde_json::Value;
use syncline_protocol::{PullRequest, PullResponse, PushRequest};

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// Status code.
    pub status: u16,
    /// `Location` header, if any.
    pub location: Option<String>,
    /// Body bytes.
    pub body: Vec<u8>,
}

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a JSON `POST` and returns the raw response.
    ///
    /// `Err` means the request never produced a response.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpReply, String>;
}

/// HTTP-based sync transport posting JSON to `<base_url>/push` and
/// `<base_url>/pull`.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn post(&self, endpoint: &str, body: Vec<u8>) -> ClientResult<Vec<u8>> {
        let url = format!("{}{}", self.base_url, endpoint);
        let reply = self.client.post(&url, body).map_err(|err| {
            *self.last_error.write() = Some(err.clone());
            ClientError::transport_retryable(err)
        })?;
        *self.last_error.write() = None;

        match reply.status {
            200..=299 => Ok(reply.body),
            307 => Err(ClientError::Redirect {
                location: reply.location.unwrap_or_default(),
            }),
            401 | 403 => Err(ClientError::Unauthorized(error_message(&reply.body))),
            409 => Err(ClientError::Desync(error_message(&reply.body))),
            status => Err(ClientError::Server {
                status,
                message: error_message(&reply.body),
            }),
        }
    }
}

/// Extracts `{"error": ...}` from a body, falling back to the raw text.
fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| value.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn push(&self, request: &PushRequest) -> ClientResult<()> {
        self.post("/push", request.to_json()?)?;
        Ok(())
    }

    fn pull(&self, request: &PullRequest) -> ClientResult<PullResponse> {
        let body = self.post("/pull", request.to_json()?)?;
        Ok(PullResponse::from_json(&body)?)
    }
}

/// Servers that can answer requests in-process.
pub trait LoopbackServer {
    /// Handles a `POST` to `path`.
    fn handle_post(&self, path: &str, body: &[u8]) -> HttpReply;
}

/// An [`HttpClient`] routing requests straight to a [`LoopbackServer`].
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpReply, String> {
        // Everything after the last slash is the endpoint.
        let path = url.rfind('/').map(|i| &url[i..]).unwrap_or(url);
        Ok(self.server.handle_post(path, &body))
    }
}
