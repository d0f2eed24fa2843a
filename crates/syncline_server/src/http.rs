//! HTTP response mapping.
//!
//! Framework-agnostic: the embedding web server passes the path and raw
//! body in and copies status, headers and body out.

use crate::error::ServerError;
use serde::Serialize;
use serde_json::json;

/// Path of the push endpoint.
pub const PUSH_PATH: &str = "/push";
/// Path of the pull endpoint.
pub const PULL_PATH: &str = "/pull";

/// A response ready to be written to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// `200` with a JSON body.
    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::with_body(200, body),
            Err(err) => Self::from_error(&ServerError::Internal(err.to_string())),
        }
    }

    /// `200 {}`.
    pub fn ok() -> Self {
        Self::with_body(200, b"{}".to_vec())
    }

    /// `307` pointing at `location`.
    pub fn redirect(location: &str) -> Self {
        let mut response = Self::with_body(307, Vec::new());
        response.headers.push(("location".into(), location.into()));
        response
    }

    /// `404` for paths nobody serves.
    pub fn not_found(path: &str) -> Self {
        Self::error_body(404, &format!("no route for {path}"))
    }

    /// Maps an error to its status with an `{"error": ...}` body.
    ///
    /// Server errors are logged here and their details withheld.
    pub fn from_error(err: &ServerError) -> Self {
        if err.is_server_error() {
            tracing::error!(error = %err, "request failed");
            return Self::error_body(err.status_code(), "internal server error");
        }
        tracing::debug!(error = %err, status = err.status_code(), "request rejected");
        Self::error_body(err.status_code(), &err.to_string())
    }

    /// Returns a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn with_body(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: vec![("content-type".into(), "application/json".into())],
            body,
        }
    }

    fn error_body(status: u16, message: &str) -> Self {
        let body = json!({ "error": message }).to_string().into_bytes();
        Self::with_body(status, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn body(response: &HttpResponse) -> Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[test]
    fn ok_is_empty_object() {
        let response = HttpResponse::ok();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"{}");
        assert_eq!(response.header("Content-Type"), Some("application/json"));
    }

    #[test]
    fn redirect_carries_location() {
        let response = HttpResponse::redirect("/replicache/push");
        assert_eq!(response.status, 307);
        assert_eq!(response.header("Location"), Some("/replicache/push"));
        assert!(!response.is_success());
    }

    #[test]
    fn client_errors_keep_their_message() {
        let response = HttpResponse::from_error(&ServerError::Unauthorized("public".into()));
        assert_eq!(response.status, 401);
        assert_eq!(body(&response)["error"], "not authorized: public");
    }

    #[test]
    fn server_errors_are_opaque() {
        let response = HttpResponse::from_error(&ServerError::Storage("disk on fire".into()));
        assert_eq!(response.status, 500);
        assert_eq!(body(&response)["error"], "internal server error");
    }
}
