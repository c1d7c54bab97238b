//! Server and adapter error types.

use formwork_middleware::{full_body, BoxError};
use http::header::{self, HeaderMap, HeaderValue};
use http::StatusCode;
use std::fmt;
use thiserror::Error;

use crate::adapter::NativeResponse;

/// The native HTTP error raised for error responses.
///
/// Rendered to the client as `{"error":{"code":...,"message":...}}` with
/// the carried headers.
#[derive(Debug, Clone)]
pub struct HttpError {
    status: StatusCode,
    message: String,
    headers: HeaderMap,
}

impl HttpError {
    /// An error with `status` and `message`.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            headers: HeaderMap::new(),
        }
    }

    /// An error whose message is the status's canonical reason.
    pub fn from_status(status: StatusCode) -> Self {
        Self::new(status, canonical_text(status))
    }

    /// `500 Internal Server Error`.
    pub fn internal() -> Self {
        Self::from_status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Replaces the headers sent with the error.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Client-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Headers sent with the error.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Machine-readable code derived from the status, e.g. `NOT_FOUND`.
    pub fn code(&self) -> String {
        match self.status.canonical_reason() {
            Some(reason) => reason
                .chars()
                .filter_map(|c| match c {
                    ' ' | '-' => Some('_'),
                    c if c.is_ascii_alphanumeric() => Some(c.to_ascii_uppercase()),
                    _ => None,
                })
                .collect(),
            None => format!("HTTP_{}", self.status.as_u16()),
        }
    }

    /// Renders the error as a JSON response.
    pub fn into_response(self) -> NativeResponse {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message,
            }
        })
        .to_string();

        let mut response = http::Response::new(full_body(body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status.as_u16(), self.message)
    }
}

impl std::error::Error for HttpError {}

/// Canonical reason phrase for `status`, or its number.
pub fn canonical_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map_or_else(|| status.as_u16().to_string(), str::to_string)
}

/// Failures while converting between native and framework-neutral types.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// A native ↔ neutral conversion failed. Fatal to the request (500).
    #[error("adapter conversion failed: {0}")]
    Conversion(String),

    /// The response was an error and is raised as a native HTTP error.
    #[error(transparent)]
    Http(#[from] HttpError),
}

impl AdapterError {
    /// The native error to send to the client. Conversion details stay server-side.
    pub fn into_http_error(self) -> HttpError {
        match self {
            Self::Conversion(_) => HttpError::internal(),
            Self::Http(err) => err,
        }
    }
}

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind: {0}")]
    Bind(String),

    /// The accept loop failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A connection task failed in a way that is not per-request.
    #[error("connection error: {0}")]
    Connection(#[source] BoxError),
}
