//! Framework-neutral request and response types.
//!
//! [`Request`] and [`Response`] are what every middleware sees. They are built
//! on the `http` crate's vocabulary types (`Method`, `HeaderMap`, `StatusCode`)
//! but carry no server framework types; a framework adapter converts to and
//! from its native objects at the edge.

use crate::context::ContextStore;
use bytes::Bytes;
use formwork_core::FormworkError;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use std::fmt;
use std::net::SocketAddr;

/// Boxed error type used by streamed bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Streamed HTTP body.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

/// Returns an empty streamed body.
pub fn empty_body() -> Body {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Returns a streamed body over a single buffer.
pub fn full_body(bytes: impl Into<Bytes>) -> Body {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Path parameters captured by the router, in route order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    /// Creates an empty parameter list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parameter.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Looks up a parameter by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when no parameters were captured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// An inbound request as seen by middleware.
///
/// Owned by exactly one in-flight request. The [`ContextStore`] handle is the
/// only part that may be shared, and only with the native request it was
/// converted from.
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    path_params: PathParams,
    body: Option<Body>,
    store: ContextStore,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Creates a request with no headers and an empty body.
    #[must_use]
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            path_params: PathParams::new(),
            body: Some(empty_body()),
            store: ContextStore::new(),
            remote_addr: None,
        }
    }

    /// Adds a header value, keeping existing values for the same name.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replaces the full header map.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Replaces the body.
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Attaches router-captured path parameters.
    #[must_use]
    pub fn with_path_params(mut self, params: PathParams) -> Self {
        self.path_params = params;
        self
    }

    /// Uses an existing store handle instead of a fresh one.
    #[must_use]
    pub fn with_store(mut self, store: ContextStore) -> Self {
        self.store = store;
        self
    }

    /// Records the client address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Full request URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Request path without the query string.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Raw query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// First value of a query parameter. Values are not percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query()?
            .split('&')
            .filter_map(|pair| match pair.split_once('=') {
                Some((key, value)) => Some((key, value)),
                None if !pair.is_empty() => Some((pair, "")),
                None => None,
            })
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    /// All headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// First value of a header, if present and valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Every value of a header, in order of appearance.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    /// Captured path parameter.
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name)
    }

    /// All captured path parameters.
    pub fn path_params(&self) -> &PathParams {
        &self.path_params
    }

    /// Cookies sent by the client, across every `Cookie` header.
    pub fn cookies(&self) -> Vec<(&str, &str)> {
        self.header_values(header::COOKIE.as_str())
            .into_iter()
            .flat_map(|line| line.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some((name, value.trim().trim_matches('"')))
            })
            .collect()
    }

    /// A single cookie value by name.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies()
            .into_iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    /// The per-request key/value store.
    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    /// Client socket address, when known.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Takes the body stream, leaving the request without one.
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    /// Buffers the remaining body.
    ///
    /// Returns an empty buffer if the body was already taken.
    pub async fn bytes(&mut self) -> Result<Bytes, BoxError> {
        match self.body.take() {
            Some(body) => Ok(body.collect().await?.to_bytes()),
            None => Ok(Bytes::new()),
        }
    }

    /// Splits the request into its head and body for conversion back to a
    /// native request.
    pub fn into_parts(self) -> (RequestHead, Body) {
        let head = RequestHead {
            method: self.method,
            uri: self.uri,
            headers: self.headers,
            path_params: self.path_params,
            store: self.store,
            remote_addr: self.remote_addr,
        };
        (head, self.body.unwrap_or_else(empty_body))
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("headers", &self.headers.len())
            .field("path_params", &self.path_params)
            .field("store", &self.store)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

/// Everything in a [`Request`] except its body.
#[derive(Debug)]
pub struct RequestHead {
    /// HTTP method.
    pub method: Method,
    /// Request URI.
    pub uri: Uri,
    /// Headers.
    pub headers: HeaderMap,
    /// Router-captured parameters.
    pub path_params: PathParams,
    /// Shared per-request store.
    pub store: ContextStore,
    /// Client address.
    pub remote_addr: Option<SocketAddr>,
}

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    /// `SameSite=Strict`
    Strict,
    /// `SameSite=Lax`
    Lax,
    /// `SameSite=None`
    None,
}

/// A cookie to set on the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// `Path` attribute.
    pub path: Option<String>,
    /// `Max-Age` in seconds.
    pub max_age: Option<i64>,
    /// `HttpOnly` flag.
    pub http_only: bool,
    /// `Secure` flag.
    pub secure: bool,
    /// `SameSite` attribute.
    pub same_site: Option<SameSite>,
}

impl SetCookie {
    /// A session cookie with no attributes.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            max_age: None,
            http_only: false,
            secure: false,
            same_site: None,
        }
    }

    /// Sets the `Path` attribute.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets `Max-Age`.
    #[must_use]
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Marks the cookie `HttpOnly`.
    #[must_use]
    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    /// Marks the cookie `Secure`.
    #[must_use]
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Sets `SameSite`.
    #[must_use]
    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Renders the `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        match self.same_site {
            Some(SameSite::Strict) => out.push_str("; SameSite=Strict"),
            Some(SameSite::Lax) => out.push_str("; SameSite=Lax"),
            Some(SameSite::None) => out.push_str("; SameSite=None"),
            None => {}
        }
        out
    }
}

/// Response payload. A response carries a stream or a buffer, never both.
#[derive(Default)]
pub enum ResponseBody {
    /// No body.
    #[default]
    Empty,
    /// Fully buffered body.
    Bytes(Bytes),
    /// Streamed body, written as it is polled.
    Stream(Body),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Marks a response as an error for the adapter to raise natively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseError {
    /// Message for the client. `None` means the status's canonical reason.
    pub message: Option<String>,
}

/// A response built by handlers and middleware.
///
/// The status may change freely until the adapter applies the response;
/// the adapter always writes status and headers before any body bytes.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    cookies: Vec<SetCookie>,
    body: ResponseBody,
    error: Option<ResponseError>,
    location: Option<String>,
    request_id: Option<String>,
}

/// Status used when a request is abandoned after cancellation.
const CLIENT_CLOSED_REQUEST: u16 = 499;

impl Response {
    /// An empty response with the given status.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            body: ResponseBody::Empty,
            error: None,
            location: None,
            request_id: None,
        }
    }

    /// An empty `200 OK`.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// A `text/plain` response.
    #[must_use]
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut response = Self::new(status);
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response.body = ResponseBody::Bytes(Bytes::from(body.into()));
        response
    }

    /// An `application/json` response.
    #[must_use]
    pub fn json(status: StatusCode, body: &serde_json::Value) -> Self {
        let mut response = Self::new(status);
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response.body = ResponseBody::Bytes(Bytes::from(body.to_string()));
        response
    }

    /// A redirect to `location` with the given (3xx) status.
    #[must_use]
    pub fn redirect(status: StatusCode, location: impl Into<String>) -> Self {
        let mut response = Self::new(status);
        response.location = Some(location.into());
        response
    }

    /// An error response. The adapter raises it as a native HTTP error.
    #[must_use]
    pub fn error(status: StatusCode, message: Option<String>) -> Self {
        let mut response = Self::new(status);
        response.error = Some(ResponseError { message });
        response
    }

    /// The bare `401 {"error":"unauthorized"}` used for rejected assertions.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::json(
            StatusCode::UNAUTHORIZED,
            &serde_json::json!({ "error": "unauthorized" }),
        )
    }

    /// `499` returned when the request was cancelled before it finished.
    #[must_use]
    pub fn cancelled() -> Self {
        let status =
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::REQUEST_TIMEOUT);
        Self::json(status, &serde_json::json!({ "error": "request cancelled" }))
    }

    /// Status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Replaces the status code.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Adds a header and returns the response.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Cookies to set.
    pub fn cookies(&self) -> &[SetCookie] {
        &self.cookies
    }

    /// Queues a `Set-Cookie`.
    pub fn add_cookie(&mut self, cookie: SetCookie) {
        self.cookies.push(cookie);
    }

    /// Body.
    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// Buffered body bytes, if the body is buffered.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Replaces the body with a buffer.
    pub fn set_body(&mut self, bytes: impl Into<Bytes>) {
        self.body = ResponseBody::Bytes(bytes.into());
    }

    /// Replaces the body with a stream.
    pub fn set_stream(&mut self, body: Body) {
        self.body = ResponseBody::Stream(body);
    }

    /// Takes the body, leaving [`ResponseBody::Empty`].
    pub fn take_body(&mut self) -> ResponseBody {
        std::mem::take(&mut self.body)
    }

    /// Error marker, if any.
    pub fn error_info(&self) -> Option<&ResponseError> {
        self.error.as_ref()
    }

    /// Marks this response as an error.
    pub fn set_error(&mut self, message: Option<String>) {
        self.error = Some(ResponseError { message });
    }

    /// Redirect target, if any.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// `true` when a redirect location is set.
    pub fn is_redirect(&self) -> bool {
        self.location.is_some()
    }

    /// `true` when the response is marked as an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Request id to echo to the client.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Sets the request id.
    pub fn set_request_id(&mut self, request_id: impl Into<String>) {
        self.request_id = Some(request_id.into());
    }
}

impl From<FormworkError> for Response {
    fn from(err: FormworkError) -> Self {
        Self::error(err.status_code(), Some(err.public_message()))
    }
}
