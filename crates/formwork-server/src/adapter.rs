//! Binding of the middleware abstraction onto hyper / `http` 1.x.
//!
//! The adapter is the only place where native `http::Request` and
//! `http::Response` values meet the framework-neutral [`Request`] and
//! [`Response`]. Business middleware never sees hyper types.
//!
//! A request's [`ContextStore`] is shared with the native request through its
//! extensions, so values written on either side are visible on the other.

use std::error::Error as StdError;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use formwork_core::FormworkError;
use formwork_middleware::stages::REQUEST_ID_HEADER;
use formwork_middleware::{
    empty_body, full_body, Body, BoxError, BoxFuture, ContextStore, Middleware,
    MiddlewareContext, Next, PathParams, Request, Response, ResponseBody,
};
use http::header::{self, HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::BodyExt;
use hyper::body::Body as HttpBody;

use crate::error::{canonical_text, AdapterError, HttpError};

/// Native request handled by the server.
pub type NativeRequest = http::Request<Body>;

/// Native response written by the server.
pub type NativeResponse = http::Response<Body>;

/// Client address, stored in native request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// A framework-native handler: the "call the next handler" primitive the
/// adapter wraps as a chain's continuation.
pub trait NativeHandler: Send + Sync + 'static {
    /// Handles a native request.
    fn call(&self, request: NativeRequest) -> BoxFuture<'_, Result<NativeResponse, BoxError>>;
}

/// [`NativeHandler`] over an async closure. Build one with [`native_fn`].
pub struct NativeFn<F> {
    func: F,
}

/// Wraps an async closure as a [`NativeHandler`].
///
/// ```
/// use formwork_middleware::full_body;
/// use formwork_server::native_fn;
///
/// let handler = native_fn(|_req| async { Ok(http::Response::new(full_body("pong"))) });
/// # let _ = handler;
/// ```
pub fn native_fn<F, Fut>(func: F) -> NativeFn<F>
where
    F: Fn(NativeRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<NativeResponse, BoxError>> + Send + 'static,
{
    NativeFn { func }
}

impl<F, Fut> NativeHandler for NativeFn<F>
where
    F: Fn(NativeRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<NativeResponse, BoxError>> + Send + 'static,
{
    fn call(&self, request: NativeRequest) -> BoxFuture<'_, Result<NativeResponse, BoxError>> {
        Box::pin((self.func)(request))
    }
}

/// Maps a lowercased error message onto a status code.
///
/// Used only for errors that carry no status of their own. Matching is by
/// substring, first hit wins: `not found`, `unauthorized`, `forbidden`,
/// `bad request`, else `500`.
pub fn classify_error(message: &str) -> StatusCode {
    let message = message.to_lowercase();
    if message.contains("not found") {
        StatusCode::NOT_FOUND
    } else if message.contains("unauthorized") {
        StatusCode::UNAUTHORIZED
    } else if message.contains("forbidden") {
        StatusCode::FORBIDDEN
    } else if message.contains("bad request") {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Error response that never leaks 5xx details.
fn error_response(status: StatusCode, message: String) -> Response {
    if status.is_server_error() {
        Response::error(status, None)
    } else {
        Response::error(status, Some(message))
    }
}

/// How long a cancelled chain may keep running before it is abandoned.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(500);

/// Drives middleware over hyper requests.
#[derive(Debug, Clone, Copy)]
pub struct HyperAdapter {
    request_timeout: Option<Duration>,
    cancel_grace: Duration,
}

impl Default for HyperAdapter {
    fn default() -> Self {
        Self {
            request_timeout: None,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

impl HyperAdapter {
    /// An adapter without a request deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds how long a chain may run after its deadline fired.
    ///
    /// Middleware that are blocked before calling `next` are dropped once
    /// the grace period ends and the client gets a `499`.
    #[must_use]
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// The configured grace period after cancellation.
    pub fn cancel_grace(&self) -> Duration {
        self.cancel_grace
    }

    /// Cancels each request once `timeout` has elapsed.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// The configured deadline.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// Converts a native request.
    ///
    /// A [`ContextStore`] or [`PathParams`] already present in the native
    /// extensions is reused rather than replaced.
    pub fn into_request<B>(native: http::Request<B>, remote_addr: Option<SocketAddr>) -> Request
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (mut parts, body) = native.into_parts();
        let store = parts.extensions.remove::<ContextStore>().unwrap_or_default();
        let params = parts.extensions.remove::<PathParams>().unwrap_or_default();
        let remote_addr =
            remote_addr.or_else(|| parts.extensions.get::<RemoteAddr>().map(|addr| addr.0));

        let request = Request::new(parts.method, parts.uri)
            .with_headers(parts.headers)
            .with_body(body.map_err(Into::<BoxError>::into).boxed_unsync())
            .with_path_params(params)
            .with_store(store);

        match remote_addr {
            Some(addr) => request.with_remote_addr(addr),
            None => request,
        }
    }

    /// Converts a request back into a native one for the next handler.
    ///
    /// The same [`ContextStore`] handle travels in the extensions.
    pub fn into_native_request(request: Request) -> NativeRequest {
        let (head, body) = request.into_parts();
        let mut native = http::Request::new(body);
        *native.method_mut() = head.method;
        *native.uri_mut() = head.uri;
        *native.headers_mut() = head.headers;

        let extensions = native.extensions_mut();
        extensions.insert(head.store);
        extensions.insert(head.path_params);
        if let Some(addr) = head.remote_addr {
            extensions.insert(RemoteAddr(addr));
        }
        native
    }

    /// Captures what a native handler wrote: status, headers (content type
    /// and length included), request id and the body stream.
    pub fn from_native_response(native: NativeResponse) -> Response {
        let (parts, body) = native.into_parts();
        let mut response = Response::new(parts.status);

        let request_id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        *response.headers_mut() = parts.headers;
        if let Some(id) = request_id {
            response.set_request_id(id);
        }
        if !body.is_end_stream() {
            response.set_stream(body);
        }
        response
    }

    /// Converts a native failure into an error response.
    ///
    /// The error and its sources are searched for an [`HttpError`] or a
    /// [`FormworkError`] first; only if neither is found is the status
    /// guessed from the message with [`classify_error`].
    pub fn from_native_error(err: &(dyn StdError + 'static)) -> Response {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(http_err) = e.downcast_ref::<HttpError>() {
                let mut response =
                    error_response(http_err.status(), http_err.message().to_string());
                for (name, value) in http_err.headers() {
                    response.headers_mut().append(name, value.clone());
                }
                return response;
            }
            if let Some(fw_err) = e.downcast_ref::<FormworkError>() {
                return error_response(fw_err.status_code(), fw_err.public_message());
            }
            current = e.source();
        }

        let message = err.to_string();
        error_response(classify_error(&message), message)
    }

    /// Writes a response onto a native one.
    ///
    /// Status, headers, `Set-Cookie` and the request id are written first.
    /// Then a redirect gets its `Location` and no body, an error is raised
    /// as an [`HttpError`], and anything else gets its stream, its buffer,
    /// or nothing, in that order of preference.
    ///
    /// # Errors
    ///
    /// [`AdapterError::Http`] for error responses, [`AdapterError::Conversion`]
    /// when a cookie, location or request id is not a valid header value.
    pub fn apply(mut response: Response) -> Result<NativeResponse, AdapterError> {
        let status = response.status();
        let mut headers = std::mem::take(response.headers_mut());

        for cookie in response.cookies() {
            let value = HeaderValue::from_str(&cookie.to_header_value()).map_err(|e| {
                AdapterError::Conversion(format!("cookie '{}': {e}", cookie.name))
            })?;
            headers.append(header::SET_COOKIE, value);
        }

        if let Some(id) = response.request_id() {
            let value = HeaderValue::from_str(id)
                .map_err(|e| AdapterError::Conversion(format!("request id: {e}")))?;
            headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }

        let body = if let Some(location) = response.location() {
            let value = HeaderValue::from_str(location)
                .map_err(|e| AdapterError::Conversion(format!("location: {e}")))?;
            headers.insert(header::LOCATION, value);
            empty_body()
        } else if let Some(error) = response.error_info() {
            let message = error
                .message
                .clone()
                .unwrap_or_else(|| canonical_text(status));
            return Err(HttpError::new(status, message).with_headers(headers).into());
        } else {
            match response.take_body() {
                ResponseBody::Stream(stream) => stream,
                ResponseBody::Bytes(bytes) => full_body(bytes),
                ResponseBody::Empty => empty_body(),
            }
        };

        let mut native = http::Response::new(body);
        *native.status_mut() = status;
        *native.headers_mut() = headers;
        Ok(native)
    }

    /// Runs `middleware` over a native request, with `next` as the
    /// continuation after the last middleware.
    ///
    /// If a request timeout is configured and elapses, the request's
    /// cancellation fires and the middleware is still awaited so outer
    /// layers can finish, for at most the cancel grace period. A chain that
    /// has not finished by then is dropped and the result is a `499`.
    ///
    /// # Errors
    ///
    /// See [`apply`](Self::apply).
    pub async fn serve<B>(
        &self,
        middleware: &dyn Middleware,
        ctx: &mut MiddlewareContext,
        native: http::Request<B>,
        remote_addr: Option<SocketAddr>,
        next: Arc<dyn NativeHandler>,
    ) -> Result<NativeResponse, AdapterError>
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let request = Self::into_request(native, remote_addr);
        let terminal = Next::terminal(move |request: Request| {
            let call: BoxFuture<'static, Response> = Box::pin(async move {
                match next.call(Self::into_native_request(request)).await {
                    Ok(native) => Self::from_native_response(native),
                    Err(err) => Self::from_native_error(err.as_ref()),
                }
            });
            call
        });

        let cancellation = ctx.cancellation().clone();
        let chain = ctx.chain_name().map(str::to_owned);
        let mut run = middleware.process(ctx, request, terminal);

        let response = match self.request_timeout {
            None => run.await,
            Some(timeout) => {
                tokio::select! {
                    response = &mut run => response,
                    () = tokio::time::sleep(timeout) => {
                        tracing::warn!(
                            chain = chain.as_deref().unwrap_or("-"),
                            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                            "Request deadline elapsed, cancelling"
                        );
                        cancellation.cancel();
                        match tokio::time::timeout(self.cancel_grace, run).await {
                            Ok(response) => response,
                            Err(_) => {
                                tracing::warn!(
                                    chain = chain.as_deref().unwrap_or("-"),
                                    "Chain ignored cancellation, abandoning"
                                );
                                Response::cancelled()
                            }
                        }
                    }
                }
            }
        };

        Self::apply(response).map_err(|err| {
            if let AdapterError::Conversion(detail) = &err {
                tracing::error!(
                    chain = chain.as_deref().unwrap_or("-"),
                    error = %detail,
                    "Failed to apply response"
                );
            }
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formwork_middleware::{Chain, FnMiddleware, SetCookie};
    use http::Method;
    use http_body_util::Full;

    fn native_get(uri: &str) -> http::Request<Full<Bytes>> {
        http::Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn body_string(response: NativeResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_classify_error_order() {
        assert_eq!(classify_error("Form Not Found"), StatusCode::NOT_FOUND);
        assert_eq!(classify_error("unauthorized caller"), StatusCode::UNAUTHORIZED);
        assert_eq!(classify_error("FORBIDDEN"), StatusCode::FORBIDDEN);
        assert_eq!(classify_error("bad request: page"), StatusCode::BAD_REQUEST);
        assert_eq!(classify_error("disk full"), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            classify_error("not found while forbidden"),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_native_error_prefers_http_error() {
        let err: BoxError = Box::new(HttpError::new(StatusCode::CONFLICT, "not found-ish"));
        let response = HyperAdapter::from_native_error(err.as_ref());
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.error_info().and_then(|e| e.message.as_deref()),
            Some("not found-ish")
        );
    }

    #[test]
    fn test_native_error_uses_formwork_status() {
        let err: BoxError = Box::new(FormworkError::forbidden("plan limit reached"));
        let response = HyperAdapter::from_native_error(err.as_ref());
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_native_error_hides_server_details() {
        let err: BoxError = "connection to db at 10.0.0.3 refused".into();
        let response = HyperAdapter::from_native_error(err.as_ref());
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.error_info().unwrap().message.is_none());
    }

    #[test]
    fn test_native_error_heuristic_keeps_client_message() {
        let err: BoxError = "submission not found".into();
        let response = HyperAdapter::from_native_error(err.as_ref());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.error_info().and_then(|e| e.message.as_deref()),
            Some("submission not found")
        );
    }

    #[test]
    fn test_store_survives_round_trip() {
        let store = ContextStore::new();
        store.set("tenant", "acme".to_string());

        let mut native = native_get("/forms/7?draft=1");
        native.extensions_mut().insert(store.clone());

        let request = HyperAdapter::into_request(native, None);
        assert!(request.store().same_store(&store));
        assert_eq!(request.query_param("draft"), Some("1"));

        let back = HyperAdapter::into_native_request(request);
        let carried = back.extensions().get::<ContextStore>().unwrap();
        carried.set("seen", true);
        assert_eq!(store.get::<bool>("seen"), Some(true));
        assert_eq!(back.uri().path(), "/forms/7");
    }

    #[test]
    fn test_remote_addr_round_trip() {
        let addr: SocketAddr = "10.1.2.3:4567".parse().unwrap();
        let request = HyperAdapter::into_request(native_get("/"), Some(addr));
        let native = HyperAdapter::into_native_request(request);
        assert_eq!(native.extensions().get::<RemoteAddr>(), Some(&RemoteAddr(addr)));

        let again = HyperAdapter::into_request(native, None);
        assert_eq!(again.remote_addr(), Some(addr));
    }

    #[tokio::test]
    async fn test_from_native_response_captures_fields() {
        let native = http::Response::builder()
            .status(StatusCode::CREATED)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, "2")
            .header(REQUEST_ID_HEADER, "req-1")
            .body(full_body("{}"))
            .unwrap();

        let response = HyperAdapter::from_native_response(native);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "2");
        assert_eq!(response.request_id(), Some("req-1"));
        assert!(matches!(response.body(), ResponseBody::Stream(_)));
    }

    #[test]
    fn test_from_native_response_empty_body() {
        let native = http::Response::new(empty_body());
        let response = HyperAdapter::from_native_response(native);
        assert!(matches!(response.body(), ResponseBody::Empty));
    }

    #[tokio::test]
    async fn test_apply_writes_body_cookies_and_request_id() {
        let mut response = Response::text(StatusCode::OK, "hello");
        response.add_cookie(SetCookie::new("session", "abc").http_only());
        response.set_request_id("req-9");

        let native = HyperAdapter::apply(response).unwrap();
        assert_eq!(native.status(), StatusCode::OK);
        assert_eq!(native.headers()[REQUEST_ID_HEADER], "req-9");
        assert!(native.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .starts_with("session=abc"));
        assert_eq!(body_string(native).await, "hello");
    }

    #[tokio::test]
    async fn test_apply_redirect_has_no_body() {
        let mut response = Response::redirect(StatusCode::SEE_OTHER, "/login");
        response.set_body("ignored");

        let native = HyperAdapter::apply(response).unwrap();
        assert_eq!(native.status(), StatusCode::SEE_OTHER);
        assert_eq!(native.headers()[header::LOCATION], "/login");
        assert_eq!(body_string(native).await, "");
    }

    #[test]
    fn test_apply_error_raises_http_error() {
        let response = Response::error(StatusCode::NOT_FOUND, None)
            .with_header(
                HeaderName::from_static("x-form"),
                HeaderValue::from_static("42"),
            );

        match HyperAdapter::apply(response) {
            Err(AdapterError::Http(err)) => {
                assert_eq!(err.status(), StatusCode::NOT_FOUND);
                assert_eq!(err.message(), "Not Found");
                assert_eq!(err.headers()["x-form"], "42");
            }
            Err(other) => panic!("expected http error, got {other}"),
            Ok(native) => panic!("expected http error, got {}", native.status()),
        }
    }

    #[test]
    fn test_apply_invalid_cookie_is_conversion_error() {
        let mut response = Response::ok();
        response.add_cookie(SetCookie::new("bad", "line\nbreak"));
        assert!(matches!(
            HyperAdapter::apply(response),
            Err(AdapterError::Conversion(_))
        ));
    }

    #[tokio::test]
    async fn test_serve_shares_store_with_native_handler() {
        let chain = Chain::builder()
            .with(FnMiddleware::new("tag", 0, |ctx, req, next| {
                Box::pin(async move {
                    req.store().set("tag", "from-middleware".to_string());
                    let mut response = next.run(ctx, req).await;
                    response.headers_mut().insert(
                        HeaderName::from_static("x-wrapped"),
                        HeaderValue::from_static("yes"),
                    );
                    response
                })
            }))
            .build();

        let native = native_fn(|req: NativeRequest| async move {
            let tag = req
                .extensions()
                .get::<ContextStore>()
                .and_then(|store| store.get::<String>("tag"))
                .unwrap_or_default();
            Ok(http::Response::new(full_body(tag)))
        });

        let mut ctx = MiddlewareContext::new();
        let response = HyperAdapter::new()
            .serve(&chain, &mut ctx, native_get("/"), None, Arc::new(native))
            .await
            .unwrap();

        assert_eq!(response.headers()["x-wrapped"], "yes");
        assert_eq!(body_string(response).await, "from-middleware");
    }

    #[tokio::test]
    async fn test_serve_classifies_native_errors() {
        let chain = Chain::builder().build();
        let native = native_fn(|_req: NativeRequest| async {
            Err::<NativeResponse, BoxError>("template not found".into())
        });

        let mut ctx = MiddlewareContext::new();
        let result = HyperAdapter::new()
            .serve(&chain, &mut ctx, native_get("/"), None, Arc::new(native))
            .await;

        match result {
            Err(AdapterError::Http(err)) => assert_eq!(err.status(), StatusCode::NOT_FOUND),
            Err(other) => panic!("expected http error, got {other}"),
            Ok(native) => panic!("expected http error, got {}", native.status()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_deadline_cancels_native_handler() {
        let chain = Chain::builder().build();
        let native = native_fn(|_req: NativeRequest| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(http::Response::new(full_body("late")))
        });

        let mut ctx = MiddlewareContext::new();
        let response = HyperAdapter::new()
            .with_request_timeout(Duration::from_millis(100))
            .serve(&chain, &mut ctx, native_get("/"), None, Arc::new(native))
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 499);
        assert!(ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_deadline_bounds_middleware_stalled_before_next() {
        let chain = Chain::builder()
            .with(FnMiddleware::new("stall", 0, |ctx, req, next| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    next.run(ctx, req).await
                })
            }))
            .build();
        let native = native_fn(|_req: NativeRequest| async {
            Ok(http::Response::new(full_body("reached")))
        });

        let adapter = HyperAdapter::new()
            .with_request_timeout(Duration::from_millis(100))
            .with_cancel_grace(Duration::from_millis(200));
        let started = tokio::time::Instant::now();
        let mut ctx = MiddlewareContext::new();
        let response = adapter
            .serve(&chain, &mut ctx, native_get("/"), None, Arc::new(native))
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 499);
        assert!(ctx.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_default_cancel_grace() {
        assert_eq!(HyperAdapter::new().cancel_grace(), DEFAULT_CANCEL_GRACE);
        let adapter = HyperAdapter::new().with_cancel_grace(Duration::from_secs(2));
        assert_eq!(adapter.cancel_grace(), Duration::from_secs(2));
    }
}
