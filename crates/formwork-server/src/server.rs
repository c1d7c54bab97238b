//! The hyper server.
//!
//! Every accepted socket gets its own task and an HTTP/1 connection. Each
//! request is matched against the [`Router`], then run through whichever
//! [`RequestPipeline`] was installed: a named chain driven by the
//! [`HyperAdapter`], or the legacy stack.
//!
//! ```rust,no_run
//! use formwork_middleware::full_body;
//! use formwork_server::{native_fn, LegacyStack, Server};
//! use http::Method;
//!
//! # async fn run() -> Result<(), formwork_server::ServerError> {
//! let mut builder = Server::builder().http_addr("127.0.0.1:8080").route(
//!     Method::GET,
//!     "/ping",
//!     "public",
//!     native_fn(|_req| async { Ok(http::Response::new(full_body("pong"))) }),
//! );
//! builder.install_legacy(LegacyStack::standard());
//! builder.build().run().await
//! # }
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use formwork_middleware::{full_body, BoxError, MiddlewareContext, Response};
use formwork_telemetry::{record_request, InFlightGuard};
use http::header::{self, HeaderValue};
use http::{Method, StatusCode};
use http_body_util::BodyExt;
use hyper::body::{Body as HttpBody, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};

use crate::adapter::{HyperAdapter, NativeHandler, NativeRequest, NativeResponse, RemoteAddr};
use crate::config::{ServerConfig, ServerConfigBuilder};
use crate::error::{HttpError, ServerError};
use crate::legacy::LegacyStack;
use crate::router::Router;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};
use crate::wiring::{MigrationStatus, RequestPipeline};

/// Built-in liveness endpoint.
pub const HEALTH_PATH: &str = "/health";

const UNROUTED: &str = "none";

/// A configured server, ready to run.
pub struct Server {
    config: ServerConfig,
    router: Router,
    pipeline: RequestPipeline,
    status: MigrationStatus,
    adapter: HyperAdapter,
}

impl Server {
    /// Starts building a server.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Configuration in use.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Route table.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The installed pipeline.
    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    /// Which middleware system is serving, and what it holds.
    pub fn migration_status(&self) -> &MigrationStatus {
        &self.status
    }

    /// Binds the configured address and serves until SIGTERM or SIGINT.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(ShutdownSignal::with_os_signals())
            .await
    }

    /// Binds the configured address and serves until `shutdown` fires.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let addr = self.config.socket_addr().map_err(|e| {
            ServerError::Bind(format!("invalid address '{}': {e}", self.config.http_addr()))
        })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{addr}: {e}")))?;
        self.serve_listener(listener, shutdown).await
    }

    /// Serves connections from an already bound listener until `shutdown`
    /// fires, then waits up to the shutdown timeout for them to drain.
    pub async fn serve_listener(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        tracing::info!(
            addr = %local_addr,
            pipeline = ?self.status.active,
            routes = self.router.len(),
            "server listening"
        );

        let tracker = ConnectionTracker::with_limit(self.config.max_connections());
        let shutdown_timeout = self.config.shutdown_timeout();
        let server = Arc::new(self);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let Some(token) = tracker.try_acquire() else {
                            tracing::warn!(
                                remote_addr = %remote_addr,
                                active = tracker.active_connections(),
                                "connection limit reached, refusing connection"
                            );
                            continue;
                        };
                        let server = Arc::clone(&server);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(err) = server.serve_connection(stream, remote_addr, shutdown).await {
                                tracing::debug!(remote_addr = %remote_addr, error = %err, "connection closed with error");
                            }
                            drop(token);
                        });
                    }
                    Err(err) => tracing::error!(error = %err, "failed to accept connection"),
                },
                () = shutdown.recv() => {
                    tracing::info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        tracing::info!(
            active = tracker.active_connections(),
            timeout_secs = shutdown_timeout.as_secs(),
            "draining connections"
        );
        tokio::select! {
            () = tracker.wait_for_shutdown() => tracing::info!("all connections closed"),
            () = tokio::time::sleep(shutdown_timeout) => tracing::warn!(
                active = tracker.active_connections(),
                "shutdown timeout reached with connections still open"
            ),
        }
        Ok(())
    }

    async fn serve_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        shutdown: ShutdownSignal,
    ) -> Result<(), hyper::Error> {
        let server = Arc::clone(&self);
        let service = service_fn(move |request: http::Request<Incoming>| {
            let server = Arc::clone(&server);
            async move { Ok::<_, Infallible>(server.dispatch(request, Some(remote_addr)).await) }
        });

        let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => result,
            () = shutdown.recv() => {
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        }
    }

    /// Handles one request end to end and renders the native response.
    ///
    /// `GET /health` is answered directly. Unknown routes get a `404` JSON
    /// error; a route whose chain was never built gets a `500`.
    pub async fn dispatch<B>(
        &self,
        mut request: http::Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> NativeResponse
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let _in_flight = InFlightGuard::new();
        let started = Instant::now();
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        if method == Method::GET && path == HEALTH_PATH {
            return self.health();
        }

        let Some(found) = self.router.match_route(&method, &path) else {
            tracing::debug!(http.method = %method, http.path = %path, "no route");
            record_request(UNROUTED, StatusCode::NOT_FOUND.as_u16(), started.elapsed());
            return HttpError::new(StatusCode::NOT_FOUND, format!("no route for {method} {path}"))
                .into_response();
        };
        let chain_name = found.chain();
        let handler = found.handler();
        request.extensions_mut().insert(found.into_params());

        let response = match &self.pipeline {
            RequestPipeline::Chains(orchestrator) => match orchestrator.get_chain(chain_name) {
                Some(chain) => {
                    let mut ctx = MiddlewareContext::new();
                    ctx.set_chain_name(chain_name);
                    self.adapter
                        .serve(chain, &mut ctx, request, remote_addr, Arc::clone(handler))
                        .await
                        .unwrap_or_else(|err| err.into_http_error().into_response())
                }
                None => {
                    tracing::error!(
                        chain = chain_name,
                        http.path = %path,
                        "route refers to a chain that was not built"
                    );
                    HttpError::internal().into_response()
                }
            },
            RequestPipeline::Legacy(stack) => {
                let native = into_native(request, remote_addr);
                self.run_legacy(stack, native, handler.as_ref()).await
            }
        };

        record_request(chain_name, response.status().as_u16(), started.elapsed());
        response
    }

    async fn run_legacy(
        &self,
        stack: &LegacyStack,
        request: NativeRequest,
        handler: &dyn NativeHandler,
    ) -> NativeResponse {
        let run = stack.run(request, handler);
        let result = match self.adapter.request_timeout() {
            None => run.await,
            Some(timeout) => match tokio::time::timeout(timeout, run).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = duration_ms(timeout),
                        "request deadline elapsed in legacy stack"
                    );
                    return render(Response::cancelled());
                }
            },
        };

        match result {
            Ok(response) => response,
            Err(err) => render(HyperAdapter::from_native_error(err.as_ref())),
        }
    }

    fn health(&self) -> NativeResponse {
        let body = serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "pipeline": &self.status,
        });
        let mut response = http::Response::new(full_body(body.to_string()));
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}

fn into_native<B>(request: http::Request<B>, remote_addr: Option<SocketAddr>) -> NativeRequest
where
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let mut native = request.map(|body| body.map_err(Into::<BoxError>::into).boxed_unsync());
    if let Some(addr) = remote_addr {
        native.extensions_mut().insert(RemoteAddr(addr));
    }
    native
}

fn render(response: Response) -> NativeResponse {
    HyperAdapter::apply(response).unwrap_or_else(|err| err.into_http_error().into_response())
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Builder for [`Server`].
#[derive(Default)]
pub struct ServerBuilder {
    config: ServerConfigBuilder,
    router: Router,
    pipeline: Option<(RequestPipeline, MigrationStatus)>,
}

impl ServerBuilder {
    /// A builder with default configuration and no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bind address.
    #[must_use]
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.config = self.config.http_addr(addr);
        self
    }

    /// Sets the graceful shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.shutdown_timeout(timeout);
        self
    }

    /// Sets or clears the per-request deadline.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config = self.config.request_timeout(timeout);
        self
    }

    /// Sets or clears the connection cap.
    #[must_use]
    pub fn max_connections(mut self, max: Option<usize>) -> Self {
        self.config = self.config.max_connections(max);
        self
    }

    /// Adds a route served by the named chain.
    #[must_use]
    pub fn route<H: NativeHandler>(
        mut self,
        method: Method,
        pattern: &str,
        chain: impl Into<String>,
        handler: H,
    ) -> Self {
        self.router.route(method, pattern, chain, handler);
        self
    }

    /// The route table being built.
    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Installs the pipeline requests run through, replacing any earlier one.
    pub fn install_pipeline(&mut self, pipeline: RequestPipeline, status: MigrationStatus) {
        self.pipeline = Some((pipeline, status));
    }

    /// Installs a legacy stack directly.
    pub fn install_legacy(&mut self, stack: LegacyStack) {
        let status = MigrationStatus::legacy(&stack);
        self.install_pipeline(RequestPipeline::Legacy(Arc::new(stack)), status);
    }

    /// Status of the installed pipeline, if any.
    pub fn migration_status(&self) -> Option<&MigrationStatus> {
        self.pipeline.as_ref().map(|(_, status)| status)
    }

    /// Finishes the server. Without an installed pipeline the standard
    /// legacy stack is used.
    #[must_use]
    pub fn build(self) -> Server {
        let config = self.config.build();
        let (pipeline, status) = self.pipeline.unwrap_or_else(|| {
            let stack = LegacyStack::standard();
            let status = MigrationStatus::legacy(&stack);
            (RequestPipeline::Legacy(Arc::new(stack)), status)
        });

        if let RequestPipeline::Chains(orchestrator) = &pipeline {
            for chain in self.router.chains() {
                if orchestrator.get_chain(chain).is_none() {
                    tracing::warn!(chain, "routes refer to a chain that was not built");
                }
            }
        }

        let adapter = match config.request_timeout() {
            Some(timeout) => HyperAdapter::new().with_request_timeout(timeout),
            None => HyperAdapter::new(),
        };

        Server {
            config,
            router: self.router,
            pipeline,
            status,
            adapter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::native_fn;
    use crate::legacy::{LegacyMiddleware, LegacyNext};
    use formwork_middleware::stages::RequestIdMiddleware;
    use formwork_middleware::{BoxFuture, Orchestrator, PathParams, Registry};
    use http_body_util::Full;

    fn get(uri: &str) -> http::Request<Full<Bytes>> {
        http::Request::builder()
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn json(response: NativeResponse) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn echo_param() -> impl NativeHandler {
        native_fn(|req: NativeRequest| async move {
            let id = req
                .extensions()
                .get::<PathParams>()
                .and_then(|p| p.get("id"))
                .unwrap_or("?")
                .to_string();
            Ok(http::Response::new(full_body(id)))
        })
    }

    fn chains_server() -> Server {
        let mut registry = Registry::new();
        registry
            .register_default(RequestIdMiddleware::new())
            .unwrap();
        let mut orchestrator = Orchestrator::without_defaults(Arc::new(registry));
        orchestrator.define("public", ["request_id"]);
        let chain = orchestrator.create_chain("public").unwrap();
        orchestrator.register_chain("public", chain).unwrap();

        let mut builder = Server::builder()
            .route(Method::GET, "/items/:id", "public", echo_param())
            .route(Method::GET, "/orphan", "missing", echo_param());
        let status = MigrationStatus::legacy(&LegacyStack::new());
        builder.install_pipeline(RequestPipeline::Chains(Arc::new(orchestrator)), status);
        builder.build()
    }

    #[tokio::test]
    async fn test_health_reports_pipeline() {
        let server = Server::builder().build();
        let response = server.dispatch(get("/health"), None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["pipeline"]["active"], "legacy");
        assert_eq!(body["pipeline"]["legacy_middleware"][0], "access_log");
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let response = chains_server().dispatch(get("/nowhere"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json(response).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_chain_route_sees_path_params() {
        let response = chains_server().dispatch(get("/items/42"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes.as_ref(), b"42");
    }

    #[tokio::test]
    async fn test_unbuilt_chain_is_500() {
        let response = chains_server().dispatch(get("/orphan"), None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    struct Deny;

    impl LegacyMiddleware for Deny {
        fn name(&self) -> &str {
            "deny"
        }

        fn handle<'a>(
            &'a self,
            _request: NativeRequest,
            _next: LegacyNext<'a>,
        ) -> BoxFuture<'a, Result<NativeResponse, BoxError>> {
            Box::pin(async { Err(BoxError::from("forbidden: legacy rule")) })
        }
    }

    #[tokio::test]
    async fn test_legacy_errors_are_classified() {
        let mut builder =
            Server::builder().route(Method::GET, "/items/:id", "public", echo_param());
        builder.install_legacy(LegacyStack::new().layer(Deny));
        let response = builder.build().dispatch(get("/items/1"), None).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json(response).await;
        assert_eq!(body["error"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_legacy_route_sees_path_params() {
        let server = Server::builder()
            .route(Method::GET, "/items/:id", "public", echo_param())
            .build();
        let response = server.dispatch(get("/items/7"), None).await;
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes.as_ref(), b"7");
    }

    #[tokio::test(start_paused = true)]
    async fn test_legacy_deadline_is_499() {
        let slow = native_fn(|_req| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(http::Response::new(full_body("late")))
        });
        let server = Server::builder()
            .request_timeout(Some(Duration::from_millis(50)))
            .route(Method::GET, "/slow", "public", slow)
            .build();

        let response = server.dispatch(get("/slow"), None).await;
        assert_eq!(response.status().as_u16(), 499);
    }
}
