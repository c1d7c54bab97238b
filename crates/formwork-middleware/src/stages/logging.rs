//! Request logging middleware.
//!
//! Wraps the rest of the chain and emits one structured event when the
//! request enters and one when it completes, including rejected and
//! cancelled requests.
//!
//! # Log fields
//!
//! - `request_id` - Unique request identifier
//! - `chain` - Chain serving the request, when known
//! - `http.method` / `http.path` - Request line
//! - `http.status_code` - Final response status
//! - `duration_ms` - Time spent in the rest of the chain

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use http::{Method, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Summary handed to a completion observer.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    /// The request ID.
    pub request_id: String,
    /// Chain name, if the request was routed.
    pub chain: Option<String>,
    /// HTTP method.
    pub method: Method,
    /// Request path.
    pub path: String,
    /// Final status.
    pub status: StatusCode,
    /// Time spent downstream of this middleware.
    pub duration: Duration,
}

type Observer = Arc<dyn Fn(&RequestSummary) + Send + Sync>;

/// Logs request start and completion.
#[derive(Clone, Default)]
pub struct LoggingMiddleware {
    observer: Option<Observer>,
}

impl LoggingMiddleware {
    /// Creates the middleware.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls `observer` after every completed request, after logging.
    #[must_use]
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&RequestSummary) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }
}

impl fmt::Debug for LoggingMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingMiddleware")
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    fn priority(&self) -> i32 {
        -50
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let start = Instant::now();
            let method = request.method().clone();
            let path = request.path().to_string();

            tracing::debug!(
                request_id = %ctx.request_id(),
                chain = ctx.chain_name().unwrap_or("-"),
                http.method = %method,
                http.path = %path,
                "request started"
            );

            let response = next.run(ctx, request).await;

            let duration = start.elapsed();
            let status = response.status();
            let duration_ms = duration.as_secs_f64() * 1000.0;
            if status.is_server_error() {
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    chain = ctx.chain_name().unwrap_or("-"),
                    http.method = %method,
                    http.path = %path,
                    http.status_code = status.as_u16(),
                    duration_ms,
                    "request failed"
                );
            } else {
                tracing::info!(
                    request_id = %ctx.request_id(),
                    chain = ctx.chain_name().unwrap_or("-"),
                    http.method = %method,
                    http.path = %path,
                    http.status_code = status.as_u16(),
                    duration_ms,
                    "request completed"
                );
            }

            if let Some(observer) = &self.observer {
                observer(&RequestSummary {
                    request_id: ctx.request_id().to_string(),
                    chain: ctx.chain_name().map(ToString::to_string),
                    method,
                    path,
                    status,
                    duration,
                });
            }

            response
        })
    }
}
