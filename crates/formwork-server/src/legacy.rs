//! The flat, native middleware list that chains replace.
//!
//! Legacy layers see hyper types directly and run in the order they were
//! added. They stay available as the fallback when chains are disabled or
//! fail to build.

use std::sync::Arc;
use std::time::Instant;

use formwork_middleware::{BoxError, BoxFuture};

use crate::adapter::{NativeHandler, NativeRequest, NativeResponse};

/// A middleware written against native request and response types.
pub trait LegacyMiddleware: Send + Sync + 'static {
    /// Name for logs and status reporting.
    fn name(&self) -> &str;

    /// Handles the request, calling `next` to continue.
    fn handle<'a>(
        &'a self,
        request: NativeRequest,
        next: LegacyNext<'a>,
    ) -> BoxFuture<'a, Result<NativeResponse, BoxError>>;
}

/// The rest of a legacy stack, ending in the route's handler.
pub struct LegacyNext<'a> {
    rest: &'a [Arc<dyn LegacyMiddleware>],
    handler: &'a dyn NativeHandler,
}

impl<'a> LegacyNext<'a> {
    /// Runs the next layer, or the handler once the layers are exhausted.
    pub async fn run(self, request: NativeRequest) -> Result<NativeResponse, BoxError> {
        match self.rest.split_first() {
            Some((layer, rest)) => {
                let next = LegacyNext {
                    rest,
                    handler: self.handler,
                };
                layer.handle(request, next).await
            }
            None => self.handler.call(request).await,
        }
    }
}

/// Ordered legacy layers.
#[derive(Clone, Default)]
pub struct LegacyStack {
    layers: Vec<Arc<dyn LegacyMiddleware>>,
}

impl LegacyStack {
    /// An empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stack installed when nothing else is configured: access logging only.
    pub fn standard() -> Self {
        Self::new().layer(AccessLogLayer)
    }

    /// Appends a layer.
    #[must_use]
    pub fn layer<M: LegacyMiddleware>(mut self, layer: M) -> Self {
        self.layers.push(Arc::new(layer));
        self
    }

    /// Layer names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// `true` when there are no layers.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Runs `request` through every layer and then `handler`.
    pub async fn run(
        &self,
        request: NativeRequest,
        handler: &dyn NativeHandler,
    ) -> Result<NativeResponse, BoxError> {
        LegacyNext {
            rest: &self.layers,
            handler,
        }
        .run(request)
        .await
    }
}

impl std::fmt::Debug for LegacyStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyStack")
            .field("layers", &self.names())
            .finish()
    }
}

/// Logs one line per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLogLayer;

impl LegacyMiddleware for AccessLogLayer {
    fn name(&self) -> &str {
        "access_log"
    }

    fn handle<'a>(
        &'a self,
        request: NativeRequest,
        next: LegacyNext<'a>,
    ) -> BoxFuture<'a, Result<NativeResponse, BoxError>> {
        Box::pin(async move {
            let method = request.method().clone();
            let path = request.uri().path().to_owned();
            let started = Instant::now();

            let result = next.run(request).await;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            match &result {
                Ok(response) => tracing::info!(
                    http.method = %method,
                    http.path = %path,
                    http.status_code = response.status().as_u16(),
                    duration_ms,
                    "Request completed (legacy)"
                ),
                Err(err) => tracing::warn!(
                    http.method = %method,
                    http.path = %path,
                    error = %err,
                    duration_ms,
                    "Request failed (legacy)"
                ),
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::native_fn;
    use formwork_middleware::{empty_body, full_body};
    use http::{HeaderValue, StatusCode};
    use parking_lot::Mutex;

    struct Mark {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl LegacyMiddleware for Mark {
        fn name(&self) -> &str {
            self.name
        }

        fn handle<'a>(
            &'a self,
            request: NativeRequest,
            next: LegacyNext<'a>,
        ) -> BoxFuture<'a, Result<NativeResponse, BoxError>> {
            Box::pin(async move {
                self.log.lock().push(format!("{}:before", self.name));
                let mut response = next.run(request).await?;
                self.log.lock().push(format!("{}:after", self.name));
                response
                    .headers_mut()
                    .append("x-layer", HeaderValue::from_static(self.name));
                Ok(response)
            })
        }
    }

    #[tokio::test]
    async fn test_layers_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = LegacyStack::new()
            .layer(Mark {
                name: "outer",
                log: Arc::clone(&log),
            })
            .layer(Mark {
                name: "inner",
                log: Arc::clone(&log),
            });
        assert_eq!(stack.names(), vec!["outer", "inner"]);

        let handler_log = Arc::clone(&log);
        let handler = native_fn(move |_req| {
            handler_log.lock().push("handler".to_string());
            async { Ok(http::Response::new(full_body("ok"))) }
        });

        let response = stack
            .run(http::Request::new(empty_body()), &handler)
            .await
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec!["outer:before", "inner:before", "handler", "inner:after", "outer:after"]
        );
        let layers: Vec<_> = response.headers().get_all("x-layer").iter().collect();
        assert_eq!(layers, vec!["inner", "outer"]);
    }

    #[tokio::test]
    async fn test_empty_stack_calls_handler() {
        let handler = native_fn(|_req| async {
            let mut response = http::Response::new(empty_body());
            *response.status_mut() = StatusCode::ACCEPTED;
            Ok(response)
        });
        let response = LegacyStack::new()
            .run(http::Request::new(empty_body()), &handler)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_access_log_passes_errors_through() {
        let handler = native_fn(|_req| async { Err::<NativeResponse, BoxError>("boom".into()) });
        let result = LegacyStack::standard()
            .run(http::Request::new(empty_body()), &handler)
            .await;
        assert_eq!(result.unwrap_err().to_string(), "boom");
    }
}
