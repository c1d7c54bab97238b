//! Immutable middleware chains.
//!
//! A [`Chain`] is an ordered list of middleware plus a terminal handler,
//! fixed when it is assembled. Processing folds the list into nested
//! [`Next`] continuations from back to front and invokes the first; the
//! chain itself performs no I/O.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Handler, Middleware, Next, NotFoundHandler};
use crate::types::{Request, Response};
use std::fmt;
use std::sync::Arc;

/// A type-erased middleware that can be stored in a chain or registry.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// An ordered, immutable sequence of middleware and a terminal handler.
///
/// Cloning is cheap and shares the same middleware slice.
///
/// # Example
///
/// ```
/// use formwork_middleware::{Chain, FnHandler, MiddlewareContext, Request, Response};
/// use formwork_middleware::stages::LoggingMiddleware;
/// use http::{Method, StatusCode, Uri};
///
/// # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
/// # rt.block_on(async {
/// let chain = Chain::builder()
///     .with(LoggingMiddleware::new())
///     .handler(FnHandler::new(|_req| async { Response::text(StatusCode::OK, "hi") }))
///     .build();
///
/// let mut ctx = MiddlewareContext::new();
/// let response = chain
///     .process(&mut ctx, Request::new(Method::GET, Uri::from_static("/")))
///     .await;
/// assert_eq!(response.status(), StatusCode::OK);
/// # });
/// ```
#[derive(Clone)]
pub struct Chain {
    middleware: Arc<[BoxedMiddleware]>,
    handler: Arc<dyn Handler>,
}

impl Chain {
    /// Creates a chain builder.
    #[must_use]
    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    /// Assembles a chain from middleware in listed order.
    ///
    /// Entries are stably sorted by [`Middleware::priority`], so equal
    /// priorities keep the order given here. The terminal handler answers
    /// `404` until [`with_handler`](Self::with_handler) is used.
    pub fn new(middleware: Vec<BoxedMiddleware>) -> Self {
        Self::with_parts(middleware, Arc::new(NotFoundHandler))
    }

    fn with_parts(mut middleware: Vec<BoxedMiddleware>, handler: Arc<dyn Handler>) -> Self {
        middleware.sort_by_key(|mw| mw.priority());
        Self {
            middleware: middleware.into(),
            handler,
        }
    }

    /// Returns a copy of this chain that terminates in `handler`.
    #[must_use]
    pub fn with_handler(&self, handler: Arc<dyn Handler>) -> Self {
        Self {
            middleware: Arc::clone(&self.middleware),
            handler,
        }
    }

    /// Runs the request through every middleware and the chain's handler.
    pub async fn process(&self, ctx: &mut MiddlewareContext, request: Request) -> Response {
        let next = self.assemble(Next::handler(self.handler.as_ref()));
        next.run(ctx, request).await
    }

    /// Folds the middleware list around `tail`, back to front.
    fn assemble<'a>(&'a self, tail: Next<'a>) -> Next<'a> {
        let mut next = tail;
        for middleware in self.middleware.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next
    }

    /// Middleware names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.middleware.iter().map(|mw| mw.name()).collect()
    }

    /// Number of middleware.
    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    /// `true` for a chain with no middleware.
    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("middleware", &self.names())
            .finish_non_exhaustive()
    }
}

/// A chain used as middleware runs its members and then the caller's
/// continuation instead of its own handler. This is how an adapter runs a
/// chain in front of a framework-native handler.
impl Middleware for Chain {
    fn name(&self) -> &str {
        "chain"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move { self.assemble(next).run(ctx, request).await })
    }
}

/// Builder for [`Chain`].
#[derive(Default)]
pub struct ChainBuilder {
    middleware: Vec<BoxedMiddleware>,
    handler: Option<Arc<dyn Handler>>,
}

impl ChainBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware.
    #[must_use]
    pub fn with<M: Middleware>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Appends an already shared middleware.
    #[must_use]
    pub fn with_shared(mut self, middleware: BoxedMiddleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Sets the terminal handler.
    #[must_use]
    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Builds the chain.
    #[must_use]
    pub fn build(self) -> Chain {
        let handler = self
            .handler
            .unwrap_or_else(|| Arc::new(NotFoundHandler) as Arc<dyn Handler>);
        Chain::with_parts(self.middleware, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::FnHandler;
    use http::{Method, StatusCode, Uri};
    use parking_lot::Mutex;

    struct Recording {
        name: &'static str,
        priority: i32,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut MiddlewareContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                self.log.lock().push(format!("{}:before", self.name));
                let response = next.run(ctx, request).await;
                self.log.lock().push(format!("{}:after", self.name));
                response
            })
        }
    }

    fn recording(
        name: &'static str,
        priority: i32,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Recording {
        Recording {
            name,
            priority,
            log: Arc::clone(log),
        }
    }

    fn request() -> Request {
        Request::new(Method::GET, Uri::from_static("/"))
    }

    #[tokio::test]
    async fn test_chain_runs_in_order_and_unwinds() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::builder()
            .with(recording("first", 0, &log))
            .with(recording("second", 0, &log))
            .handler(FnHandler::new(|_req| async { Response::ok() }))
            .build();

        let mut ctx = MiddlewareContext::new();
        let response = chain.process(&mut ctx, request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *log.lock(),
            vec!["first:before", "second:before", "second:after", "first:after"]
        );
    }

    #[test]
    fn test_priority_sort_is_stable() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::builder()
            .with(recording("c", 10, &log))
            .with(recording("a", 0, &log))
            .with(recording("b", 0, &log))
            .with(recording("first", -5, &log))
            .build();
        assert_eq!(chain.names(), vec!["first", "a", "b", "c"]);
        assert_eq!(chain.len(), 4);
    }

    #[tokio::test]
    async fn test_default_handler_is_not_found() {
        let chain = Chain::new(Vec::new());
        assert!(chain.is_empty());
        let mut ctx = MiddlewareContext::new();
        let response = chain.process(&mut ctx, request()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_with_handler_shares_middleware() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let base = Chain::new(vec![Arc::new(recording("only", 0, &log))]);
        let routed = base.with_handler(Arc::new(FnHandler::new(|_req| async {
            Response::new(StatusCode::CREATED)
        })));

        let mut ctx = MiddlewareContext::new();
        assert_eq!(
            routed.process(&mut ctx, request()).await.status(),
            StatusCode::CREATED
        );
        assert_eq!(base.names(), routed.names());
    }

    #[tokio::test]
    async fn test_chain_as_middleware_uses_outer_next() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new(vec![Arc::new(recording("inner", 0, &log))]);
        let native = FnHandler::new(|_req| async { Response::new(StatusCode::ACCEPTED) });

        let mut ctx = MiddlewareContext::new();
        let response =
            Middleware::process(&chain, &mut ctx, request(), Next::handler(&native)).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(*log.lock(), vec!["inner:before", "inner:after"]);
    }
}
