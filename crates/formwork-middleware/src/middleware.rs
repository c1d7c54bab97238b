//! Core middleware and handler traits.
//!
//! A [`Middleware`] receives the context, the request and a [`Next`]
//! continuation standing for the rest of the chain. It may call `next` zero
//! times (short-circuit), once (pass through), or wrap the call with pre- and
//! post-processing.
//!
//! # Example
//!
//! ```
//! use formwork_middleware::{BoxFuture, Middleware, MiddlewareContext, Next, Request, Response};
//!
//! struct Timing;
//!
//! impl Middleware for Timing {
//!     fn name(&self) -> &str {
//!         "timing"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut MiddlewareContext,
//!         request: Request,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, Response> {
//!         Box::pin(async move {
//!             let response = next.run(ctx, request).await;
//!             tracing::debug!(elapsed = ?ctx.elapsed(), "timed");
//!             response
//!         })
//!     }
//! }
//! ```

use crate::context::MiddlewareContext;
use crate::types::{Request, Response};
use std::future::Future;
use std::pin::Pin;

/// A boxed future that returns a response.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A request-processing stage.
///
/// Implementations are stateless across requests. Configuration (secrets,
/// windows) is injected at construction and never mutated afterwards.
pub trait Middleware: Send + Sync + 'static {
    /// Unique name, used as the registry key and in logs.
    fn name(&self) -> &str;

    /// Ordering weight. Lower runs earlier; ties keep listed order.
    fn priority(&self) -> i32 {
        0
    }

    /// Processes the request.
    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response>;
}

/// A terminal business handler.
pub trait Handler: Send + Sync + 'static {
    /// Produces the response for a request that passed every middleware.
    fn call<'a>(&'a self, ctx: &'a mut MiddlewareContext, request: Request)
        -> BoxFuture<'a, Response>;
}

/// Adapts an async function of the request into a [`Handler`].
///
/// ```
/// use formwork_middleware::{FnHandler, Response};
///
/// let handler = FnHandler::new(|_req: formwork_middleware::Request| async { Response::ok() });
/// # let _ = handler;
/// ```
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F> {
    /// Wraps `func`.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call<'a>(
        &'a self,
        _ctx: &'a mut MiddlewareContext,
        request: Request,
    ) -> BoxFuture<'a, Response> {
        Box::pin((self.func)(request))
    }
}

/// Terminal handler used by chains that were never given one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFoundHandler;

impl Handler for NotFoundHandler {
    fn call<'a>(
        &'a self,
        _ctx: &'a mut MiddlewareContext,
        _request: Request,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async { Response::error(http::StatusCode::NOT_FOUND, None) })
    }
}

/// Continuation for the rest of a chain.
///
/// Consumed by [`run`](Self::run), so it can be invoked at most once.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    /// More middleware to process.
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    /// End of chain: a business handler.
    Handler(&'a dyn Handler),
    /// End of chain: a one-shot continuation supplied by an adapter.
    Terminal(Box<dyn FnOnce(Request) -> BoxFuture<'static, Response> + Send + 'a>),
}

impl<'a> Next<'a> {
    /// A continuation that runs `middleware`, then `next`.
    pub fn new(middleware: &'a dyn Middleware, next: Next<'a>) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                next: Box::new(next),
            },
        }
    }

    /// A continuation that ends in `handler`.
    pub fn handler(handler: &'a dyn Handler) -> Self {
        Self {
            inner: NextInner::Handler(handler),
        }
    }

    /// A continuation that ends in a one-shot closure, typically the native
    /// framework's "call the next handler" primitive.
    ///
    /// The returned future must own everything it uses.
    pub fn terminal<F>(f: F) -> Self
    where
        F: FnOnce(Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        Self {
            inner: NextInner::Terminal(Box::new(f)),
        }
    }

    /// Invokes the rest of the chain.
    ///
    /// If the request is already cancelled nothing further is dispatched and a
    /// `499` is returned. The terminal handler is raced against the signal and
    /// dropped when it fires; outer middleware still see the `499` and finish
    /// their post-processing.
    pub async fn run(self, ctx: &mut MiddlewareContext, request: Request) -> Response {
        if ctx.is_cancelled() {
            return Response::cancelled();
        }

        match self.inner {
            NextInner::Chain { middleware, next } => middleware.process(ctx, request, *next).await,
            NextInner::Handler(handler) => {
                let cancellation = ctx.cancellation().clone();
                tokio::select! {
                    biased;
                    () = cancellation.cancelled() => Response::cancelled(),
                    response = handler.call(ctx, request) => response,
                }
            }
            NextInner::Terminal(terminal) => {
                let cancellation = ctx.cancellation().clone();
                tokio::select! {
                    biased;
                    () = cancellation.cancelled() => Response::cancelled(),
                    response = terminal(request) => response,
                }
            }
        }
    }
}

/// A middleware defined by a closure.
///
/// ```
/// use formwork_middleware::{FnMiddleware, Middleware};
///
/// let mw = FnMiddleware::new("passthrough", 0, |ctx, req, next| {
///     Box::pin(async move { next.run(ctx, req).await })
/// });
/// assert_eq!(mw.name(), "passthrough");
/// ```
pub struct FnMiddleware<F> {
    name: String,
    priority: i32,
    func: F,
}

impl<F> FnMiddleware<F> {
    /// Creates a closure-backed middleware.
    pub fn new(name: impl Into<String>, priority: i32, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut MiddlewareContext, Request, Next<'a>) -> BoxFuture<'a, Response>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            priority,
            func,
        }
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut MiddlewareContext, Request, Next<'a>) -> BoxFuture<'a, Response>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &str {
        &self.name
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
        (self.func)(ctx, request, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode, Uri};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn request() -> Request {
        Request::new(Method::GET, Uri::from_static("/test"))
    }

    struct Tagging {
        tag: &'static str,
    }

    impl Middleware for Tagging {
        fn name(&self) -> &str {
            self.tag
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut MiddlewareContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                let mut response = next.run(ctx, request).await;
                let seen = response
                    .headers()
                    .get("x-trail")
                    .and_then(|v| v.to_str().ok())
                    .map(|v| format!("{v},{}", self.tag))
                    .unwrap_or_else(|| self.tag.to_string());
                response
                    .headers_mut()
                    .insert("x-trail", seen.parse().unwrap());
                response
            })
        }
    }

    #[tokio::test]
    async fn test_handler_terminal() {
        let handler = FnHandler::new(|_req| async { Response::text(StatusCode::OK, "OK") });
        let mut ctx = MiddlewareContext::new();
        let response = Next::handler(&handler).run(&mut ctx, request()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_nested_post_processing_unwinds_inner_first() {
        let outer = Tagging { tag: "outer" };
        let inner = Tagging { tag: "inner" };
        let handler = FnHandler::new(|_req| async { Response::ok() });

        let mut ctx = MiddlewareContext::new();
        let next = Next::new(&outer, Next::new(&inner, Next::handler(&handler)));
        let response = next.run(&mut ctx, request()).await;
        assert_eq!(response.headers()["x-trail"], "inner,outer");
    }

    #[tokio::test]
    async fn test_terminal_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let next = Next::terminal(move |_req| {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Response::new(StatusCode::ACCEPTED)
            })
        });

        let mut ctx = MiddlewareContext::new();
        let response = next.run(&mut ctx, request()).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_middleware_wraps_terminal_closure() {
        let outer = Tagging { tag: "outer" };
        let inner = Tagging { tag: "inner" };
        let next = Next::new(
            &outer,
            Next::new(
                &inner,
                Next::terminal(|_req| Box::pin(async { Response::new(StatusCode::CREATED) })),
            ),
        );

        let mut ctx = MiddlewareContext::new();
        let response = next.run(&mut ctx, request()).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-trail"], "inner,outer");
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = FnHandler::new(move |_req| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Response::ok() }
        });

        let mut ctx = MiddlewareContext::new();
        ctx.cancellation().cancel();
        let response = Next::handler(&handler).run(&mut ctx, request()).await;
        assert_eq!(response.status().as_u16(), 499);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_slow_handler() {
        let handler = FnHandler::new(|_req| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Response::ok()
        });

        let mut ctx = MiddlewareContext::new();
        let cancellation = ctx.cancellation().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancellation.cancel();
        });

        let response = Next::handler(&handler).run(&mut ctx, request()).await;
        assert_eq!(response.status().as_u16(), 499);
    }

    #[tokio::test]
    async fn test_fn_middleware_short_circuit() {
        let mw = FnMiddleware::new("deny", 5, |_ctx, _req, _next| {
            Box::pin(async { Response::new(StatusCode::FORBIDDEN) })
        });
        assert_eq!(mw.priority(), 5);

        let handler = FnHandler::new(|_req| async { Response::ok() });
        let mut ctx = MiddlewareContext::new();
        let response = mw
            .process(&mut ctx, request(), Next::handler(&handler))
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_not_found_handler() {
        let mut ctx = MiddlewareContext::new();
        let response = NotFoundHandler.call(&mut ctx, request()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.is_error());
    }
}
