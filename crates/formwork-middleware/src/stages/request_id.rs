//! Request ID middleware.
//!
//! Generates a UUID v7 for each request, or reuses a valid incoming
//! `X-Request-ID` when configured to trust upstream callers. The ID is stored
//! in the [`MiddlewareContext`], forwarded on the request headers to the
//! downstream handler, and echoed on the response.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use formwork_core::RequestId;
use http::HeaderValue;

/// The header name for request ID propagation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Middleware that generates or extracts request IDs.
#[derive(Debug, Clone, Default)]
pub struct RequestIdMiddleware {
    /// Whether to trust incoming request ID headers.
    ///
    /// Enable this for service-to-service traffic where the caller already
    /// assigned an ID.
    trust_incoming: bool,
}

impl RequestIdMiddleware {
    /// Creates a middleware that always generates a fresh ID.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a middleware that trusts incoming `X-Request-ID` headers.
    #[must_use]
    pub fn trust_incoming() -> Self {
        Self {
            trust_incoming: true,
        }
    }

    fn extract_request_id(&self, request: &Request) -> Option<RequestId> {
        if !self.trust_incoming {
            return None;
        }

        request
            .header(REQUEST_ID_HEADER)
            .and_then(|value| value.parse().ok())
    }
}

impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &str {
        "request_id"
    }

    fn priority(&self) -> i32 {
        -100
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        mut request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let request_id = self
                .extract_request_id(&request)
                .unwrap_or_else(RequestId::new);
            ctx.set_request_id(request_id);

            let rendered = request_id.to_string();
            let header = HeaderValue::from_str(&rendered).ok();
            if let Some(value) = &header {
                request
                    .headers_mut()
                    .insert(REQUEST_ID_HEADER, value.clone());
            }

            let mut response = next.run(ctx, request).await;

            if let Some(value) = header {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            response.set_request_id(rendered);
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{FnHandler, Handler};
    use http::{HeaderName, Method, StatusCode, Uri};

    fn request_with_id(request_id: &'static str) -> Request {
        Request::new(Method::GET, Uri::from_static("/test")).with_header(
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderValue::from_static(request_id),
        )
    }

    fn echo_handler() -> impl Handler {
        FnHandler::new(|req: Request| {
            let seen = req.header(REQUEST_ID_HEADER).unwrap_or_default().to_string();
            std::future::ready(Response::text(StatusCode::OK, seen))
        })
    }

    #[tokio::test]
    async fn test_generates_request_id_when_missing() {
        let middleware = RequestIdMiddleware::new();
        let handler = echo_handler();
        let mut ctx = MiddlewareContext::new();
        let request = Request::new(Method::GET, Uri::from_static("/test"));

        let response = middleware
            .process(&mut ctx, request, Next::handler(&handler))
            .await;

        let header_id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert_eq!(ctx.request_id().to_string(), header_id);
        assert_eq!(response.request_id(), Some(header_id));
        // The handler saw the same id on its request.
        assert_eq!(response.body_bytes().unwrap().as_ref(), header_id.as_bytes());
    }

    #[tokio::test]
    async fn test_ignores_incoming_id_when_not_trusted() {
        let middleware = RequestIdMiddleware::new();
        let handler = echo_handler();
        let mut ctx = MiddlewareContext::new();
        let incoming_id = "01234567-89ab-7def-8123-456789abcdef";

        let response = middleware
            .process(&mut ctx, request_with_id(incoming_id), Next::handler(&handler))
            .await;

        assert_ne!(response.headers()[REQUEST_ID_HEADER], incoming_id);
    }

    #[tokio::test]
    async fn test_uses_incoming_id_when_trusted() {
        let middleware = RequestIdMiddleware::trust_incoming();
        let handler = echo_handler();
        let mut ctx = MiddlewareContext::new();
        let incoming_id = "01234567-89ab-7def-8123-456789abcdef";

        let response = middleware
            .process(&mut ctx, request_with_id(incoming_id), Next::handler(&handler))
            .await;

        assert_eq!(response.headers()[REQUEST_ID_HEADER], incoming_id);
        assert_eq!(ctx.request_id().to_string(), incoming_id);
    }

    #[tokio::test]
    async fn test_ignores_invalid_incoming_id() {
        let middleware = RequestIdMiddleware::trust_incoming();
        let handler = echo_handler();
        let mut ctx = MiddlewareContext::new();

        let response = middleware
            .process(
                &mut ctx,
                request_with_id("not-a-valid-uuid"),
                Next::handler(&handler),
            )
            .await;

        let header_id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert_ne!(header_id, "not-a-valid-uuid");
        assert!(header_id.parse::<RequestId>().is_ok());
    }

    #[test]
    fn test_name_and_priority() {
        let middleware = RequestIdMiddleware::new();
        assert_eq!(middleware.name(), "request_id");
        assert!(middleware.priority() < 0);
    }
}
