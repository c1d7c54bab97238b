//! Route table.
//!
//! Each route binds a method and a path pattern to a named chain and a
//! native handler. Patterns use `:name` segments for parameters:
//!
//! ```
//! use formwork_middleware::full_body;
//! use formwork_server::{native_fn, Router};
//! use http::Method;
//!
//! let mut router = Router::new();
//! router.route(
//!     Method::GET,
//!     "/api/forms/:form_id",
//!     "api",
//!     native_fn(|_req| async { Ok(http::Response::new(full_body("form"))) }),
//! );
//!
//! let found = router.match_route(&Method::GET, "/api/forms/42").unwrap();
//! assert_eq!(found.chain(), "api");
//! assert_eq!(found.params().get("form_id"), Some("42"));
//! ```

use std::fmt;
use std::sync::Arc;

use formwork_middleware::PathParams;
use http::Method;

use crate::adapter::NativeHandler;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

struct Route {
    method: Method,
    pattern: String,
    segments: Vec<Segment>,
    chain: String,
    handler: Arc<dyn NativeHandler>,
}

impl Route {
    fn parse(pattern: &str) -> Vec<Segment> {
        pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect()
    }

    fn match_path(&self, path: &str) -> Option<PathParams> {
        let mut actual = path.split('/').filter(|s| !s.is_empty());
        let mut params = PathParams::new();

        for segment in &self.segments {
            let value = actual.next()?;
            match segment {
                Segment::Literal(expected) if expected == value => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => params.push(name.clone(), value),
            }
        }

        actual.next().is_none().then_some(params)
    }
}

/// A resolved route.
pub struct RouteMatch<'a> {
    route: &'a Route,
    params: PathParams,
}

impl<'a> RouteMatch<'a> {
    /// Name of the chain the route runs through.
    pub fn chain(&self) -> &'a str {
        &self.route.chain
    }

    /// The pattern that matched.
    pub fn pattern(&self) -> &'a str {
        &self.route.pattern
    }

    /// The route's handler.
    pub fn handler(&self) -> &'a Arc<dyn NativeHandler> {
        &self.route.handler
    }

    /// Captured path parameters.
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Takes the captured parameters.
    pub fn into_params(self) -> PathParams {
        self.params
    }
}

/// Method + path → (chain, handler).
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// An empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route. Earlier routes win when several match.
    pub fn route<H: NativeHandler>(
        &mut self,
        method: Method,
        pattern: &str,
        chain: impl Into<String>,
        handler: H,
    ) -> &mut Self {
        self.routes.push(Route {
            method,
            pattern: pattern.to_string(),
            segments: Route::parse(pattern),
            chain: chain.into(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Finds the first route for `method` whose pattern matches `path`.
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        self.routes
            .iter()
            .filter(|route| route.method == *method)
            .find_map(|route| {
                route
                    .match_path(path)
                    .map(|params| RouteMatch { route, params })
            })
    }

    /// Chain names referenced by routes, in route order, without repeats.
    pub fn chains(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for route in &self.routes {
            if !seen.contains(&route.chain.as_str()) {
                seen.push(&route.chain);
            }
        }
        seen
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// `true` with no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.routes
                    .iter()
                    .map(|r| format!("{} {} -> {}", r.method, r.pattern, r.chain)),
            )
            .finish()
    }
}
