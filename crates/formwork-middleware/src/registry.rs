//! Name-keyed middleware registry.

use crate::chain::BoxedMiddleware;
use crate::error::PipelineError;
use crate::middleware::Middleware;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Middleware instances keyed by unique name, in registration order.
///
/// Populated once at startup, then shared read-only behind an `Arc`.
///
/// ```
/// use formwork_middleware::{PipelineError, Registry};
/// use formwork_middleware::stages::LoggingMiddleware;
///
/// let mut registry = Registry::new();
/// registry.register_default(LoggingMiddleware::new()).unwrap();
/// assert!(registry.get("logging").is_some());
/// assert_eq!(
///     registry.register_default(LoggingMiddleware::new()),
///     Err(PipelineError::DuplicateMiddleware("logging".into())),
/// );
/// ```
#[derive(Default, Clone)]
pub struct Registry {
    entries: IndexMap<String, BoxedMiddleware>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `middleware` under `name`.
    ///
    /// Fails if the name is taken; the existing entry is left untouched.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        middleware: BoxedMiddleware,
    ) -> Result<(), PipelineError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(PipelineError::DuplicateMiddleware(name));
        }
        tracing::debug!(middleware = %name, "registered middleware");
        self.entries.insert(name, middleware);
        Ok(())
    }

    /// Registers `middleware` under its own [`Middleware::name`].
    pub fn register_default<M: Middleware>(&mut self, middleware: M) -> Result<(), PipelineError> {
        let name = middleware.name().to_string();
        self.register(name, Arc::new(middleware))
    }

    /// Looks up a middleware by name.
    pub fn get(&self, name: &str) -> Option<BoxedMiddleware> {
        self.entries.get(name).cloned()
    }

    /// Registration position of `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.get_index_of(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Number of registered middleware.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("middleware", &self.names())
            .finish()
    }
}
