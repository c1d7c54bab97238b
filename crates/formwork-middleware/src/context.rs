//! Per-request context types.
//!
//! [`MiddlewareContext`] carries request-scoped metadata (request id, timing,
//! cancellation) through a chain. [`ContextStore`] is the string-keyed value
//! store that middleware use to hand data to downstream handlers.

use formwork_core::RequestId;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// String-keyed, typed per-request store.
///
/// Cloning the handle shares the underlying map. The framework adapter puts
/// the same handle into the native request's extensions, so values set on
/// either side are visible on both. A store is never shared between requests.
///
/// ```
/// use formwork_middleware::ContextStore;
///
/// let store = ContextStore::new();
/// store.set("form.id", 42_u64);
///
/// let view = store.clone();
/// assert_eq!(view.get::<u64>("form.id"), Some(42));
/// assert_eq!(view.get::<String>("form.id"), None);
/// ```
#[derive(Clone, Default)]
pub struct ContextStore {
    inner: Arc<RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>>,
}

impl ContextStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.inner.write().insert(key.into(), Arc::new(value));
    }

    /// Returns a clone of the value under `key` if it has type `T`.
    pub fn get<T: Any + Send + Sync + Clone>(&self, key: &str) -> Option<T> {
        let guard = self.inner.read();
        guard.get(key)?.downcast_ref::<T>().cloned()
    }

    /// Returns `true` if any value is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().contains_key(key)
    }

    /// Removes `key`. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.write().remove(key).is_some()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Returns `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Stored keys, unordered.
    pub fn keys(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// `true` if both handles point at the same map.
    pub fn same_store(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStore")
            .field("keys", &self.keys())
            .finish()
    }
}

/// Cancellation signal for one request.
///
/// The server cancels it when the request deadline expires. Chains observe it
/// through [`Next::run`](crate::Next::run), which stops dispatching further
/// work once the signal is set.
#[derive(Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
}

impl Cancellation {
    /// A signal that has not fired.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fires the signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the signal has fired.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal fires.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender is owned by `self`, so this is unreachable while borrowed.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellation")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Context that flows through a middleware chain.
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    /// Unique identifier for this request.
    request_id: RequestId,

    /// When the request started processing.
    started_at: Instant,

    /// Name of the chain serving the request, once routed.
    chain: Option<String>,

    /// Deadline / disconnect signal.
    cancellation: Cancellation,
}

impl MiddlewareContext {
    /// Creates a new middleware context with a fresh request ID.
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_id(RequestId::new())
    }

    /// Creates a context with a specific request ID.
    #[must_use]
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self {
            request_id,
            started_at: Instant::now(),
            chain: None,
            cancellation: Cancellation::new(),
        }
    }

    /// Replaces the cancellation signal with one owned by the caller.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Returns the request ID.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Sets the request ID.
    ///
    /// This should only be called by the request id middleware.
    pub fn set_request_id(&mut self, request_id: RequestId) {
        self.request_id = request_id;
    }

    /// Returns when the request started processing.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Name of the chain serving this request.
    pub fn chain_name(&self) -> Option<&str> {
        self.chain.as_deref()
    }

    /// Records the chain serving this request.
    pub fn set_chain_name(&mut self, chain: impl Into<String>) {
        self.chain = Some(chain.into());
    }

    /// The request's cancellation signal.
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Shorthand for `cancellation().is_cancelled()`.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_is_shared_between_handles() {
        let store = ContextStore::new();
        let other = store.clone();
        other.set("user", "u-1".to_string());

        assert!(store.same_store(&other));
        assert_eq!(store.get::<String>("user").as_deref(), Some("u-1"));
        assert!(store.remove("user"));
        assert!(other.is_empty());
    }

    #[test]
    fn test_store_type_mismatch_is_none() {
        let store = ContextStore::new();
        store.set("count", 3_i32);
        assert!(store.contains("count"));
        assert_eq!(store.get::<i64>("count"), None);
        assert_eq!(store.get::<i32>("count"), Some(3));
    }

    #[test]
    fn test_separate_stores_are_isolated() {
        let a = ContextStore::new();
        let b = ContextStore::new();
        a.set("k", 1_u8);
        assert!(!b.contains("k"));
        assert!(!a.same_store(&b));
    }

    #[tokio::test]
    async fn test_cancellation_wakes_waiters() {
        let cancellation = Cancellation::new();
        assert!(!cancellation.is_cancelled());

        let waiter = {
            let cancellation = cancellation.clone();
            tokio::spawn(async move { cancellation.cancelled().await })
        };
        cancellation.cancel();
        waiter.await.unwrap();
        assert!(cancellation.is_cancelled());

        // Already fired: resolves immediately.
        cancellation.cancelled().await;
    }

    #[test]
    fn test_context_defaults() {
        let mut ctx = MiddlewareContext::new();
        assert!(ctx.chain_name().is_none());
        assert!(!ctx.is_cancelled());
        ctx.set_chain_name("api");
        assert_eq!(ctx.chain_name(), Some("api"));
    }
}
