//! # Formwork
//!
//! Framework-neutral HTTP middleware chains for the Formwork API service,
//! with stateless HMAC assertions between the UI-owning and API-owning
//! services.
//!
//! ```text
//! hyper → HyperAdapter → Chain[ request_id → logging → assertion ] → route handler
//! ```
//!
//! This crate re-exports the workspace crates and holds the wiring used by
//! the `formwork-api` binary:
//!
//! - [`core`]: request ids, plan tiers, shared secrets, status-bearing errors
//! - [`middleware`]: `Request`, `Response`, `Middleware`, `Chain`, `Orchestrator`
//!   and the built-in stages
//! - [`server`]: the hyper adapter, router, legacy fallback and accept loop
//! - [`config`]: file and environment configuration
//! - [`telemetry`]: logging and Prometheus metrics
//! - [`app`]: builds the service from a [`FormworkConfig`](config::FormworkConfig)

#![doc(html_root_url = "https://docs.rs/formwork/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod app;

pub use formwork_config as config;
pub use formwork_core as core;
pub use formwork_middleware as middleware;
pub use formwork_server as server;
pub use formwork_telemetry as telemetry;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports.
///
/// ```rust
/// use formwork::prelude::*;
///
/// let chain = Chain::builder().with(RequestIdMiddleware::new()).build();
/// assert_eq!(chain.names(), vec!["request_id"]);
/// ```
pub mod prelude {
    pub use formwork_config::{ConfigLoader, FormworkConfig};
    pub use formwork_core::{FormworkError, PlanTier, RequestId, SharedSecret};
    pub use formwork_middleware::stages::{
        verified_plan_tier, verified_user_id, AssertionMiddleware, AssertionSigner,
        AssertionVerifier, LoggingMiddleware, RequestIdMiddleware,
    };
    pub use formwork_middleware::{
        Chain, FnHandler, FnMiddleware, Handler, Middleware, MiddlewareContext, Next,
        Orchestrator, Registry, Request, Response,
    };
    pub use formwork_server::{
        native_fn, HyperAdapter, LegacyStack, MigrationStatus, PipelineIntegration, Server,
    };
}
