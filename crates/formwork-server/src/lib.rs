//! # Formwork Server
//!
//! Runs Formwork middleware chains on hyper.
//!
//! - [`HyperAdapter`]: converts between `http` 1.x types and the
//!   framework-neutral [`Request`](formwork_middleware::Request) and
//!   [`Response`](formwork_middleware::Response), and drives a chain with the
//!   route's native handler as the final continuation
//! - [`Router`]: method and path matching, each route naming its chain
//! - [`PipelineIntegration`]: builds named chains at startup and falls back
//!   to the [`LegacyStack`] when they are disabled or fail to build
//! - [`Server`]: the accept loop with graceful shutdown
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use formwork_middleware::{full_body, Orchestrator, Registry};
//! use formwork_middleware::stages::{LoggingMiddleware, RequestIdMiddleware};
//! use formwork_server::{native_fn, LegacyStack, PipelineIntegration, Server};
//! use http::Method;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = Registry::new();
//! registry.register_default(RequestIdMiddleware::new())?;
//! registry.register_default(LoggingMiddleware::new())?;
//!
//! let mut integration = PipelineIntegration::new(Orchestrator::new(Arc::new(registry)));
//! integration.unbind("api");
//!
//! let mut builder = Server::builder().http_addr("0.0.0.0:8080").route(
//!     Method::GET,
//!     "/ping",
//!     "public",
//!     native_fn(|_req| async { Ok(http::Response::new(full_body("pong"))) }),
//! );
//! integration.setup_with_fallback(&mut builder, LegacyStack::standard());
//! builder.build().run().await?;
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/formwork-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod adapter;
pub mod config;
pub mod error;
pub mod legacy;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod wiring;

pub use adapter::{
    classify_error, native_fn, HyperAdapter, NativeFn, NativeHandler, NativeRequest,
    NativeResponse, RemoteAddr,
};
pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{canonical_text, AdapterError, HttpError, ServerError};
pub use legacy::{AccessLogLayer, LegacyMiddleware, LegacyNext, LegacyStack};
pub use router::{RouteMatch, Router};
pub use server::{Server, ServerBuilder, HEALTH_PATH};
pub use shutdown::{ConnectionToken, ConnectionTracker, ShutdownSignal};
pub use wiring::{ActiveSystem, MigrationStatus, PipelineIntegration, RequestPipeline};
