//! # Formwork Middleware
//!
//! Framework-neutral request pipeline.
//!
//! Business middleware in this crate never sees a server framework's types.
//! A framework adapter converts native requests into [`Request`], runs a
//! [`Chain`], and writes the resulting [`Response`] back.
//!
//! ```text
//! native request → adapter → Chain[ request_id → logging → assertion ] → handler
//!                                                                          ↓
//! native response ← adapter ←──────────────── Response ←──────────────────┘
//! ```
//!
//! ## Building chains
//!
//! Middleware are registered by name in a [`Registry`] once at startup. An
//! [`Orchestrator`] turns *chain types* (named sets of registry keys) into
//! immutable [`Chain`]s and caches them under names that routes refer to.
//! Chains run members in registration order, re-sorted by
//! [`Middleware::priority`] (lower first, ties stable).
//!
//! ## Built-in middleware
//!
//! See [`stages`]: request id propagation, request logging, and the
//! HMAC cross-service [`AssertionMiddleware`](stages::AssertionMiddleware).

#![doc(html_root_url = "https://docs.rs/formwork-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod context;
pub mod error;
pub mod middleware;
pub mod orchestrator;
pub mod registry;
pub mod stages;
pub mod types;

// Re-export main types at crate root
pub use chain::{BoxedMiddleware, Chain, ChainBuilder};
pub use context::{Cancellation, ContextStore, MiddlewareContext};
pub use error::PipelineError;
pub use middleware::{BoxFuture, FnHandler, FnMiddleware, Handler, Middleware, Next, NotFoundHandler};
pub use orchestrator::{Orchestrator, API_CHAIN, PUBLIC_CHAIN};
pub use registry::Registry;
pub use types::{
    empty_body, full_body, Body, BoxError, PathParams, Request, RequestHead, Response,
    ResponseBody, ResponseError, SameSite, SetCookie,
};
