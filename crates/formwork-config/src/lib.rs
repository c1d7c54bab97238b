//! Typed configuration for Formwork services.
//!
//! - TOML and JSON files
//! - `FORMWORK__SECTION__KEY` environment overrides, optionally seeded from `.env`
//! - strict parsing (unknown fields are errors) and post-load validation
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//! request_timeout_ms = 30000
//!
//! [pipeline]
//! enabled = true
//!
//! [pipeline.bindings]
//! public = "public"
//! api = "api"
//!
//! [assertion]
//! shared_secret = "at-least-thirty-two-characters-long"
//! timestamp_skew_secs = 60
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [metrics]
//! enabled = true
//! addr = "0.0.0.0:9090"
//! ```
//!
//! Overrides:
//!
//! - `FORMWORK__SERVER__HTTP_ADDR=0.0.0.0:9000`
//! - `FORMWORK__ASSERTION__SHARED_SECRET=...`
//! - `FORMWORK__PIPELINE__BINDINGS__ADMIN=api`

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::FormworkConfig;
pub use error::ConfigError;
pub use loader::{ConfigLoader, ENV_PREFIX};
pub use schema::{AssertionSection, PipelineSection, ServerSection, BUILTIN_CHAIN_TYPES};
