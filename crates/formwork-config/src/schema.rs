//! Configuration sections.

use formwork_core::SharedSecret;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Chain types every orchestrator defines without configuration.
pub const BUILTIN_CHAIN_TYPES: [&str; 2] = ["public", "api"];

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// Bind address, e.g. `0.0.0.0:8080`.
    pub http_addr: String,

    /// Seconds to wait for in-flight connections on shutdown.
    pub shutdown_timeout_secs: u64,

    /// Connections accepted concurrently before new ones are refused.
    pub max_connections: usize,

    /// Per-request deadline in milliseconds. `0` disables it.
    pub request_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            shutdown_timeout_secs: 30,
            max_connections: 10_000,
            request_timeout_ms: 30_000,
        }
    }
}

/// Middleware chain settings.
///
/// ```toml
/// [pipeline]
/// enabled = true
///
/// [pipeline.chain_types]
/// internal = ["request_id", "assertion"]
///
/// [pipeline.bindings]
/// public = "public"
/// api = "api"
/// admin = "internal"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    /// Serve through middleware chains. When `false` the legacy stack is used.
    pub enabled: bool,

    /// Chain types in addition to the built-in `public` and `api`.
    pub chain_types: IndexMap<String, Vec<String>>,

    /// Named chain → chain type it is built from.
    pub bindings: IndexMap<String, String>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            enabled: true,
            chain_types: IndexMap::new(),
            bindings: BUILTIN_CHAIN_TYPES
                .iter()
                .map(|name| ((*name).to_string(), (*name).to_string()))
                .collect(),
        }
    }
}

impl PipelineSection {
    /// Whether `chain_type` is built in or declared in [`chain_types`](Self::chain_types).
    pub fn knows_chain_type(&self, chain_type: &str) -> bool {
        BUILTIN_CHAIN_TYPES.contains(&chain_type) || self.chain_types.contains_key(chain_type)
    }
}

/// Cross-service assertion settings.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AssertionSection {
    /// HMAC key shared with the signing service.
    pub shared_secret: String,

    /// Accepted clock drift in either direction, in seconds.
    pub timestamp_skew_secs: u64,
}

impl Default for AssertionSection {
    fn default() -> Self {
        Self {
            shared_secret: String::new(),
            timestamp_skew_secs: 60,
        }
    }
}

impl AssertionSection {
    /// Minimum accepted secret length, in characters.
    pub const MIN_SECRET_LEN: usize = 32;

    /// The configured key wrapped for use by the verifier.
    pub fn secret(&self) -> SharedSecret {
        SharedSecret::from(self.shared_secret.as_str())
    }
}

impl fmt::Debug for AssertionSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionSection")
            .field("shared_secret", &"[REDACTED]")
            .field("timestamp_skew_secs", &self.timestamp_skew_secs)
            .finish()
    }
}
