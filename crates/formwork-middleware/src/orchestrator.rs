//! Builds and caches named chains.
//!
//! A *chain type* names a set of registry keys (for example `"api"` needs
//! `request_id`, `logging` and `assertion`). [`Orchestrator::create_chain`]
//! resolves a chain type against the registry and orders the members by
//! registration order, then by priority. Built chains are cached under
//! arbitrary names so several routes can reuse one chain.
//!
//! The orchestrator is mutated only while the server is being wired. After
//! that it is frozen behind an `Arc` and only read.

use crate::chain::{BoxedMiddleware, Chain};
use crate::error::PipelineError;
use crate::registry::Registry;
use indexmap::IndexMap;
use std::sync::Arc;

/// Chain type for unauthenticated routes.
pub const PUBLIC_CHAIN: &str = "public";

/// Chain type for routes called by the UI-owning service.
pub const API_CHAIN: &str = "api";

/// Assembles chains from a shared [`Registry`].
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<Registry>,
    chain_types: IndexMap<String, Vec<String>>,
    chains: IndexMap<String, Chain>,
}

impl Orchestrator {
    /// Creates an orchestrator with the default `public` and `api` chain
    /// types.
    pub fn new(registry: Arc<Registry>) -> Self {
        let mut orchestrator = Self::without_defaults(registry);
        orchestrator.define(PUBLIC_CHAIN, ["request_id", "logging"]);
        orchestrator.define(API_CHAIN, ["request_id", "logging", "assertion"]);
        orchestrator
    }

    /// Creates an orchestrator with no chain types defined.
    pub fn without_defaults(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            chain_types: IndexMap::new(),
            chains: IndexMap::new(),
        }
    }

    /// Defines or replaces a chain type.
    pub fn define<I, S>(&mut self, chain_type: impl Into<String>, middleware: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chain_types.insert(
            chain_type.into(),
            middleware.into_iter().map(Into::into).collect(),
        );
    }

    /// Middleware names required by a chain type.
    pub fn chain_type(&self, chain_type: &str) -> Option<&[String]> {
        self.chain_types.get(chain_type).map(Vec::as_slice)
    }

    /// Defined chain types.
    pub fn chain_types(&self) -> Vec<&str> {
        self.chain_types.keys().map(String::as_str).collect()
    }

    /// Builds a fresh chain for `chain_type`.
    ///
    /// Members run in registration order, stably re-sorted by priority.
    pub fn create_chain(&self, chain_type: &str) -> Result<Chain, PipelineError> {
        let names = self
            .chain_types
            .get(chain_type)
            .ok_or_else(|| PipelineError::UnknownChainType(chain_type.to_string()))?;

        let mut members: Vec<(usize, BoxedMiddleware)> = Vec::with_capacity(names.len());
        for name in names {
            let (Some(position), Some(middleware)) =
                (self.registry.position(name), self.registry.get(name))
            else {
                return Err(PipelineError::MissingMiddleware {
                    chain_type: chain_type.to_string(),
                    middleware: name.clone(),
                });
            };
            if members.iter().all(|(existing, _)| *existing != position) {
                members.push((position, middleware));
            }
        }
        members.sort_by_key(|(position, _)| *position);

        let chain = Chain::new(members.into_iter().map(|(_, mw)| mw).collect());
        tracing::debug!(chain_type, middleware = ?chain.names(), "assembled chain");
        Ok(chain)
    }

    /// Caches `chain` under `name`. Fails if the name is taken.
    pub fn register_chain(
        &mut self,
        name: impl Into<String>,
        chain: Chain,
    ) -> Result<(), PipelineError> {
        let name = name.into();
        if self.chains.contains_key(&name) {
            return Err(PipelineError::DuplicateChain(name));
        }
        self.chains.insert(name, chain);
        Ok(())
    }

    /// A cached chain.
    pub fn get_chain(&self, name: &str) -> Option<&Chain> {
        self.chains.get(name)
    }

    /// Names of cached chains, in registration order.
    pub fn chain_names(&self) -> Vec<&str> {
        self.chains.keys().map(String::as_str).collect()
    }

    /// Number of cached chains.
    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// The shared registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
