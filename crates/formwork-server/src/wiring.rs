//! Installs orchestrated chains on a server, with the legacy stack as the
//! escape hatch.

use std::sync::Arc;

use formwork_middleware::{Orchestrator, PipelineError, API_CHAIN, PUBLIC_CHAIN};
use indexmap::IndexMap;
use serde::Serialize;

use crate::legacy::LegacyStack;
use crate::server::ServerBuilder;

/// What a server runs requests through.
#[derive(Debug, Clone)]
pub enum RequestPipeline {
    /// Named chains from a frozen orchestrator.
    Chains(Arc<Orchestrator>),
    /// The flat native middleware list.
    Legacy(Arc<LegacyStack>),
}

impl RequestPipeline {
    /// Which system this is.
    pub fn active(&self) -> ActiveSystem {
        match self {
            Self::Chains(_) => ActiveSystem::Chains,
            Self::Legacy(_) => ActiveSystem::Legacy,
        }
    }
}

/// The middleware system currently serving requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveSystem {
    /// Orchestrated chains.
    Chains,
    /// Legacy middleware list.
    Legacy,
}

/// Startup report of which system is active and what it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// The system serving requests.
    pub active: ActiveSystem,
    /// Middleware names in the orchestrator's registry.
    pub registered_middleware: Vec<String>,
    /// Chains available to routes. Empty when the legacy system is active.
    pub named_chains: Vec<String>,
    /// Legacy layer names.
    pub legacy_middleware: Vec<String>,
}

impl MigrationStatus {
    /// Status for a server running its legacy stack.
    pub fn legacy(stack: &LegacyStack) -> Self {
        Self {
            active: ActiveSystem::Legacy,
            registered_middleware: Vec::new(),
            named_chains: Vec::new(),
            legacy_middleware: owned(stack.names()),
        }
    }

    fn chains(orchestrator: &Orchestrator, stack: &LegacyStack) -> Self {
        Self {
            active: ActiveSystem::Chains,
            registered_middleware: owned(orchestrator.registry().names()),
            named_chains: owned(orchestrator.chain_names()),
            legacy_middleware: owned(stack.names()),
        }
    }
}

fn owned(names: Vec<&str>) -> Vec<String> {
    names.into_iter().map(str::to_string).collect()
}

/// Builds named chains from chain types and installs them on a server.
///
/// Each *binding* maps a chain name, as routes refer to it, onto the chain
/// type it is built from.
///
/// ```
/// use std::sync::Arc;
/// use formwork_middleware::{Orchestrator, Registry};
/// use formwork_middleware::stages::{LoggingMiddleware, RequestIdMiddleware};
/// use formwork_server::{ActiveSystem, LegacyStack, PipelineIntegration, Server};
///
/// let mut registry = Registry::new();
/// registry.register_default(RequestIdMiddleware::new()).unwrap();
/// registry.register_default(LoggingMiddleware::new()).unwrap();
///
/// let mut integration = PipelineIntegration::new(Orchestrator::new(Arc::new(registry)));
/// integration.unbind("api");
///
/// let mut builder = Server::builder();
/// let status = integration.setup_with_fallback(&mut builder, LegacyStack::standard());
/// assert_eq!(status.active, ActiveSystem::Chains);
/// assert_eq!(status.named_chains, vec!["public"]);
/// ```
#[derive(Debug)]
pub struct PipelineIntegration {
    orchestrator: Orchestrator,
    enabled: bool,
    bindings: IndexMap<String, String>,
}

impl PipelineIntegration {
    /// Enabled, with `public` and `api` bound to their namesake chain types.
    pub fn new(orchestrator: Orchestrator) -> Self {
        let mut bindings = IndexMap::new();
        bindings.insert(PUBLIC_CHAIN.to_string(), PUBLIC_CHAIN.to_string());
        bindings.insert(API_CHAIN.to_string(), API_CHAIN.to_string());
        Self {
            orchestrator,
            enabled: true,
            bindings,
        }
    }

    /// Turns the chain system on or off.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Replaces every binding.
    #[must_use]
    pub fn with_bindings<I, K, V>(mut self, bindings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.bindings = bindings
            .into_iter()
            .map(|(chain, chain_type)| (chain.into(), chain_type.into()))
            .collect();
        self
    }

    /// Binds `chain` to `chain_type`, replacing an existing binding.
    pub fn bind(&mut self, chain: impl Into<String>, chain_type: impl Into<String>) -> &mut Self {
        self.bindings.insert(chain.into(), chain_type.into());
        self
    }

    /// Removes a binding.
    pub fn unbind(&mut self, chain: &str) -> &mut Self {
        self.bindings.shift_remove(chain);
        self
    }

    /// Chain name → chain type, in binding order.
    pub fn bindings(&self) -> &IndexMap<String, String> {
        &self.bindings
    }

    /// Whether the chain system will be attempted.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Builds every bound chain and installs them, or installs `legacy` if
    /// the chain system is disabled or any binding fails.
    pub fn setup_with_fallback(
        self,
        builder: &mut ServerBuilder,
        legacy: LegacyStack,
    ) -> MigrationStatus {
        if !self.enabled {
            tracing::info!(
                legacy_middleware = ?legacy.names(),
                "middleware chains disabled, using legacy stack"
            );
            return install_legacy(builder, legacy);
        }

        match self.build() {
            Ok(orchestrator) => {
                let status = MigrationStatus::chains(&orchestrator, &legacy);
                builder.install_pipeline(
                    RequestPipeline::Chains(Arc::new(orchestrator)),
                    status.clone(),
                );
                status
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    legacy_middleware = ?legacy.names(),
                    "failed to build middleware chains, falling back to legacy stack"
                );
                install_legacy(builder, legacy)
            }
        }
    }

    fn build(self) -> Result<Orchestrator, PipelineError> {
        let mut orchestrator = self.orchestrator;
        for (name, chain_type) in &self.bindings {
            let chain = orchestrator.create_chain(chain_type)?;
            orchestrator.register_chain(name.clone(), chain)?;
        }
        Ok(orchestrator)
    }
}

fn install_legacy(builder: &mut ServerBuilder, legacy: LegacyStack) -> MigrationStatus {
    let status = MigrationStatus::legacy(&legacy);
    builder.install_pipeline(RequestPipeline::Legacy(Arc::new(legacy)), status.clone());
    status
}
