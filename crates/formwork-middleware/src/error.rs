//! Chain assembly errors.

use thiserror::Error;

/// Errors raised while registering middleware or assembling chains.
///
/// All of these are startup-time failures; none can occur while serving.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// A middleware with this name is already registered.
    #[error("middleware '{0}' is already registered")]
    DuplicateMiddleware(String),

    /// A chain type references a middleware that is not registered.
    #[error("chain type '{chain_type}' requires unregistered middleware '{middleware}'")]
    MissingMiddleware {
        /// The chain type being built.
        chain_type: String,
        /// The missing registry key.
        middleware: String,
    },

    /// No chain type with this name is defined.
    #[error("unknown chain type '{0}'")]
    UnknownChainType(String),

    /// A chain with this name is already cached.
    #[error("chain '{0}' is already registered")]
    DuplicateChain(String),
}
