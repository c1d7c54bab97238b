//! Service wiring.
//!
//! Turns a loaded [`FormworkConfig`] into a ready-to-run [`Server`]: the
//! middleware registry, chain types, bindings, routes and the legacy
//! fallback.

use std::sync::Arc;
use std::time::Duration;

use formwork_config::FormworkConfig;
use formwork_core::PlanTier;
use formwork_middleware::stages::{
    AssertionMiddleware, AssertionVerifier, LoggingMiddleware, RequestIdMiddleware,
    PLAN_TIER_KEY, USER_ID_KEY,
};
use formwork_middleware::{
    full_body, Body, BoxError, ContextStore, Orchestrator, PipelineError, Registry, API_CHAIN,
    PUBLIC_CHAIN,
};
use formwork_server::{
    native_fn, HttpError, LegacyStack, NativeHandler, NativeRequest, PipelineIntegration, Server,
};
use formwork_telemetry::record_assertion_rejection;
use http::header::{self, HeaderValue};
use http::{Method, StatusCode};

/// Registers `request_id`, `logging` and `assertion`.
///
/// # Errors
///
/// Only if a name is registered twice, which would be a wiring bug.
pub fn registry(config: &FormworkConfig) -> Result<Registry, PipelineError> {
    let verifier = AssertionVerifier::new(config.assertion.secret())
        .with_skew(Duration::from_secs(config.assertion.timestamp_skew_secs));

    let mut registry = Registry::new();
    registry.register_default(RequestIdMiddleware::new())?;
    registry.register_default(LoggingMiddleware::new())?;
    registry.register_default(
        AssertionMiddleware::from_verifier(verifier)
            .on_reject(|err| record_assertion_rejection(err.reason())),
    )?;
    Ok(registry)
}

/// An orchestrator with the built-in chain types plus the configured ones.
pub fn orchestrator(config: &FormworkConfig, registry: Registry) -> Orchestrator {
    let mut orchestrator = Orchestrator::new(Arc::new(registry));
    for (chain_type, members) in &config.pipeline.chain_types {
        orchestrator.define(chain_type.clone(), members.iter().cloned());
    }
    orchestrator
}

/// Builds the API service.
///
/// Chains are installed when enabled and buildable, otherwise the standard
/// legacy stack; see [`Server::migration_status`].
///
/// # Errors
///
/// See [`registry`].
pub fn build_server(config: &FormworkConfig) -> Result<Server, PipelineError> {
    let server = &config.server;
    let request_timeout =
        (server.request_timeout_ms > 0).then(|| Duration::from_millis(server.request_timeout_ms));

    let mut builder = Server::builder()
        .http_addr(server.http_addr.clone())
        .shutdown_timeout(Duration::from_secs(server.shutdown_timeout_secs))
        .request_timeout(request_timeout)
        .max_connections(Some(server.max_connections))
        .route(Method::GET, "/api/ping", PUBLIC_CHAIN, ping())
        .route(Method::GET, "/api/whoami", API_CHAIN, whoami());

    let integration = PipelineIntegration::new(orchestrator(config, registry(config)?))
        .with_enabled(config.pipeline.enabled)
        .with_bindings(config.pipeline.bindings.clone());
    let status = integration.setup_with_fallback(&mut builder, LegacyStack::standard());

    tracing::info!(
        active = ?status.active,
        registered_middleware = status.registered_middleware.len(),
        named_chains = ?status.named_chains,
        legacy_middleware = status.legacy_middleware.len(),
        "middleware pipeline installed"
    );
    Ok(builder.build())
}

fn ping() -> impl NativeHandler {
    native_fn(|_req| async { Ok(json(StatusCode::OK, &serde_json::json!({ "pong": true }))) })
}

/// Reports the caller identity established by the assertion middleware.
///
/// Without one (for example under the legacy stack) the caller is treated
/// as unauthenticated.
fn whoami() -> impl NativeHandler {
    native_fn(|req: NativeRequest| async move {
        let store = req
            .extensions()
            .get::<ContextStore>()
            .cloned()
            .unwrap_or_default();
        let (Some(user_id), Some(plan_tier)) = (
            store.get::<String>(USER_ID_KEY),
            store.get::<PlanTier>(PLAN_TIER_KEY),
        ) else {
            return Err(BoxError::from(HttpError::from_status(StatusCode::UNAUTHORIZED)));
        };

        Ok(json(
            StatusCode::OK,
            &serde_json::json!({
                "user_id": user_id,
                "plan_tier": plan_tier.as_str(),
            }),
        ))
    })
}

fn json(status: StatusCode, body: &serde_json::Value) -> http::Response<Body> {
    let mut response = http::Response::new(full_body(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
