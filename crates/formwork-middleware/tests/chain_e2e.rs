//! End-to-end chain tests.
//!
//! These drive registry → orchestrator → chain → assertion → handler the way
//! the server does, without any HTTP framework involved.

use chrono::{DateTime, SecondsFormat, TimeDelta, TimeZone, Utc};
use formwork_core::{PlanTier, SharedSecret};
use formwork_middleware::stages::assertion::{
    sign_payload, signing_payload, PLAN_TIER_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER,
    USER_ID_HEADER,
};
use formwork_middleware::stages::{
    verified_plan_tier, verified_user_id, AssertionMiddleware, AssertionVerifier,
    LoggingMiddleware, RequestIdMiddleware, RequestSummary, REQUEST_ID_HEADER,
};
use formwork_middleware::{
    BoxFuture, Chain, FnHandler, Handler, Middleware, MiddlewareContext, Next, Orchestrator,
    PipelineError, Registry, Request, Response, API_CHAIN,
};
use http::{HeaderName, HeaderValue, Method, StatusCode, Uri};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "test-secret";

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 24, 10, 15, 30).unwrap()
}

fn assertion() -> AssertionMiddleware {
    AssertionMiddleware::from_verifier(AssertionVerifier::new(SECRET).with_clock(fixed_now))
}

fn timestamp(offset_secs: i64) -> String {
    (fixed_now() + TimeDelta::seconds(offset_secs)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn hmac(payload: &str) -> String {
    sign_payload(&SharedSecret::from(SECRET), payload).unwrap()
}

fn header(name: &'static str, value: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static(name),
        HeaderValue::from_str(value).unwrap(),
    )
}

fn api_request(headers: Vec<(HeaderName, HeaderValue)>) -> Request {
    headers.into_iter().fold(
        Request::new(Method::GET, Uri::from_static("/api/forms")),
        |request, (name, value)| request.with_header(name, value),
    )
}

/// Handler that reports what the assertion middleware published.
fn whoami(calls: &Arc<AtomicUsize>) -> impl Handler {
    let calls = Arc::clone(calls);
    FnHandler::new(move |req: Request| {
        calls.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::json!({
            "user_id": verified_user_id(&req),
            "plan_tier": verified_plan_tier(&req),
        });
        async move { Response::json(StatusCode::OK, &body) }
    })
}

fn body_json(response: &Response) -> serde_json::Value {
    serde_json::from_slice(response.body_bytes().expect("buffered body")).unwrap()
}

// ============================================================================
// Assertion scenarios
// ============================================================================

#[tokio::test]
async fn explicit_tier_is_published() {
    let calls = Arc::new(AtomicUsize::new(0));
    let chain = Chain::builder()
        .with(assertion())
        .handler(whoami(&calls))
        .build();

    let ts = timestamp(0);
    let request = api_request(vec![
        header(USER_ID_HEADER, "user-123"),
        header(TIMESTAMP_HEADER, &ts),
        header(PLAN_TIER_HEADER, "pro"),
        header(SIGNATURE_HEADER, &hmac(&format!("user-123:{ts}:pro"))),
    ]);

    let mut ctx = MiddlewareContext::new();
    let response = chain.process(&mut ctx, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(&response),
        serde_json::json!({ "user_id": "user-123", "plan_tier": "pro" })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn omitted_tier_defaults_to_free() {
    let calls = Arc::new(AtomicUsize::new(0));
    let chain = Chain::builder()
        .with(assertion())
        .handler(whoami(&calls))
        .build();

    let ts = timestamp(0);
    let request = api_request(vec![
        header(USER_ID_HEADER, "user-123"),
        header(TIMESTAMP_HEADER, &ts),
        header(SIGNATURE_HEADER, &hmac(&format!("user-123:{ts}:free"))),
    ]);

    let mut ctx = MiddlewareContext::new();
    let response = chain.process(&mut ctx, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(&response)["plan_tier"], "free");
}

#[tokio::test]
async fn logging_wraps_rejection_and_handler_never_runs() {
    let summaries: Arc<Mutex<Vec<RequestSummary>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&summaries);

    let mut registry = Registry::new();
    registry
        .register_default(LoggingMiddleware::new().with_observer(move |s| sink.lock().push(s.clone())))
        .unwrap();
    registry.register_default(assertion()).unwrap();

    let mut orchestrator = Orchestrator::new(Arc::new(registry));
    orchestrator.define(API_CHAIN, ["logging", "assertion"]);
    let chain = orchestrator.create_chain(API_CHAIN).unwrap();
    assert_eq!(chain.names(), vec!["logging", "assertion"]);

    let calls = Arc::new(AtomicUsize::new(0));
    let chain = chain.with_handler(Arc::new(whoami(&calls)));

    let ts = timestamp(0);
    let forged = api_request(vec![
        header(USER_ID_HEADER, "user-123"),
        header(TIMESTAMP_HEADER, &ts),
        header(PLAN_TIER_HEADER, "enterprise"),
        header(SIGNATURE_HEADER, &hmac(&format!("user-123:{ts}:free"))),
    ]);

    let mut ctx = MiddlewareContext::new();
    let response = chain.process(&mut ctx, forged).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(&response), serde_json::json!({ "error": "unauthorized" }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let summaries = summaries.lock();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn skew_window_is_inclusive_in_both_directions() {
    let chain = Chain::builder()
        .with(assertion())
        .handler(FnHandler::new(|_req| async { Response::ok() }))
        .build();

    for (offset, expected) in [
        (-60, StatusCode::OK),
        (60, StatusCode::OK),
        (-61, StatusCode::UNAUTHORIZED),
        (61, StatusCode::UNAUTHORIZED),
    ] {
        let ts = timestamp(offset);
        let request = api_request(vec![
            header(USER_ID_HEADER, "user-123"),
            header(TIMESTAMP_HEADER, &ts),
            header(
                SIGNATURE_HEADER,
                &hmac(&signing_payload("user-123", &ts, PlanTier::Free.as_str())),
            ),
        ]);
        let mut ctx = MiddlewareContext::new();
        let response = chain.process(&mut ctx, request).await;
        assert_eq!(response.status(), expected, "offset {offset}s");
    }
}

#[tokio::test]
async fn repeated_verification_gives_same_outcome() {
    let chain = Chain::builder()
        .with(assertion())
        .handler(FnHandler::new(|_req| async { Response::ok() }))
        .build();

    let ts = timestamp(-10);
    let signature = hmac(&format!("user-123:{ts}:pro"));
    for _ in 0..3 {
        let request = api_request(vec![
            header(USER_ID_HEADER, "user-123"),
            header(TIMESTAMP_HEADER, &ts),
            header(PLAN_TIER_HEADER, "pro"),
            header(SIGNATURE_HEADER, &signature),
        ]);
        let mut ctx = MiddlewareContext::new();
        assert_eq!(chain.process(&mut ctx, request).await.status(), StatusCode::OK);
    }
}

// ============================================================================
// Orchestrator wiring
// ============================================================================

fn full_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_default(RequestIdMiddleware::new()).unwrap();
    registry.register_default(LoggingMiddleware::new()).unwrap();
    registry.register_default(assertion()).unwrap();
    registry
}

#[tokio::test]
async fn default_api_chain_sets_request_id_even_on_rejection() {
    let orchestrator = Orchestrator::new(Arc::new(full_registry()));
    let chain = orchestrator.create_chain(API_CHAIN).unwrap();
    assert_eq!(chain.names(), vec!["request_id", "logging", "assertion"]);

    let mut ctx = MiddlewareContext::new();
    let response = chain.process(&mut ctx, api_request(Vec::new())).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()[REQUEST_ID_HEADER],
        ctx.request_id().to_string().as_str()
    );
}

#[test]
fn duplicate_registration_is_rejected() {
    let mut registry = full_registry();
    assert_eq!(
        registry.register_default(LoggingMiddleware::new()),
        Err(PipelineError::DuplicateMiddleware("logging".into()))
    );
    assert_eq!(registry.len(), 3);
}

#[test]
fn named_chains_are_cached_and_read_only() {
    let mut orchestrator = Orchestrator::new(Arc::new(full_registry()));
    let api = orchestrator.create_chain(API_CHAIN).unwrap();
    orchestrator.register_chain("forms-api", api.clone()).unwrap();
    orchestrator.register_chain("billing-api", api).unwrap();

    let frozen = Arc::new(orchestrator);
    assert_eq!(frozen.chain_count(), 2);
    assert_eq!(frozen.chain_names(), vec!["forms-api", "billing-api"]);
    assert_eq!(
        frozen.get_chain("forms-api").map(Chain::names),
        Some(vec!["request_id", "logging", "assertion"])
    );
}

// ============================================================================
// Cancellation
// ============================================================================

/// Sleeps before continuing so cancellation lands mid-chain.
struct Slow {
    entered: Arc<AtomicUsize>,
}

impl Middleware for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            self.entered.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            next.run(ctx, request).await
        })
    }
}

#[tokio::test]
async fn cancellation_stops_downstream_work() {
    let entered = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let summaries: Arc<Mutex<Vec<RequestSummary>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&summaries);

    let chain = Chain::builder()
        .with(LoggingMiddleware::new().with_observer(move |s| sink.lock().push(s.clone())))
        .with(Slow {
            entered: Arc::clone(&entered),
        })
        .handler(whoami(&calls))
        .build();

    let mut ctx = MiddlewareContext::new();
    let cancellation = ctx.cancellation().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancellation.cancel();
    });

    let response = chain.process(&mut ctx, api_request(Vec::new())).await;

    assert_eq!(response.status().as_u16(), 499);
    assert_eq!(entered.load(Ordering::SeqCst), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(summaries.lock()[0].status.as_u16(), 499);
}
