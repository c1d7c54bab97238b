//! Cross-service assertion verification.
//!
//! The UI-owning service signs every call it makes to the API-owning service
//! with a key both sides share. No session state is involved: each request
//! carries its own proof.
//!
//! # Wire format
//!
//! | Header        | Value                                              | Required |
//! |---------------|----------------------------------------------------|----------|
//! | `X-User-Id`   | opaque id, no `:`                                  | yes      |
//! | `X-Timestamp` | RFC 3339 instant, e.g. `2026-02-24T10:15:30Z`      | yes      |
//! | `X-Signature` | lowercase hex HMAC-SHA256 of the payload           | yes      |
//! | `X-Plan-Tier` | `free`, `pro`, `business` or `enterprise`          | no       |
//!
//! The payload is `user_id + ":" + timestamp + ":" + plan_tier`, with the
//! timestamp exactly as sent. A missing or blank tier header means `free`,
//! and `free` is what must have been signed.
//!
//! A request is accepted when the signature matches (compared in constant
//! time) and the timestamp is within the skew window of the verifier's
//! clock, inclusive. Rejections answer a bare `401 {"error":"unauthorized"}`;
//! the reason is only logged.
//!
//! There is no nonce store. A captured request can be replayed until its
//! timestamp leaves the skew window.

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use formwork_core::{PlanTier, SharedSecret};
use hmac::{Hmac, Mac};
use http::{HeaderMap, HeaderName, HeaderValue};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Caller identity header.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Signing instant header.
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
/// Signature header.
pub const SIGNATURE_HEADER: &str = "x-signature";
/// Optional plan tier header.
pub const PLAN_TIER_HEADER: &str = "x-plan-tier";

/// Store key holding the verified user id (`String`).
pub const USER_ID_KEY: &str = "assertion.user_id";
/// Store key holding the verified [`PlanTier`].
pub const PLAN_TIER_KEY: &str = "assertion.plan_tier";

/// Default tolerated clock drift between signer and verifier.
pub const DEFAULT_SKEW: Duration = Duration::from_secs(60);

const SIGNATURE_HEX_LEN: usize = 64;

/// Why an assertion was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssertionError {
    /// A required header is absent, empty, or not visible ASCII.
    #[error("missing required header {0}")]
    MissingHeader(&'static str),

    /// The user id contains the payload delimiter.
    #[error("user id must be non-empty and must not contain ':'")]
    InvalidUserId,

    /// The tier header is not one of the known tiers.
    #[error("unknown plan tier")]
    UnknownPlanTier,

    /// The signature is malformed or does not match the payload.
    #[error("signature mismatch")]
    SignatureMismatch,

    /// The timestamp is not RFC 3339.
    #[error("malformed timestamp")]
    MalformedTimestamp,

    /// The timestamp is outside the skew window.
    #[error("timestamp outside allowed skew")]
    TimestampExpired,

    /// The configured key is empty. Nothing verifies or signs under it.
    #[error("signing key is empty")]
    InvalidKey,
}

impl AssertionError {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::MissingHeader(_) => "missing_header",
            Self::InvalidUserId => "invalid_user_id",
            Self::UnknownPlanTier => "unknown_plan_tier",
            Self::SignatureMismatch => "signature_mismatch",
            Self::MalformedTimestamp => "malformed_timestamp",
            Self::TimestampExpired => "timestamp_expired",
            Self::InvalidKey => "invalid_key",
        }
    }
}

/// The string that is signed.
pub fn signing_payload(user_id: &str, timestamp: &str, plan_tier: &str) -> String {
    format!("{user_id}:{timestamp}:{plan_tier}")
}

fn keyed_mac(secret: &SharedSecret) -> Result<HmacSha256, AssertionError> {
    if secret.is_empty() {
        return Err(AssertionError::InvalidKey);
    }
    HmacSha256::new_from_slice(secret.expose_secret()).map_err(|_| AssertionError::InvalidKey)
}

/// Lowercase hex HMAC-SHA256 of `payload`.
pub fn sign_payload(secret: &SharedSecret, payload: &str) -> Result<String, AssertionError> {
    let mut mac = keyed_mac(secret)?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn check_user_id(user_id: &str) -> Result<(), AssertionError> {
    if user_id.is_empty() || user_id.contains(':') {
        return Err(AssertionError::InvalidUserId);
    }
    Ok(())
}

fn required<'h>(headers: &'h HeaderMap, name: &'static str) -> Result<&'h str, AssertionError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or(AssertionError::MissingHeader(name))
}

fn plan_tier(headers: &HeaderMap) -> Result<PlanTier, AssertionError> {
    let Some(value) = headers.get(PLAN_TIER_HEADER) else {
        return Ok(PlanTier::Free);
    };
    let value = value
        .to_str()
        .map_err(|_| AssertionError::UnknownPlanTier)?;
    if value.trim().is_empty() {
        return Ok(PlanTier::Free);
    }
    value.parse().map_err(|_| AssertionError::UnknownPlanTier)
}

fn is_lower_hex(signature: &str) -> bool {
    signature.len() == SIGNATURE_HEX_LEN
        && signature
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// A verified assertion. Lives only for the request that carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionClaim {
    /// Caller's user id.
    pub user_id: String,
    /// Caller's plan tier, `free` when the header was absent or blank.
    pub plan_tier: PlanTier,
    /// Signing instant.
    pub timestamp: DateTime<Utc>,
    /// The signature the caller sent.
    pub signature: String,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Verifies assertion headers against a shared key and skew window.
///
/// Pure computation: no I/O, no state that changes between calls, so
/// verifying the same headers at the same instant always gives the same
/// outcome.
#[derive(Clone)]
pub struct AssertionVerifier {
    secret: Arc<SharedSecret>,
    skew: Duration,
    window: TimeDelta,
    clock: Clock,
}

impl AssertionVerifier {
    /// Creates a verifier with the default 60 second skew and the system clock.
    pub fn new(secret: impl Into<SharedSecret>) -> Self {
        Self::from_shared(Arc::new(secret.into()))
    }

    /// Creates a verifier over an already shared key.
    ///
    /// An empty key is accepted here but every verification then fails with
    /// [`AssertionError::InvalidKey`].
    pub fn from_shared(secret: Arc<SharedSecret>) -> Self {
        if secret.is_empty() {
            tracing::warn!("assertion verifier has an empty key, all requests will be rejected");
        }
        Self {
            secret,
            skew: DEFAULT_SKEW,
            window: window(DEFAULT_SKEW),
            clock: Arc::new(Utc::now),
        }
    }

    /// Sets the skew window.
    #[must_use]
    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self.window = window(skew);
        self
    }

    /// Replaces the clock used by [`verify`](Self::verify).
    #[must_use]
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// The configured skew window.
    pub fn skew(&self) -> Duration {
        self.skew
    }

    /// Verifies `headers` against the verifier's clock.
    pub fn verify(&self, headers: &HeaderMap) -> Result<AssertionClaim, AssertionError> {
        self.verify_at(headers, (self.clock)())
    }

    /// Verifies `headers` as if the current time were `now`.
    pub fn verify_at(
        &self,
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Result<AssertionClaim, AssertionError> {
        let mut mac = keyed_mac(&self.secret)?;
        let user_id = required(headers, USER_ID_HEADER)?;
        let timestamp = required(headers, TIMESTAMP_HEADER)?;
        let signature = required(headers, SIGNATURE_HEADER)?;
        check_user_id(user_id)?;
        let plan_tier = plan_tier(headers)?;

        if !is_lower_hex(signature) {
            return Err(AssertionError::SignatureMismatch);
        }
        let provided = hex::decode(signature).map_err(|_| AssertionError::SignatureMismatch)?;
        mac.update(signing_payload(user_id, timestamp, plan_tier.as_str()).as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| AssertionError::SignatureMismatch)?;

        let signed_at = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|_| AssertionError::MalformedTimestamp)?
            .with_timezone(&Utc);
        let drift = now.signed_duration_since(signed_at);
        if drift > self.window || drift < -self.window {
            return Err(AssertionError::TimestampExpired);
        }

        Ok(AssertionClaim {
            user_id: user_id.to_string(),
            plan_tier,
            timestamp: signed_at,
            signature: signature.to_string(),
        })
    }
}

fn window(skew: Duration) -> TimeDelta {
    TimeDelta::from_std(skew).unwrap_or(TimeDelta::MAX)
}

impl fmt::Debug for AssertionVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionVerifier")
            .field("secret", &self.secret)
            .field("skew", &self.skew)
            .finish_non_exhaustive()
    }
}

/// Headers produced by [`AssertionSigner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionHeaders {
    /// `X-User-Id`
    pub user_id: String,
    /// `X-Timestamp`
    pub timestamp: String,
    /// `X-Plan-Tier`
    pub plan_tier: PlanTier,
    /// `X-Signature`
    pub signature: String,
}

impl AssertionHeaders {
    /// Renders the four headers.
    pub fn to_header_map(&self) -> Result<HeaderMap, AssertionError> {
        let mut headers = HeaderMap::with_capacity(4);
        let user_id =
            HeaderValue::from_str(&self.user_id).map_err(|_| AssertionError::InvalidUserId)?;
        headers.insert(HeaderName::from_static(USER_ID_HEADER), user_id);
        headers.insert(
            HeaderName::from_static(TIMESTAMP_HEADER),
            HeaderValue::from_str(&self.timestamp)
                .map_err(|_| AssertionError::MalformedTimestamp)?,
        );
        headers.insert(
            HeaderName::from_static(PLAN_TIER_HEADER),
            HeaderValue::from_static(self.plan_tier.as_str()),
        );
        headers.insert(
            HeaderName::from_static(SIGNATURE_HEADER),
            HeaderValue::from_str(&self.signature)
                .map_err(|_| AssertionError::SignatureMismatch)?,
        );
        Ok(headers)
    }
}

/// Produces assertion headers. Used by the calling service.
#[derive(Clone)]
pub struct AssertionSigner {
    secret: Arc<SharedSecret>,
}

impl AssertionSigner {
    /// Creates a signer.
    pub fn new(secret: impl Into<SharedSecret>) -> Self {
        Self::from_shared(Arc::new(secret.into()))
    }

    /// Creates a signer over an already shared key.
    pub fn from_shared(secret: Arc<SharedSecret>) -> Self {
        Self { secret }
    }

    /// Signs for `user_id` at the current instant.
    pub fn sign(&self, user_id: &str, plan_tier: PlanTier) -> Result<AssertionHeaders, AssertionError> {
        self.sign_at(user_id, plan_tier, Utc::now())
    }

    /// Signs for `user_id` at `at`, formatted to whole seconds in UTC.
    pub fn sign_at(
        &self,
        user_id: &str,
        plan_tier: PlanTier,
        at: DateTime<Utc>,
    ) -> Result<AssertionHeaders, AssertionError> {
        check_user_id(user_id)?;
        let timestamp = at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let payload = signing_payload(user_id, &timestamp, plan_tier.as_str());
        Ok(AssertionHeaders {
            user_id: user_id.to_string(),
            signature: sign_payload(&self.secret, &payload)?,
            timestamp,
            plan_tier,
        })
    }
}

impl fmt::Debug for AssertionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionSigner")
            .field("secret", &self.secret)
            .finish()
    }
}

/// Middleware that admits only requests carrying a valid assertion.
///
/// On success the user id and tier are stored under [`USER_ID_KEY`] and
/// [`PLAN_TIER_KEY`] and the chain continues. On failure the chain stops
/// with `401 {"error":"unauthorized"}`.
#[derive(Clone)]
pub struct AssertionMiddleware {
    verifier: AssertionVerifier,
    on_reject: Option<Arc<dyn Fn(&AssertionError) + Send + Sync>>,
}

impl AssertionMiddleware {
    /// Creates the middleware with the default skew window.
    pub fn new(secret: impl Into<SharedSecret>) -> Self {
        Self::from_verifier(AssertionVerifier::new(secret))
    }

    /// Creates the middleware around a configured verifier.
    pub fn from_verifier(verifier: AssertionVerifier) -> Self {
        Self {
            verifier,
            on_reject: None,
        }
    }

    /// Calls `observer` with the reason of every rejection, after logging.
    #[must_use]
    pub fn on_reject<F>(mut self, observer: F) -> Self
    where
        F: Fn(&AssertionError) + Send + Sync + 'static,
    {
        self.on_reject = Some(Arc::new(observer));
        self
    }

    /// The underlying verifier.
    pub fn verifier(&self) -> &AssertionVerifier {
        &self.verifier
    }
}

impl fmt::Debug for AssertionMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionMiddleware")
            .field("verifier", &self.verifier)
            .field("on_reject", &self.on_reject.is_some())
            .finish()
    }
}

impl Middleware for AssertionMiddleware {
    fn name(&self) -> &str {
        "assertion"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let claim = match self.verifier.verify(request.headers()) {
                Ok(claim) => claim,
                Err(AssertionError::InvalidKey) => {
                    tracing::error!(
                        request_id = %ctx.request_id(),
                        "assertion key is empty, rejecting"
                    );
                    if let Some(observer) = &self.on_reject {
                        observer(&AssertionError::InvalidKey);
                    }
                    return Response::unauthorized();
                }
                Err(err) => {
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        reason = err.reason(),
                        "assertion rejected"
                    );
                    if let Some(observer) = &self.on_reject {
                        observer(&err);
                    }
                    return Response::unauthorized();
                }
            };

            tracing::debug!(
                request_id = %ctx.request_id(),
                user_id = %claim.user_id,
                plan_tier = %claim.plan_tier,
                "assertion verified"
            );
            request.store().set(USER_ID_KEY, claim.user_id);
            request.store().set(PLAN_TIER_KEY, claim.plan_tier);

            next.run(ctx, request).await
        })
    }
}

/// The user id published by [`AssertionMiddleware`], if it ran and accepted.
pub fn verified_user_id(request: &Request) -> Option<String> {
    request.store().get::<String>(USER_ID_KEY)
}

/// The plan tier published by [`AssertionMiddleware`], if it ran and accepted.
pub fn verified_plan_tier(request: &Request) -> Option<PlanTier> {
    request.store().get::<PlanTier>(PLAN_TIER_KEY)
}
