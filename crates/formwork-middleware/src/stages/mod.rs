//! Built-in middleware.
//!
//! | Name         | Priority | Purpose                                        |
//! |--------------|----------|------------------------------------------------|
//! | `request_id` | -100     | Generate/propagate request ID (UUID v7)        |
//! | `logging`    | -50      | Structured start/completion logs with timing   |
//! | `assertion`  | 0        | Verify signed cross-service identity and tier  |

pub mod assertion;
pub mod logging;
pub mod request_id;

pub use assertion::{
    verified_plan_tier, verified_user_id, AssertionClaim, AssertionError, AssertionHeaders,
    AssertionMiddleware, AssertionSigner, AssertionVerifier, PLAN_TIER_HEADER, PLAN_TIER_KEY,
    SIGNATURE_HEADER, TIMESTAMP_HEADER, USER_ID_HEADER, USER_ID_KEY,
};
pub use logging::{LoggingMiddleware, RequestSummary};
pub use request_id::{RequestIdMiddleware, REQUEST_ID_HEADER};
