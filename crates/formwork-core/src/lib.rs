//! # Formwork Core
//!
//! Core types shared by every formwork crate.
//!
//! - [`RequestId`] - UUID v7 request identifier
//! - [`PlanTier`] - Subscription tier carried by cross-service assertions
//! - [`SharedSecret`] - Redacting wrapper for the assertion signing key
//! - [`FormworkError`] - Status-bearing error type

#![doc(html_root_url = "https://docs.rs/formwork-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod request_id;
mod secret;
mod tier;

pub use error::{ErrorCategory, FormworkError, FormworkResult};
pub use request_id::RequestId;
pub use secret::SharedSecret;
pub use tier::{PlanTier, UnknownPlanTier};
