//! Subscription tiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A subscriber's plan, ordered from lowest to highest.
///
/// The tier travels in the `X-Plan-Tier` assertion header and is part of the
/// signed payload. A missing or blank header means [`PlanTier::Free`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    /// Lowest tier; the default.
    #[default]
    Free,
    /// Paid individual plan.
    Pro,
    /// Team plan.
    Business,
    /// Negotiated contract plan.
    Enterprise,
}

impl PlanTier {
    /// All tiers, lowest first.
    pub const ALL: [PlanTier; 4] = [Self::Free, Self::Pro, Self::Business, Self::Enterprise];

    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Business => "business",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a tier string is not one of the four known values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown plan tier: {0:?}")]
pub struct UnknownPlanTier(pub String);

impl FromStr for PlanTier {
    type Err = UnknownPlanTier;

    /// Parses the exact lowercase wire form. No case folding: the tier is
    /// signed verbatim, so `"Pro"` and `"pro"` are different payloads.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "business" => Ok(Self::Business),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(UnknownPlanTier(other.to_string())),
        }
    }
}
