//! Redacting wrapper for signing keys.

use std::fmt;

/// The HMAC key shared between the UI-owning and API-owning services.
///
/// `Debug` and `Display` always print `[REDACTED]`; the key bytes are only
/// reachable through [`expose_secret`](Self::expose_secret). The type is
/// deliberately not `Clone`; share it behind an `Arc`.
///
/// ```
/// use formwork_core::SharedSecret;
///
/// let secret = SharedSecret::new("a-very-long-shared-signing-secret");
/// assert_eq!(format!("{secret:?}"), "[REDACTED]");
/// assert_eq!(secret.expose_secret(), b"a-very-long-shared-signing-secret");
/// ```
pub struct SharedSecret {
    inner: Vec<u8>,
}

impl SharedSecret {
    /// Wraps raw key material.
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: value.into(),
        }
    }

    /// Returns the key bytes.
    ///
    /// Never log or format the returned slice.
    pub fn expose_secret(&self) -> &[u8] {
        &self.inner
    }

    /// Length of the key in bytes.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` for an empty key.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SharedSecret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SharedSecret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
