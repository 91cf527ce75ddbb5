//! The short-lived bearer token attached to every API call.

use std::fmt;
use std::sync::Arc;

/// An opaque bearer token. Expiry is decided by the server, never inspected here.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Arc<str>);

impl Credential {
    /// Parse a raw token, returning `None` for values that cannot be sent as
    /// `Authorization: Bearer <token>`. Malformed values count as absent.
    pub fn parse(raw: &str) -> Option<Self> {
        let token = raw.trim();
        if token.is_empty() {
            return None;
        }
        if !token.bytes().all(|b| b.is_ascii_graphic()) {
            return None;
        }
        Some(Self(Arc::from(token)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}
