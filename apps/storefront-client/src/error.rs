use std::sync::Arc;

use reqwest::StatusCode;

/// Failures surfaced by the gateway and the typed API helpers.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No credential was available; the caller must send the user to login.
    #[error("not signed in")]
    Unauthenticated,

    /// A request was rejected with 401 and the refresh attempt failed.
    /// The session has already been torn down.
    #[error("session expired, sign in again")]
    AuthenticationExpired,

    /// No response was received (connection refused, DNS, TLS, timeout).
    #[error("network failure: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    /// A non-2xx response, produced only by the typed helpers in [`crate::api`].
    #[error("request rejected ({status}): {message}")]
    ServerRejected { status: StatusCode, message: String },

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(Arc::new(err))
    }
}

impl GatewayError {
    /// True for the two variants that require a fresh sign-in.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::AuthenticationExpired)
    }
}

/// Failures of the on-disk client state (credential and cookie jar).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("client store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("client store contents unreadable: {0}")]
    Format(#[from] serde_json::Error),
}
