//! Signed-in user tracking on top of the gateway.

use foodhub_common::{LoginRequest, TokenResponse, UserProfile};
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::api;
use crate::auth::{AuthGateway, Credential, SessionStatus};
use crate::error::GatewayError;

/// Caches the current user's profile and drives sign-in, sign-out and
/// startup restore. The profile is only reported while the gateway holds a
/// session, so a teardown triggered by a failed refresh hides it at once.
pub struct SessionManager {
    gateway: AuthGateway,
    user: RwLock<Option<UserProfile>>,
}

impl SessionManager {
    pub fn new(gateway: AuthGateway) -> Self {
        Self {
            gateway,
            user: RwLock::new(None),
        }
    }

    /// Exchange email and password for a credential, then load the profile.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserProfile, GatewayError> {
        let resp = self
            .gateway
            .http()
            .post(self.gateway.endpoint("/auth/login"))
            .json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let body: TokenResponse = api::decode(resp).await?;
        let credential = Credential::parse(&body.token).ok_or(GatewayError::Unauthenticated)?;

        self.gateway.login(credential).await;

        match self.fetch_profile().await {
            Ok(user) => {
                tracing::info!(user_id = %user.id, "signed in");
                Ok(user)
            }
            Err(err) => {
                tracing::warn!(%err, "profile fetch failed after sign-in");
                self.sign_out().await;
                Err(err)
            }
        }
    }

    pub async fn sign_out(&self) {
        self.user.write().take();
        self.gateway.logout().await;
    }

    /// Bring back the session persisted by a previous run. Never fails: an
    /// unusable credential ends in the logged-out state with storage cleared.
    pub async fn restore(&self) -> Option<UserProfile> {
        if self.gateway.restore_session().await == SessionStatus::LoggedOut {
            return None;
        }
        match self.fetch_profile().await {
            Ok(user) => Some(user),
            Err(err) => {
                tracing::info!(%err, "persisted session unusable");
                self.sign_out().await;
                None
            }
        }
    }

    /// The cached profile, hidden while the gateway holds no session. The
    /// cache itself is only replaced by sign-in, restore and sign-out.
    pub fn current_user(&self) -> Option<UserProfile> {
        if self.gateway.status() == SessionStatus::LoggedOut {
            return None;
        }
        self.user.read().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.gateway.subscribe()
    }

    pub fn gateway(&self) -> &AuthGateway {
        &self.gateway
    }

    async fn fetch_profile(&self) -> Result<UserProfile, GatewayError> {
        let user: UserProfile = api::get_json(&self.gateway, "/users/me").await?;
        *self.user.write() = Some(user.clone());
        Ok(user)
    }
}
