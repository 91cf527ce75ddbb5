//! Authenticated request gateway.
//!
//! Every API call goes through [`AuthGateway::request`], which attaches the
//! current bearer credential. A 401 triggers a credential refresh followed by
//! exactly one retry. Refreshes are single-flight: concurrent callers that hit
//! a 401 together await the same shared refresh future instead of each calling
//! `/auth/refresh`.

use std::sync::Arc;

use foodhub_common::id::{prefix, prefixed_ulid};
use foodhub_common::TokenResponse;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use tokio::sync::{watch, Mutex as AsyncMutex};

use crate::auth::credential::Credential;
use crate::auth::store::CredentialStore;
use crate::error::GatewayError;

/// Correlation header carried by the first attempt and its retry.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Read-only projection of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    LoggedOut,
    Authenticated,
}

/// Everything about a call except its credential. The retry is rebuilt from
/// the same options, so it is identical to the first attempt.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Option<RequestBody>,
}

#[derive(Debug, Clone)]
enum RequestBody {
    Json(serde_json::Value),
    Text(String),
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }
}

/// Result of one `/auth/refresh` round-trip, shared by every joined caller.
#[derive(Debug, Clone)]
enum RefreshOutcome {
    Renewed(Credential),
    Rejected,
    Unreachable(Arc<reqwest::Error>),
}

impl RefreshOutcome {
    fn into_result(self) -> Result<Option<Credential>, GatewayError> {
        match self {
            RefreshOutcome::Renewed(credential) => Ok(Some(credential)),
            RefreshOutcome::Rejected => Ok(None),
            RefreshOutcome::Unreachable(err) => Err(GatewayError::Network(err)),
        }
    }
}

type RefreshFuture = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Outcome of the first attempt of a call.
enum Step {
    Done(Response),
    Retrying(Credential),
    Failed(GatewayError),
}

struct Call<'a> {
    method: &'a Method,
    url: String,
    options: &'a RequestOptions,
    request_id: String,
}

/// Handle to the gateway. Clone it into every caller; all clones share one
/// credential and one refresh slot.
#[derive(Clone)]
pub struct AuthGateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    base_url: String,
    http: reqwest::Client,
    store: Arc<dyn CredentialStore>,
    credential: RwLock<Option<Credential>>,
    in_flight: Mutex<Option<RefreshFuture>>,
    /// Held across every session transition so memory, status and storage
    /// change together.
    transition: AsyncMutex<()>,
    status: watch::Sender<SessionStatus>,
}

impl AuthGateway {
    pub fn new(base_url: &str, http: reqwest::Client, store: Arc<dyn CredentialStore>) -> Self {
        let (status, _) = watch::channel(SessionStatus::LoggedOut);
        Self {
            inner: Arc::new(GatewayInner {
                base_url: base_url.trim_end_matches('/').to_string(),
                http,
                store,
                credential: RwLock::new(None),
                in_flight: Mutex::new(None),
                transition: AsyncMutex::new(()),
                status,
            }),
        }
    }

    /// Send an authenticated request.
    ///
    /// Non-401 responses are returned as-is, whatever their status. A 401 is
    /// answered by a refresh and a single retry; if the retry is also a 401
    /// that response is returned unmodified.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<Response, GatewayError> {
        let call = Call {
            method: &method,
            url: self.endpoint(path),
            options: &options,
            request_id: prefixed_ulid(prefix::REQUEST),
        };

        let Some(credential) = self.active_credential().await else {
            tracing::debug!(request_id = %call.request_id, url = %call.url, "no credential, request refused");
            self.inner.clear_local().await;
            return Err(GatewayError::Unauthenticated);
        };

        match self.first_pass(&call, &credential).await {
            Step::Done(resp) => Ok(resp),
            Step::Failed(err) => Err(err),
            Step::Retrying(fresh) => {
                tracing::debug!(request_id = %call.request_id, "retrying with renewed credential");
                Ok(self.send(&call, &fresh).await?)
            }
        }
    }

    /// Obtain a new credential from `/auth/refresh`.
    ///
    /// Returns `Ok(None)` when the server rejected the refresh; the session has
    /// been torn down by then. A refresh already in flight is joined rather
    /// than duplicated. If the session was ended or replaced while the refresh
    /// was in flight, its result is discarded and the session's current
    /// credential is reported instead.
    pub async fn refresh(&self) -> Result<Option<Credential>, GatewayError> {
        let pending = self.join_or_start(&mut self.inner.in_flight.lock());
        pending.await.into_result()
    }

    /// Install a credential obtained from a successful sign-in. No network.
    pub async fn login(&self, credential: Credential) {
        tracing::info!("session established");
        self.inner.install(credential).await;
    }

    /// End the session locally and ask the server to revoke the refresh
    /// artifact. Safe to call when already logged out.
    pub async fn logout(&self) {
        tracing::info!("logging out");
        self.inner.teardown().await;
    }

    /// Adopt the persisted credential at startup, if there is a usable one.
    ///
    /// The credential is not validated here; an expired one is discovered by
    /// the next request and goes through the normal refresh path.
    pub async fn restore_session(&self) -> SessionStatus {
        let _guard = self.inner.transition.lock().await;
        match self.inner.load_persisted().await {
            Some(credential) => {
                tracing::info!("restored persisted session");
                self.inner.adopt(credential);
                SessionStatus::Authenticated
            }
            None => {
                self.inner.forget().await;
                SessionStatus::LoggedOut
            }
        }
    }

    pub fn credential(&self) -> Option<Credential> {
        self.inner.credential.read().clone()
    }

    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Resolve a path against the API base URL. Absolute URLs pass through.
    pub fn endpoint(&self, path: &str) -> String {
        self.inner.endpoint(path)
    }

    /// The underlying HTTP client, for calls that must not carry a credential.
    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    async fn active_credential(&self) -> Option<Credential> {
        let current = self.inner.credential.read().clone();
        if current.is_some() {
            return current;
        }
        let _guard = self.inner.transition.lock().await;
        // A login may have landed while waiting for the lock.
        let current = self.inner.credential.read().clone();
        if current.is_some() {
            return current;
        }
        let persisted = self.inner.load_persisted().await?;
        self.inner.adopt(persisted.clone());
        Some(persisted)
    }

    async fn first_pass(&self, call: &Call<'_>, credential: &Credential) -> Step {
        let resp = match self.send(call, credential).await {
            Ok(resp) => resp,
            Err(err) => return Step::Failed(err.into()),
        };
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Step::Done(resp);
        }

        tracing::debug!(request_id = %call.request_id, "credential rejected");
        match self.renewed_after_rejection(credential).await {
            Ok(fresh) => Step::Retrying(fresh),
            Err(err) => Step::Failed(err),
        }
    }

    /// The credential to retry with after `rejected` drew a 401.
    ///
    /// The check runs under the refresh slot lock. A settled refresh installs
    /// its credential (or clears it) before emptying the slot, so an empty slot
    /// with `rejected` still current means no refresh has covered this 401.
    async fn renewed_after_rejection(
        &self,
        rejected: &Credential,
    ) -> Result<Credential, GatewayError> {
        let pending = {
            let mut slot = self.inner.in_flight.lock();
            let current = self.inner.credential.read().clone();
            match current {
                // The session ended while this request was in flight.
                None => return Err(GatewayError::AuthenticationExpired),
                // Another caller already rotated the credential.
                Some(current) if current != *rejected => return Ok(current),
                Some(_) => self.join_or_start(&mut slot),
            }
        };
        pending
            .await
            .into_result()?
            .ok_or(GatewayError::AuthenticationExpired)
    }

    /// Join the in-flight refresh, or start one. The caller holds the slot lock.
    fn join_or_start(&self, slot: &mut Option<RefreshFuture>) -> RefreshFuture {
        match slot.as_ref() {
            Some(pending) => {
                tracing::debug!("joining in-flight refresh");
                pending.clone()
            }
            None => {
                let pending = Arc::clone(&self.inner).start_refresh();
                *slot = Some(pending.clone());
                pending
            }
        }
    }

    async fn send(&self, call: &Call<'_>, credential: &Credential) -> Result<Response, reqwest::Error> {
        let mut builder = self
            .inner
            .http
            .request(call.method.clone(), &call.url)
            .headers(call.options.headers.clone())
            .header(REQUEST_ID_HEADER, call.request_id.as_str())
            .bearer_auth(credential.as_str());
        if !call.options.query.is_empty() {
            builder = builder.query(&call.options.query);
        }
        builder = match &call.options.body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Text(text)) => builder.body(text.clone()),
            None => builder,
        };

        let resp = builder.send().await.map_err(|e| {
            tracing::debug!(request_id = %call.request_id, ?e, "transport failure");
            e
        })?;
        tracing::debug!(
            request_id = %call.request_id,
            method = %call.method,
            url = %call.url,
            status = %resp.status(),
            "api response"
        );
        Ok(resp)
    }
}

impl GatewayInner {
    fn endpoint(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Build the shared refresh future. It empties the slot itself once it
    /// settles, so the next 401 after that starts a new attempt.
    fn start_refresh(self: Arc<Self>) -> RefreshFuture {
        let subject = self.credential.read().clone();
        async move {
            let outcome = self.perform_refresh(subject).await;
            self.in_flight.lock().take();
            outcome
        }
        .boxed()
        .shared()
    }

    /// Renew `subject`, the credential current when the refresh started. The
    /// result only applies if `subject` is still current once the server has
    /// answered; a logout or login in the meantime wins.
    async fn perform_refresh(&self, subject: Option<Credential>) -> RefreshOutcome {
        let url = self.endpoint("/auth/refresh");
        tracing::info!(%url, "refreshing access credential");

        let resp = match self.http.post(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(?e, "refresh endpoint unreachable");
                return RefreshOutcome::Unreachable(Arc::new(e));
            }
        };

        let renewed = if resp.status().is_success() {
            match resp.json::<TokenResponse>().await {
                Ok(body) => Credential::parse(&body.token),
                Err(e) => {
                    tracing::warn!(?e, "refresh response unreadable");
                    None
                }
            }
        } else {
            tracing::info!(status = %resp.status(), "refresh rejected");
            None
        };

        let guard = self.transition.lock().await;
        let current = self.credential.read().clone();
        if current != subject {
            tracing::info!("session changed during refresh, discarding result");
            return match current {
                Some(credential) => RefreshOutcome::Renewed(credential),
                None => RefreshOutcome::Rejected,
            };
        }

        match renewed {
            Some(credential) => {
                self.adopt(credential.clone());
                self.persist(&credential).await;
                RefreshOutcome::Renewed(credential)
            }
            None => {
                tracing::info!("no usable credential from refresh, ending session");
                self.forget().await;
                drop(guard);
                self.revoke_remote().await;
                RefreshOutcome::Rejected
            }
        }
    }

    async fn load_persisted(&self) -> Option<Credential> {
        let raw = match self.store.load().await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(%err, "could not read persisted credential");
                return None;
            }
        };

        match Credential::parse(&raw) {
            Some(credential) => Some(credential),
            None => {
                tracing::warn!("discarding malformed persisted credential");
                if let Err(err) = self.store.clear().await {
                    tracing::warn!(%err, "could not clear persisted credential");
                }
                None
            }
        }
    }

    /// Take a credential into memory without writing it back to storage.
    /// The caller holds `transition`.
    fn adopt(&self, credential: Credential) {
        *self.credential.write() = Some(credential);
        self.set_status(SessionStatus::Authenticated);
    }

    /// Publish `next`, waking subscribers only on a real transition.
    fn set_status(&self, next: SessionStatus) {
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    async fn persist(&self, credential: &Credential) {
        // Memory stays authoritative if the write fails.
        if let Err(err) = self.store.save(credential.as_str()).await {
            tracing::warn!(%err, "could not persist credential");
        }
    }

    /// Drop the credential from memory and storage. The caller holds
    /// `transition`.
    async fn forget(&self) {
        self.credential.write().take();
        self.set_status(SessionStatus::LoggedOut);
        if let Err(err) = self.store.clear().await {
            tracing::warn!(%err, "could not clear persisted credential");
        }
    }

    async fn install(&self, credential: Credential) {
        let _guard = self.transition.lock().await;
        self.adopt(credential.clone());
        self.persist(&credential).await;
    }

    async fn clear_local(&self) {
        let _guard = self.transition.lock().await;
        self.forget().await;
    }

    async fn teardown(&self) {
        self.clear_local().await;
        self.revoke_remote().await;
    }

    /// Best-effort revocation of the server-side refresh artifact.
    async fn revoke_remote(&self) {
        let url = self.endpoint("/auth/logout");
        match self.http.post(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!("server session revoked");
            }
            Ok(resp) => {
                tracing::debug!(status = %resp.status(), "server logout declined");
            }
            Err(e) => {
                tracing::warn!(?e, "server logout failed");
            }
        }
    }
}
