#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;

use foodhub_common::{ApiErrorBody, LoginRequest, Role, TokenResponse, UserProfile};
use storefront_client::auth::{AuthGateway, CredentialStore, SessionCookies};

/// The only password the mock API accepts.
pub const PASSWORD: &str = "correct-horse";

pub const DEFAULT_EMAIL: &str = "ada@example.com";

const REFRESH_COOKIE: &str = "refresh_token";

/// Mutable state of the mock platform API, shared with the test body.
#[derive(Default)]
pub struct MockState {
    /// Access tokens the API accepts, mapped to the owner's email.
    tokens: Mutex<HashMap<String, String>>,
    /// Refresh cookies issued at login, mapped to the owner's email.
    refresh_cookies: Mutex<HashMap<String, String>>,
    revoked_cookies: Mutex<HashSet<String>>,
    /// `Authorization` headers of requests that passed authentication.
    seen_auth: Mutex<Vec<String>>,
    /// `x-request-id` headers received by `/echo`, including rejected attempts.
    echo_request_ids: Mutex<Vec<String>>,
    refresh_calls: AtomicUsize,
    refresh_with_cookie: AtomicUsize,
    logout_calls: AtomicUsize,
    protected_calls: AtomicUsize,
    always_401_calls: AtomicUsize,
    refresh_fails: AtomicBool,
    refresh_delay_ms: AtomicU64,
    next_id: AtomicUsize,
}

impl MockState {
    fn issue_token(&self, email: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let token = format!("tok_{n}");
        self.tokens.lock().insert(token.clone(), email.to_string());
        token
    }

    /// Check the bearer token, returning the owner's email.
    fn authorize(&self, headers: &HeaderMap) -> Result<String, Response> {
        self.protected_calls.fetch_add(1, Ordering::SeqCst);
        let header = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let owner = header
            .strip_prefix("Bearer ")
            .and_then(|token| self.tokens.lock().get(token).cloned());
        match owner {
            Some(email) => {
                self.seen_auth.lock().push(header);
                Ok(email)
            }
            None => Err(unauthorized("Invalid or expired token")),
        }
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiErrorBody::new("UNAUTHORIZED", message)),
    )
        .into_response()
}

fn refresh_cookie(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == REFRESH_COOKIE).then(|| value.to_string())
    })
}

fn profile_for(email: &str) -> UserProfile {
    UserProfile {
        id: "usr_01".to_string(),
        name: "Ada Lovelace".to_string(),
        email: email.to_string(),
        role: Role::Customer,
        created_at: None,
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<LoginRequest>) -> Response {
    if body.password != PASSWORD {
        return unauthorized("Invalid email or password");
    }
    let token = state.issue_token(&body.email);
    let cookie = format!("rt_{}", state.next_id.fetch_add(1, Ordering::SeqCst));
    state
        .refresh_cookies
        .lock()
        .insert(cookie.clone(), body.email);
    (
        [(SET_COOKIE, format!("{REFRESH_COOKIE}={cookie}; Path=/; HttpOnly"))],
        Json(TokenResponse { token }),
    )
        .into_response()
}

async fn refresh(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let delay = state.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if state.refresh_fails.load(Ordering::SeqCst) {
        return unauthorized("Invalid or expired refresh token");
    }

    let email = match refresh_cookie(&headers) {
        Some(cookie) => {
            state.refresh_with_cookie.fetch_add(1, Ordering::SeqCst);
            if state.revoked_cookies.lock().contains(&cookie) {
                return unauthorized("Refresh token revoked");
            }
            state
                .refresh_cookies
                .lock()
                .get(&cookie)
                .cloned()
                .unwrap_or_else(|| DEFAULT_EMAIL.to_string())
        }
        None => DEFAULT_EMAIL.to_string(),
    };

    let token = state.issue_token(&email);
    Json(TokenResponse { token }).into_response()
}

async fn logout(State(state): State<Arc<MockState>>, headers: HeaderMap) -> StatusCode {
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(cookie) = refresh_cookie(&headers) {
        state.revoked_cookies.lock().insert(cookie);
    }
    StatusCode::NO_CONTENT
}

async fn me(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    match state.authorize(&headers) {
        Ok(email) => Json(profile_for(&email)).into_response(),
        Err(rejection) => rejection,
    }
}

async fn products(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if let Err(rejection) = state.authorize(&headers) {
        return rejection;
    }
    Json(serde_json::json!([
        { "id": "prd_1", "name": "Margherita", "price_cents": 1150 },
        { "id": "prd_2", "name": "Pad Thai", "price_cents": 1390 },
    ]))
    .into_response()
}

async fn always_401(State(state): State<Arc<MockState>>) -> Response {
    state.always_401_calls.fetch_add(1, Ordering::SeqCst);
    unauthorized("Never authorized")
}

async fn boom(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if let Err(rejection) = state.authorize(&headers) {
        return rejection;
    }
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiErrorBody::new("INTERNAL_ERROR", "Kitchen on fire")),
    )
        .into_response()
}

async fn echo(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if let Some(id) = headers.get("x-request-id").and_then(|v| v.to_str().ok()) {
        state.echo_request_ids.lock().push(id.to_string());
    }
    if let Err(rejection) = state.authorize(&headers) {
        return rejection;
    }
    let client = headers
        .get("x-client")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Json(serde_json::json!({
        "query": query,
        "body": body,
        "client": client,
    }))
    .into_response()
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A running mock API bound to an ephemeral local port.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

/// Start the mock API on `127.0.0.1:0`.
pub async fn spawn() -> MockBackend {
    let state = Arc::new(MockState::default());
    let app = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/users/me", get(me))
        .route("/products", get(products))
        .route("/always-401", get(always_401))
        .route("/boom", get(boom))
        .route("/echo", post(echo))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock api");
    let addr = listener.local_addr().expect("mock api addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock api");
    });

    MockBackend { addr, state }
}

/// HTTP client matching the production one, minus any system proxy.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .cookie_store(true)
        .no_proxy()
        .build()
        .expect("http client")
}

/// An address nothing listens on.
pub fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}")
}

impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn gateway(&self, store: Arc<dyn CredentialStore>) -> AuthGateway {
        AuthGateway::new(&self.url(), http_client(), store)
    }

    /// Gateway whose client keeps its cookies in `cookies`, as the CLI does.
    pub fn gateway_with_cookies(
        &self,
        store: Arc<dyn CredentialStore>,
        cookies: Arc<SessionCookies>,
    ) -> AuthGateway {
        let http = reqwest::Client::builder()
            .cookie_provider(cookies)
            .no_proxy()
            .build()
            .expect("http client");
        AuthGateway::new(&self.url(), http, store)
    }

    /// Mint an access token the API accepts, as if issued at login.
    pub fn issue_token(&self) -> String {
        self.state.issue_token(DEFAULT_EMAIL)
    }

    /// Expire every access token; refresh cookies stay valid.
    pub fn expire_access_tokens(&self) {
        self.state.tokens.lock().clear();
    }

    pub fn fail_refresh(&self) {
        self.state.refresh_fails.store(true, Ordering::SeqCst);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.state
            .refresh_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn seen_auth(&self) -> Vec<String> {
        self.state.seen_auth.lock().clone()
    }

    pub fn echo_request_ids(&self) -> Vec<String> {
        self.state.echo_request_ids.lock().clone()
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_with_cookie(&self) -> usize {
        self.state.refresh_with_cookie.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.state.logout_calls.load(Ordering::SeqCst)
    }

    pub fn protected_calls(&self) -> usize {
        self.state.protected_calls.load(Ordering::SeqCst)
    }

    pub fn always_401_calls(&self) -> usize {
        self.state.always_401_calls.load(Ordering::SeqCst)
    }
}
