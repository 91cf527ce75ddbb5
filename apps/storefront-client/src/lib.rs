pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod session;

use std::path::PathBuf;
use std::sync::Arc;

use auth::{AuthGateway, CredentialStore, FileStore, SessionCookies, SessionStatus, COOKIES_FILE};
use config::Config;
use session::SessionManager;

/// Shared client context, built once at startup and cloned into callers.
#[derive(Clone)]
pub struct ClientContext {
    pub config: Arc<Config>,
    pub gateway: AuthGateway,
    pub session: Arc<SessionManager>,
    cookies: Arc<SessionCookies>,
    cookie_path: Option<PathBuf>,
}

impl ClientContext {
    /// Context persisting the credential and the cookie jar under
    /// `config.data_dir`, starting from an empty jar.
    pub fn new(config: Config) -> reqwest::Result<Self> {
        Self::with_cookies(config, SessionCookies::new())
    }

    /// Like [`new`](Self::new), but picks up the cookie jar saved by a
    /// previous run. An unreadable jar is logged and replaced by an empty one.
    pub async fn open(config: Config) -> reqwest::Result<Self> {
        let path = config.data_dir.join(COOKIES_FILE);
        let cookies = match SessionCookies::load(&path).await {
            Ok(cookies) => cookies,
            Err(err) => {
                tracing::warn!(%err, path = %path.display(), "ignoring saved cookies");
                SessionCookies::new()
            }
        };
        Self::with_cookies(config, cookies)
    }

    /// Context with a caller-supplied credential store. Cookies live in memory only.
    pub fn with_store(config: Config, store: Arc<dyn CredentialStore>) -> reqwest::Result<Self> {
        Self::assemble(config, store, Arc::new(SessionCookies::new()), None)
    }

    fn with_cookies(config: Config, cookies: SessionCookies) -> reqwest::Result<Self> {
        let store: Arc<dyn CredentialStore> = Arc::new(FileStore::in_dir(&config.data_dir));
        let cookie_path = config.data_dir.join(COOKIES_FILE);
        Self::assemble(config, store, Arc::new(cookies), Some(cookie_path))
    }

    fn assemble(
        config: Config,
        store: Arc<dyn CredentialStore>,
        cookies: Arc<SessionCookies>,
        cookie_path: Option<PathBuf>,
    ) -> reqwest::Result<Self> {
        let http = build_http_client(&config, cookies.clone())?;
        let gateway = AuthGateway::new(&config.api_url, http, store);
        let session = Arc::new(SessionManager::new(gateway.clone()));
        Ok(Self {
            config: Arc::new(config),
            gateway,
            session,
            cookies,
            cookie_path,
        })
    }

    /// Write the cookie jar next to the credential while a session is held,
    /// and remove it otherwise. Failures are logged.
    pub async fn save_cookies(&self) {
        let Some(path) = &self.cookie_path else {
            return;
        };
        let result = if self.gateway.status() == SessionStatus::Authenticated {
            self.cookies.save(path).await
        } else {
            SessionCookies::discard(path).await
        };
        if let Err(err) = result {
            tracing::warn!(%err, path = %path.display(), "could not update saved cookies");
        }
    }
}

/// The shared HTTP client. `cookies` carries the refresh artifact.
pub fn build_http_client(
    config: &Config,
    cookies: Arc<SessionCookies>,
) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .cookie_provider(cookies)
        .user_agent(concat!("storefront-client/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = config.request_timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}
