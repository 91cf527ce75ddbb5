//! Cookie jar carrying the refresh artifact, saved to disk between runs.
//!
//! The server hands out the refresh artifact as an HTTP-only cookie. A CLI
//! run that only finds an expired access token on disk can still refresh as
//! long as the cookie issued at sign-in travels with it.

use std::io::ErrorKind;
use std::path::Path;

use parking_lot::Mutex;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// File name of the saved jar inside the data directory.
pub const COOKIES_FILE: &str = "cookies.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SavedCookie {
    url: String,
    set_cookie: String,
}

/// A [`Jar`] that also remembers the `Set-Cookie` values it was fed, so they
/// can be replayed into a fresh jar by the next run.
#[derive(Default)]
pub struct SessionCookies {
    jar: Jar,
    issued: Mutex<Vec<SavedCookie>>,
}

impl SessionCookies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a jar written by [`save`](Self::save). A missing file is an empty jar.
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        let cookies = Self::new();
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(cookies),
            Err(e) => return Err(e.into()),
        };

        let saved: Vec<SavedCookie> = serde_json::from_slice(&raw)?;
        for entry in saved {
            match Url::parse(&entry.url) {
                Ok(url) => cookies.record(&entry.set_cookie, &url),
                Err(err) => tracing::warn!(%err, url = %entry.url, "skipping saved cookie"),
            }
        }
        Ok(cookies)
    }

    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(&*self.issued.lock())?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, raw).await?;
        Ok(())
    }

    /// Remove a saved jar. Missing is fine.
    pub async fn discard(path: &Path) -> Result<(), StoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn record(&self, set_cookie: &str, url: &Url) {
        self.jar.add_cookie_str(set_cookie, url);

        // Latest value per cookie name wins.
        let name = cookie_name(set_cookie);
        let mut issued = self.issued.lock();
        issued.retain(|saved| cookie_name(&saved.set_cookie) != name);
        issued.push(SavedCookie {
            url: url.to_string(),
            set_cookie: set_cookie.to_string(),
        });
    }
}

impl CookieStore for SessionCookies {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        for header in cookie_headers {
            match header.to_str() {
                Ok(value) => self.record(value, url),
                Err(_) => tracing::debug!(%url, "ignoring non-UTF-8 Set-Cookie"),
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar.cookies(url)
    }
}

fn cookie_name(set_cookie: &str) -> &str {
    let pair = set_cookie.split(';').next().unwrap_or_default();
    pair.split_once('=').map_or(pair, |(name, _)| name).trim()
}
