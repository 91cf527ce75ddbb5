use std::path::PathBuf;
use std::time::Duration;

/// Storefront client configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// The platform API origin (e.g. `http://localhost:5000/api`).
    pub api_url: String,
    /// Directory holding the persisted access token.
    pub data_dir: PathBuf,
    /// Transport timeout. `None` leaves reqwest's default in place.
    pub request_timeout: Option<Duration>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            api_url: required_var("API_URL").trim_end_matches('/').to_string(),
            data_dir: std::env::var("STOREFRONT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".storefront")),
            request_timeout: std::env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}
