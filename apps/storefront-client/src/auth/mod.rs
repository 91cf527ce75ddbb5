pub mod cookies;
pub mod credential;
pub mod gateway;
pub mod store;

pub use cookies::{SessionCookies, COOKIES_FILE};
pub use credential::Credential;
pub use gateway::{AuthGateway, RequestOptions, SessionStatus};
pub use store::{CredentialStore, FileStore, MemoryStore};
