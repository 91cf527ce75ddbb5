pub mod error;
pub mod id;
pub mod models;

pub use error::ApiErrorBody;
pub use models::{LoginRequest, Role, TokenResponse, UserProfile};
