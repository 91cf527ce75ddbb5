use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StoreError;

/// The single well-known key the access token is persisted under.
pub const TOKEN_KEY: &str = "token";

/// Persistent client-side storage for the access token.
///
/// Backed by a file on disk for the CLI and an in-memory map in tests.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>, StoreError>;
    async fn save(&self, token: &str) -> Result<(), StoreError>;
    async fn clear(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests / ephemeral runs)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds a persisted token, as after an app restart.
    pub fn with_token(token: &str) -> Self {
        let store = Self::new();
        store.data.lock().insert(TOKEN_KEY.to_string(), token.to_string());
        store
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self) -> Result<Option<String>, StoreError> {
        Ok(self.data.lock().get(TOKEN_KEY).cloned())
    }

    async fn save(&self, token: &str) -> Result<(), StoreError> {
        self.data.lock().insert(TOKEN_KEY.to_string(), token.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.data.lock().remove(TOKEN_KEY);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File-backed implementation
// ---------------------------------------------------------------------------

/// Stores the token as `<dir>/token`.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(TOKEN_KEY),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn load(&self) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, token: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, token).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
