//! Persisted credential from a previous authentication ceremony.
//! `restore()` reads it at startup, `login()` writes it, `logout()` clears it.

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use super::principal::Identity;
use crate::error::AppError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential io error at {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("credential file {path} is corrupt: {source}")]
    Corrupt { path: String, #[source] source: serde_json::Error },
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io { .. } => AppError::internal("credential_io".to_string(), err.to_string()),
            StoreError::Corrupt { .. } => AppError::decode("credential_corrupt".to_string(), err.to_string()),
        }
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<Identity>, StoreError>;
    async fn save(&self, identity: &Identity) -> Result<(), StoreError>;
    async fn clear(&self) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<Identity>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self { Self::default() }
    pub fn with_identity(identity: Identity) -> Self { Self { slot: Mutex::new(Some(identity)) } }
    pub fn peek(&self) -> Option<Identity> { self.slot.lock().clone() }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<Identity>, StoreError> { Ok(self.slot.lock().clone()) }
    async fn save(&self, identity: &Identity) -> Result<(), StoreError> {
        *self.slot.lock() = Some(identity.clone());
        Ok(())
    }
    async fn clear(&self) -> Result<(), StoreError> {
        self.slot.lock().take();
        Ok(())
    }
}

/// JSON file holding a single credential. Missing file means no credential.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self { Self { path: path.into() } }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io { path: self.path.display().to_string(), source }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<Identity>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        let identity: Identity = serde_json::from_slice(&bytes)
            .map_err(|source| StoreError::Corrupt { path: self.path.display().to_string(), source })?;
        debug!(target: "academic_chain::identity", "credential.load principal={}", identity.principal);
        Ok(Some(identity))
    }

    async fn save(&self, identity: &Identity) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| self.io_err(e))?;
            }
        }
        let body = serde_json::to_vec_pretty(identity)
            .map_err(|source| StoreError::Corrupt { path: self.path.display().to_string(), source })?;
        // write-then-rename so a crash never leaves half a credential behind
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(|e| self.io_err(e))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| self.io_err(e))?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }
}
