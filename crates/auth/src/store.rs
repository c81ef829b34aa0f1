//! Credential persistence for auth sessions
//!
//! The auth client hands the serialized session JSON to a [`CredentialStore`]
//! and reads it back on startup. Two stores ship with the crate: an in-memory
//! one (the default) and a JSON file on disk.

use crate::AuthError;
use log::debug;
use std::fs;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

/// Save/load/clear capability for the serialized session
pub trait CredentialStore: Send + Sync {
    /// Whether a session is currently stored
    fn has_auth(&self) -> bool;

    /// The stored session JSON, if any
    fn get_auth(&self) -> Result<Option<String>, AuthError>;

    /// Replace the stored session JSON
    fn set_auth(&self, json: &str) -> Result<(), AuthError>;

    /// Forget the stored session
    fn remove_auth(&self) -> Result<(), AuthError>;
}

/// Keeps the session for the lifetime of the process only
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    auth: RwLock<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn has_auth(&self) -> bool {
        self.auth
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn get_auth(&self) -> Result<Option<String>, AuthError> {
        Ok(self
            .auth
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn set_auth(&self, json: &str) -> Result<(), AuthError> {
        *self.auth.write().unwrap_or_else(PoisonError::into_inner) = Some(json.to_string());
        Ok(())
    }

    fn remove_auth(&self) -> Result<(), AuthError> {
        *self.auth.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Stores the session as a JSON file on disk
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the default location.
    /// Uses SUPABASE_AUTH_PATH env var or falls back to the platform data directory.
    pub fn default_location() -> Self {
        let path = std::env::var("SUPABASE_AUTH_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("supabase-rust")
                    .join("auth.json")
            });
        Self::new(path)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn has_auth(&self) -> bool {
        self.path.is_file()
    }

    fn get_auth(&self) -> Result<Option<String>, AuthError> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&self.path)?))
    }

    fn set_auth(&self, json: &str) -> Result<(), AuthError> {
        // 書き込む前に有効なJSONか確認
        serde_json::from_str::<serde_json::Value>(json)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, json)?;
        debug!("Saved auth session to {}", self.path.display());
        Ok(())
    }

    fn remove_auth(&self) -> Result<(), AuthError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
