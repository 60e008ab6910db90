//! Persisted auth session shared with the sync core.
//!
//! Signing in happens in the app shell; this module only defines the session
//! shape and where it is kept so the sync credential resolver can read it.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::unix_timestamp_now;

const EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry (Unix seconds)
    pub expires_at: i64,
    pub user: AuthUser,
}

impl AuthSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_timestamp_now())
    }

    /// Whether the access token is (about to be) expired at `now` (Unix seconds).
    #[must_use]
    pub const fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now + EXPIRY_SKEW_SECONDS
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Session storage failed: {0}")]
    SecureStorage(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid session payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Where the signed-in session lives between app launches.
pub trait SessionPersistence: Clone + Send + Sync + 'static {
    fn load(&self) -> AuthResult<Option<AuthSession>>;
    fn save(&self, session: &AuthSession) -> AuthResult<()>;
    fn clear(&self) -> AuthResult<()>;
}

/// Process-lifetime session store, for tests and shells without secure storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    session: Arc<Mutex<Option<AuthSession>>>,
}

impl MemorySessionStore {
    pub fn with_session(session: AuthSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(Some(session))),
        }
    }

    fn slot(&self) -> AuthResult<std::sync::MutexGuard<'_, Option<AuthSession>>> {
        self.session
            .lock()
            .map_err(|_| AuthError::SecureStorage("session lock poisoned".to_string()))
    }
}

impl SessionPersistence for MemorySessionStore {
    fn load(&self) -> AuthResult<Option<AuthSession>> {
        Ok(self.slot()?.clone())
    }

    fn save(&self, session: &AuthSession) -> AuthResult<()> {
        *self.slot()? = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> AuthResult<()> {
        *self.slot()? = None;
        Ok(())
    }
}

/// Session stored as JSON in the app's private data directory.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionPersistence for FileSessionStore {
    fn load(&self) -> AuthResult<Option<AuthSession>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    fn save(&self, session: &AuthSession) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string(session)?;
        std::fs::write(&self.path, serialized)?;
        Ok(())
    }

    fn clear(&self) -> AuthResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
