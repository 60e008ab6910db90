//! Answers "is there a usable remote identity right now?"

use std::fmt;

use crate::auth::{AuthUser, SessionPersistence};
use crate::util::unix_timestamp_now;

/// Bearer token plus the stable identity it belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub user: AuthUser,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .field("user", &self.user)
            .finish()
    }
}

/// Source of remote credentials.
///
/// Absence is an expected outcome (not signed in yet, session expired), never an
/// error. Implementations must not touch the network.
#[allow(async_fn_in_trait)]
pub trait CredentialResolver {
    async fn resolve(&self) -> Option<Credentials>;
}

/// Resolves credentials from the persisted auth session.
#[derive(Clone)]
pub struct StoredSessionResolver<S: SessionPersistence> {
    store: S,
}

impl<S: SessionPersistence> StoredSessionResolver<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: SessionPersistence> CredentialResolver for StoredSessionResolver<S> {
    async fn resolve(&self) -> Option<Credentials> {
        let session = match self.store.load() {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!("Failed to read persisted session: {}", error);
                return None;
            }
        };

        if session.is_expired_at(unix_timestamp_now()) {
            tracing::debug!("Persisted session for {} has expired", session.user.id);
            return None;
        }

        let access_token = session.access_token.trim();
        if access_token.is_empty() || session.user.id.trim().is_empty() {
            return None;
        }

        Some(Credentials {
            access_token: access_token.to_string(),
            user: session.user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthSession, MemorySessionStore};

    fn session(expires_at: i64, access_token: &str) -> AuthSession {
        AuthSession {
            access_token: access_token.to_string(),
            refresh_token: "refresh".to_string(),
            expires_at,
            user: AuthUser {
                id: "user-1".to_string(),
                email: None,
            },
        }
    }

    #[tokio::test]
    async fn missing_session_resolves_to_absent() {
        let resolver = StoredSessionResolver::new(MemorySessionStore::default());
        assert!(resolver.resolve().await.is_none());
    }

    #[tokio::test]
    async fn expired_session_resolves_to_absent() {
        let resolver =
            StoredSessionResolver::new(MemorySessionStore::with_session(session(10, "token")));
        assert!(resolver.resolve().await.is_none());
    }

    #[tokio::test]
    async fn blank_token_resolves_to_absent() {
        let far_future = unix_timestamp_now() + 3_600;
        let resolver =
            StoredSessionResolver::new(MemorySessionStore::with_session(session(far_future, " ")));
        assert!(resolver.resolve().await.is_none());
    }

    #[tokio::test]
    async fn live_session_yields_credentials() {
        let far_future = unix_timestamp_now() + 3_600;
        let resolver = StoredSessionResolver::new(MemorySessionStore::with_session(session(
            far_future, " token ",
        )));

        let credentials = resolver.resolve().await.unwrap();
        assert_eq!(credentials.access_token, "token");
        assert_eq!(credentials.user.id, "user-1");
        assert!(format!("{credentials:?}").contains("[REDACTED]"));
    }
}
