//! Opening an authenticated session on the user's partition.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::credentials::Credentials;
use super::remote::{PartitionKey, RemoteStore, SyncSession};
use super::token::{SyncAuthError, SyncTokenClient};
use crate::config::SyncConfig;
use crate::db::ReplicaConfig;

#[derive(Debug, Error)]
pub enum RemoteSessionError {
    #[error("Sync token exchange failed: {0}")]
    TokenExchange(#[from] SyncAuthError),
    #[error("Sync token response did not include a database URL")]
    MissingDatabaseUrl,
    #[error("Sync config is missing '{0}'")]
    MissingConfig(&'static str),
    #[error("Remote store unavailable: {0}")]
    Store(#[from] crate::Error),
}

/// Turns credentials into a live [`SyncSession`].
///
/// A failed `connect` leaves nothing behind; calling it again is always safe.
#[allow(async_fn_in_trait)]
pub trait RemoteConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<SyncSession, RemoteSessionError>;
}

/// Production connector: token exchange, then an embedded replica per partition.
#[derive(Clone)]
pub struct ManagedRemoteConnector {
    token_client: SyncTokenClient,
    replica_dir: PathBuf,
    sync_interval: Option<Duration>,
}

impl ManagedRemoteConnector {
    pub fn new(token_client: SyncTokenClient, replica_dir: impl Into<PathBuf>) -> Self {
        Self {
            token_client,
            replica_dir: replica_dir.into(),
            sync_interval: None,
        }
    }

    /// Build from the token endpoint and replica directory in `config`.
    pub fn from_config(config: &SyncConfig) -> Result<Self, RemoteSessionError> {
        let endpoint = config
            .sync_token_endpoint
            .as_deref()
            .ok_or(RemoteSessionError::MissingConfig("sync_token_endpoint"))?;
        let replica_dir = config
            .replica_dir
            .clone()
            .ok_or(RemoteSessionError::MissingConfig("replica_dir"))?;
        Ok(Self::new(SyncTokenClient::new(endpoint)?, replica_dir))
    }

    /// Let libsql pull from the primary in the background at this interval.
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Replica file for a partition.
    pub fn replica_path(&self, partition_key: &PartitionKey) -> PathBuf {
        self.replica_dir
            .join(format!("{}.db", partition_key.file_stem()))
    }
}

impl RemoteConnector for ManagedRemoteConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<SyncSession, RemoteSessionError> {
        let partition_key = PartitionKey::for_user(&credentials.user)?;

        let token = self
            .token_client
            .exchange_token(&credentials.access_token)
            .await?;
        let database_url = token
            .database_url
            .clone()
            .ok_or(RemoteSessionError::MissingDatabaseUrl)?;

        let mut replica = ReplicaConfig::new(database_url, token.token);
        if let Some(interval) = self.sync_interval {
            replica = replica.with_sync_interval(interval);
        }

        let path = self.replica_path(&partition_key);
        let store = RemoteStore::open_replica(&path, &replica).await?;
        let session = SyncSession::new(credentials.user.clone(), store)?;

        tracing::info!(
            "Opened remote session for partition {} at {}",
            session.partition_key(),
            path.display()
        );
        Ok(session)
    }
}
