//! Database connection management

use crate::error::{Error, Result};
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;
use std::time::Duration;

use super::migrations;

/// Configuration for an embedded replica of a remote database
#[derive(Clone, Default)]
pub struct ReplicaConfig {
    /// Remote database URL (e.g., `libsql://tally-user.turso.io`)
    pub url: Option<String>,
    /// Authentication token for remote database
    pub auth_token: Option<String>,
    /// Automatic pull interval, `None` for manual sync only
    pub sync_interval: Option<Duration>,
}

impl std::fmt::Debug for ReplicaConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ReplicaConfig")
            .field("url", &self.url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("sync_interval", &self.sync_interval)
            .finish()
    }
}

impl ReplicaConfig {
    /// Create a new replica configuration with manual sync
    pub fn new(url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            auth_token: Some(auth_token.into()),
            sync_interval: None,
        }
    }

    /// Set the automatic pull interval
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Check if the replica has everything it needs to connect
    pub const fn is_configured(&self) -> bool {
        self.url.is_some() && self.auth_token.is_some()
    }
}

/// Database wrapper for libSQL connections
pub struct Database {
    db: LibSqlDatabase,
    conn: Connection,
    replicated: bool,
}

impl Database {
    /// Open the local-only device database at the given path, creating it if it doesn't exist
    ///
    /// Runs local schema migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let database = Self::open_unmigrated(path).await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Open an in-memory device database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let database = Self::open_unmigrated(":memory:").await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Open a local database without touching its schema
    pub(crate) async fn open_unmigrated(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self {
            db,
            conn,
            replicated: false,
        };
        database.configure().await?;
        Ok(database)
    }

    /// Open an embedded replica of a remote database
    ///
    /// Reads are served from the local file, writes are forwarded to the remote
    /// primary. The replica pulls once before returning so the caller sees the
    /// remote schema.
    pub(crate) async fn open_replica(
        local_path: impl AsRef<Path>,
        config: &ReplicaConfig,
    ) -> Result<Self> {
        let path_str = local_path.as_ref().to_string_lossy().to_string();

        let url = config
            .url
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("Replica URL is required".into()))?;
        let token = config
            .auth_token
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("Replica auth token is required".into()))?;

        let mut builder = Builder::new_remote_replica(&path_str, url.clone(), token.clone());
        if let Some(interval) = config.sync_interval {
            builder = builder.sync_interval(interval);
            tracing::debug!("Automatic replica sync interval set to {:?}", interval);
        }

        let db = builder.build().await?;
        let conn = db.connect()?;

        let database = Self {
            db,
            conn,
            replicated: true,
        };

        tracing::debug!("Performing initial replica sync...");
        database.sync().await?;
        database.configure().await?;

        Ok(database)
    }

    /// Configure `SQLite` for optimal performance
    async fn configure(&self) -> Result<()> {
        // Some pragmas are rejected by remote replicas
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        Ok(())
    }

    /// Run local schema migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Pull from the remote primary (no-op for local databases)
    pub async fn sync(&self) -> Result<()> {
        if self.replicated {
            self.db.sync().await?;
            tracing::debug!("Replica synced with remote");
        }
        Ok(())
    }

    /// Whether this database is an embedded replica
    pub const fn is_replicated(&self) -> bool {
        self.replicated
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
