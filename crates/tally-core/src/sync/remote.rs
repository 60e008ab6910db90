//! Partition-scoped remote store and the live session bound to it.

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use libsql::{params, Connection};
use tokio::sync::Mutex;

use crate::auth::AuthUser;
use crate::db::{migrations, parse_record, Database, ReplicaConfig};
use crate::models::{Model, ModelKind, Origin, Record, RecordId, SyncConflict};
use crate::{Error, Result};

/// Current remote schema version
const REMOTE_SCHEMA_VERSION: i32 = 1;

const LWW_STRATEGY: &str = "lww";

/// Per-user value scoping a shared remote store to that user's data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Derive the partition for a user from their stable id.
    pub fn for_user(user: &AuthUser) -> Result<Self> {
        let id = user.id.trim();
        if id.is_empty() {
            return Err(Error::InvalidInput(
                "user id is required to derive a partition".to_string(),
            ));
        }
        Ok(Self(format!("user={id}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form, used to name the partition's replica file.
    pub fn file_stem(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of applying one record remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The remote row now holds the incoming values
    Applied,
    /// The remote row was newer; the incoming write was logged and dropped
    Stale { existing_updated_at: i64 },
}

/// Handle to the remote-backed store.
///
/// Either an embedded replica of the user's partition database or, for tests and
/// demos, an in-memory database with the same schema.
#[derive(Clone)]
pub struct RemoteStore {
    db: Arc<Mutex<Database>>,
}

impl RemoteStore {
    /// Open an embedded replica at `local_path` and bring the remote schema up to date.
    pub async fn open_replica(local_path: impl AsRef<Path>, config: &ReplicaConfig) -> Result<Self> {
        let local_path = local_path.as_ref();
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open_replica(local_path, config).await?;
        migrate(db.connection()).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open an in-memory remote store.
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_unmigrated(":memory:").await?;
        migrate(db.connection()).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Push/pull outstanding replica frames (no-op in memory).
    pub async fn flush(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.sync().await
    }

    pub async fn is_replicated(&self) -> bool {
        let db = self.db.lock().await;
        db.is_replicated()
    }

    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<u64> {
        let db = self.db.lock().await;
        Ok(db.connection().execute(sql, ()).await?)
    }
}

/// Live, authenticated connection to one partition of the remote store.
///
/// Dropping the last clone releases the underlying store.
#[derive(Clone)]
pub struct SyncSession {
    user: AuthUser,
    partition_key: PartitionKey,
    store: RemoteStore,
}

impl fmt::Debug for SyncSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncSession")
            .field("user", &self.user)
            .field("partition_key", &self.partition_key)
            .finish_non_exhaustive()
    }
}

impl SyncSession {
    /// Bind `store` to the partition derived from `user`.
    pub fn new(user: AuthUser, store: RemoteStore) -> Result<Self> {
        let partition_key = PartitionKey::for_user(&user)?;
        Ok(Self {
            user,
            partition_key,
            store,
        })
    }

    pub const fn user(&self) -> &AuthUser {
        &self.user
    }

    pub const fn partition_key(&self) -> &PartitionKey {
        &self.partition_key
    }

    pub const fn store(&self) -> &RemoteStore {
        &self.store
    }

    /// Insert or update `record` keyed by its id, last write (by `updated_at`) wins.
    ///
    /// Re-applying the same record is a no-op apart from returning `Applied`.
    pub async fn upsert<T: Model>(&self, record: &Record<T>) -> Result<UpsertOutcome> {
        let table = T::KIND.table();
        let payload = serde_json::to_string(&record.data)?;
        let id = record.id.as_str();

        let db = self.store.db.lock().await;
        let conn = db.connection();
        let changed = conn
            .execute(
                &format!(
                    "INSERT INTO {table}
                        (partition_key, id, payload, created_at, updated_at, is_deleted)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(partition_key, id) DO UPDATE SET
                        payload = excluded.payload,
                        updated_at = excluded.updated_at,
                        is_deleted = excluded.is_deleted
                     WHERE excluded.updated_at >= {table}.updated_at"
                ),
                params![
                    self.partition_key.as_str(),
                    id.clone(),
                    payload,
                    record.created_at,
                    record.updated_at,
                    i32::from(record.is_deleted)
                ],
            )
            .await?;

        if changed > 0 {
            return Ok(UpsertOutcome::Applied);
        }

        let existing_updated_at = self.current_updated_at(conn, T::KIND, &id).await?;
        conn.execute(
            "INSERT INTO sync_conflicts
                (partition_key, kind, record_id, existing_updated_at, incoming_updated_at, resolved_at, strategy)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.partition_key.as_str(),
                T::KIND.as_str(),
                id.clone(),
                existing_updated_at,
                record.updated_at,
                chrono::Utc::now().timestamp_millis(),
                LWW_STRATEGY
            ],
        )
        .await?;

        tracing::warn!(
            "Kept newer remote {} {} ({} > {})",
            T::KIND,
            id,
            existing_updated_at,
            record.updated_at
        );
        Ok(UpsertOutcome::Stale {
            existing_updated_at,
        })
    }

    /// Fetch a record from this partition (tombstones included).
    pub async fn get<T: Model>(&self, id: &RecordId) -> Result<Option<Record<T>>> {
        let table = T::KIND.table();
        let db = self.store.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                &format!(
                    "SELECT id, payload, created_at, updated_at, is_deleted FROM {table}
                     WHERE partition_key = ?1 AND id = ?2"
                ),
                params![self.partition_key.as_str(), id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_record(&row, Origin::Synced)?)),
            None => Ok(None),
        }
    }

    /// List live records of this partition, most recently updated first.
    pub async fn list<T: Model>(&self, limit: usize) -> Result<Vec<Record<T>>> {
        let table = T::KIND.table();
        let db = self.store.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                &format!(
                    "SELECT id, payload, created_at, updated_at, is_deleted FROM {table}
                     WHERE partition_key = ?1 AND is_deleted = 0
                     ORDER BY updated_at DESC
                     LIMIT ?2"
                ),
                params![self.partition_key.as_str(), limit as i64],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(parse_record(&row, Origin::Synced)?);
        }
        Ok(records)
    }

    /// Count rows of `kind` in this partition, tombstones included.
    pub async fn count(&self, kind: ModelKind) -> Result<u64> {
        let table = kind.table();
        let db = self.store.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                &format!("SELECT COUNT(*) FROM {table} WHERE partition_key = ?1"),
                params![self.partition_key.as_str()],
            )
            .await?;

        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Recently resolved write conflicts for this partition, newest first.
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let db = self.store.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT id, kind, record_id, existing_updated_at, incoming_updated_at, resolved_at, strategy
                 FROM sync_conflicts
                 WHERE partition_key = ?1
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?2",
                params![self.partition_key.as_str(), limit as i64],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            let kind: String = row.get(1)?;
            conflicts.push(SyncConflict {
                id: row.get(0)?,
                kind: kind.parse().map_err(Error::Database)?,
                record_id: row.get(2)?,
                existing_updated_at: row.get(3)?,
                incoming_updated_at: row.get(4)?,
                resolved_at: row.get(5)?,
                strategy: row.get(6)?,
            });
        }
        Ok(conflicts)
    }

    async fn current_updated_at(&self, conn: &Connection, kind: ModelKind, id: &str) -> Result<i64> {
        let table = kind.table();
        let mut rows = conn
            .query(
                &format!("SELECT updated_at FROM {table} WHERE partition_key = ?1 AND id = ?2"),
                params![self.partition_key.as_str(), id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Err(Error::NotFound(format!("{kind} {id}"))),
        }
    }
}

/// Bring a remote store's schema up to date.
async fn migrate(conn: &Connection) -> Result<()> {
    let version = migrations::schema_version(conn).await?;
    if version > REMOTE_SCHEMA_VERSION {
        return Err(Error::IncompatibleSchema {
            found: version,
            supported: REMOTE_SCHEMA_VERSION,
        });
    }
    if version < 1 {
        migrations::apply(conn, 1, &remote_v1_statements()).await?;
    }
    Ok(())
}

fn remote_v1_statements() -> Vec<String> {
    let mut statements = vec![
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )"
        .to_string(),
        "CREATE TABLE IF NOT EXISTS sync_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            partition_key TEXT NOT NULL,
            kind TEXT NOT NULL,
            record_id TEXT NOT NULL,
            existing_updated_at INTEGER NOT NULL,
            incoming_updated_at INTEGER NOT NULL,
            resolved_at INTEGER NOT NULL,
            strategy TEXT NOT NULL
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_partition
            ON sync_conflicts(partition_key, resolved_at DESC)"
            .to_string(),
    ];
    statements.extend(ModelKind::ALL.into_iter().map(remote_table_statement));
    statements
}

pub(crate) fn remote_table_statement(kind: ModelKind) -> String {
    let table = kind.table();
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            partition_key TEXT NOT NULL,
            id TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (partition_key, id)
        )"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Customer;
    use pretty_assertions::assert_eq;

    fn user(id: &str) -> AuthUser {
        AuthUser {
            id: id.to_string(),
            email: None,
        }
    }

    async fn session(user_id: &str, store: &RemoteStore) -> SyncSession {
        SyncSession::new(user(user_id), store.clone()).unwrap()
    }

    #[test]
    fn partition_key_is_derived_from_user_id() {
        let key = PartitionKey::for_user(&user(" 42 ")).unwrap();
        assert_eq!(key.as_str(), "user=42");
        assert_eq!(key.file_stem(), "user_42");
        assert!(PartitionKey::for_user(&user("  ")).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_twice_leaves_one_row_with_latest_values() {
        let store = RemoteStore::open_in_memory().await.unwrap();
        let session = session("u1", &store).await;

        let mut record = Record::at(Customer::new("Ada"), 1_000);
        assert_eq!(session.upsert(&record).await.unwrap(), UpsertOutcome::Applied);
        record.data.name = "Ada Lovelace".to_string();
        record.updated_at = 2_000;
        assert_eq!(session.upsert(&record).await.unwrap(), UpsertOutcome::Applied);
        assert_eq!(session.upsert(&record).await.unwrap(), UpsertOutcome::Applied);

        assert_eq!(session.count(ModelKind::Customers).await.unwrap(), 1);
        let stored = session.get::<Customer>(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.data.name, "Ada Lovelace");
        assert_eq!(stored.updated_at, 2_000);
        assert_eq!(stored.origin, Origin::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn older_write_is_logged_as_conflict() {
        let store = RemoteStore::open_in_memory().await.unwrap();
        let session = session("u1", &store).await;

        let mut record = Record::at(Customer::new("Newer"), 5_000);
        session.upsert(&record).await.unwrap();
        record.data.name = "Older".to_string();
        record.updated_at = 3_000;

        let outcome = session.upsert(&record).await.unwrap();
        assert_eq!(
            outcome,
            UpsertOutcome::Stale {
                existing_updated_at: 5_000
            }
        );

        let stored = session.get::<Customer>(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.data.name, "Newer");

        let conflicts = session.list_conflicts(10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ModelKind::Customers);
        assert_eq!(conflicts[0].record_id, record.id.as_str());
        assert_eq!(conflicts[0].existing_updated_at, 5_000);
        assert_eq!(conflicts[0].incoming_updated_at, 3_000);
        assert_eq!(conflicts[0].strategy, "lww");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn partitions_do_not_see_each_other() {
        let store = RemoteStore::open_in_memory().await.unwrap();
        let alice = session("alice", &store).await;
        let bob = session("bob", &store).await;

        let record = Record::at(Customer::new("Shared id"), 1_000);
        alice.upsert(&record).await.unwrap();

        assert!(bob.get::<Customer>(&record.id).await.unwrap().is_none());
        assert_eq!(bob.count(ModelKind::Customers).await.unwrap(), 0);
        assert_eq!(alice.list::<Customer>(10).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_store_flush_is_a_no_op() {
        let store = RemoteStore::open_in_memory().await.unwrap();
        assert!(!store.is_replicated().await);
        store.flush().await.unwrap();
    }
}
