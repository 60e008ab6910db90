//! Device-local object store shared by the app and the sync core.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    Database, LibSqlRecordRepository, LibSqlSettingsRepository, PageCursor, RecordRepository,
    SettingsRepository,
};
use crate::models::{Model, ModelKind, Record, RecordId};
use crate::sync::{MergedRecord, Watermark};
use crate::Result;

/// Thread-safe handle to the local store opened before any user identity exists.
///
/// Cloning is cheap; all clones share one connection.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl LocalStore {
    /// Open (or create) the local store at the given filesystem path.
    ///
    /// Fails with [`crate::Error::IncompatibleSchema`] when the file was written by
    /// a newer build.
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        tracing::info!("Opened local store at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory local store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Filesystem path of the store, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Insert a new record for `data`.
    pub async fn insert<T: Model>(&self, data: T) -> Result<Record<T>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.create(data).await
    }

    /// Insert or update a record by id.
    pub async fn write<T: Model>(&self, record: &Record<T>) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.write(record).await
    }

    /// Replace a record's payload.
    pub async fn update<T: Model>(&self, id: &RecordId, data: T) -> Result<Record<T>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.update(id, data).await
    }

    /// Soft-delete a record.
    pub async fn delete<T: Model>(&self, id: &RecordId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.delete::<T>(id).await
    }

    /// Fetch a record by id.
    pub async fn get<T: Model>(&self, id: &RecordId) -> Result<Option<Record<T>>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.get(id).await
    }

    /// List records most recently updated first.
    pub async fn list<T: Model>(&self, limit: usize, offset: usize) -> Result<Vec<Record<T>>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.list(limit, offset).await
    }

    /// Lazily page through records of `T` updated strictly after `since`.
    ///
    /// Each call starts a fresh query, so a cursor taken after a merge only sees
    /// what is still pending.
    pub fn modified_since<T: Model>(&self, since: Watermark, batch_size: usize) -> ModifiedRecords<T> {
        ModifiedRecords {
            store: self.clone(),
            since,
            batch_size: batch_size.max(1),
            after: None,
            exhausted: false,
            _model: PhantomData,
        }
    }

    /// Drop the exact record versions a completed merge pushed.
    ///
    /// Rows written again since the merge read them keep their newer version.
    pub async fn purge_merged(&self, kind: ModelKind, merged: &[MergedRecord]) -> Result<u64> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        let mut removed = 0;
        for record in merged {
            removed += repo
                .purge_version(kind, &record.id, record.updated_at)
                .await?;
        }
        Ok(removed)
    }

    /// Read a device-local setting.
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let repo = LibSqlSettingsRepository::new(db.connection());
        repo.get(key).await
    }

    /// Write a device-local setting.
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlSettingsRepository::new(db.connection());
        repo.set(key, value).await
    }

    /// Move an unusable store file aside so the next open starts fresh.
    ///
    /// This is the "reset local data" action offered when the store cannot be
    /// opened. Sidecar files (`-wal`, `-shm`, `-info`) are removed.
    pub fn quarantine(db_path: &Path) -> Result<Option<PathBuf>> {
        let mut backup = None;
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let base = db_path
                .file_name()
                .map_or_else(|| "tally.db".to_string(), |name| name.to_string_lossy().to_string());
            let backup_path = db_path.with_file_name(format!("{base}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved unusable local store from {} to {}",
                db_path.display(),
                backup_path.display()
            );
            backup = Some(backup_path);
        }

        let Some(parent) = db_path.parent() else {
            return Ok(backup);
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(backup);
        };
        let sidecar_prefix = format!("{base_name}-");

        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale local store file {}", path.display());
            }
        }

        Ok(backup)
    }
}

/// Restartable, lazily paged sequence of records modified after a watermark.
pub struct ModifiedRecords<T> {
    store: LocalStore,
    since: Watermark,
    batch_size: usize,
    after: Option<PageCursor>,
    exhausted: bool,
    _model: PhantomData<fn() -> T>,
}

impl<T: Model> ModifiedRecords<T> {
    /// Next page in `(updated_at, id)` order, `None` once the sequence is done.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Record<T>>>> {
        if self.exhausted {
            return Ok(None);
        }

        let page = {
            let db = self.store.db.lock().await;
            let repo = LibSqlRecordRepository::new(db.connection());
            repo.modified_page::<T>(self.since.as_millis(), self.after.as_ref(), self.batch_size)
                .await?
        };

        if page.len() < self.batch_size {
            self.exhausted = true;
        }
        let Some(last) = page.last() else {
            return Ok(None);
        };
        self.after = Some(PageCursor {
            updated_at: last.updated_at,
            id: last.id.as_str(),
        });

        Ok(Some(page))
    }

    /// Drain the remaining pages into one vector.
    pub async fn collect_all(mut self) -> Result<Vec<Record<T>>> {
        let mut records = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            records.extend(batch);
        }
        Ok(records)
    }
}
