//! Record repository implementation for the device-local store

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use crate::error::{Error, Result};
use crate::models::{Model, ModelKind, Origin, Record, RecordId};
use libsql::{params, Connection, Row};

const RECORD_COLUMNS: &str = "id, payload, created_at, updated_at, is_deleted";

/// Position after the last record returned by a keyset page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    /// `updated_at` of the last record seen
    pub updated_at: i64,
    /// Id of the last record seen, ties on `updated_at` are ordered by id
    pub id: String,
}

/// Trait for record storage operations (async)
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    /// Insert a new record for the given payload
    async fn create<T: Model>(&self, data: T) -> Result<Record<T>>;

    /// Insert or replace a record by id, keeping its timestamps
    async fn write<T: Model>(&self, record: &Record<T>) -> Result<()>;

    /// Get a record by ID (excluding deleted)
    async fn get<T: Model>(&self, id: &RecordId) -> Result<Option<Record<T>>>;

    /// List records (excluding deleted), most recently updated first
    async fn list<T: Model>(&self, limit: usize, offset: usize) -> Result<Vec<Record<T>>>;

    /// Replace a record's payload, moving `updated_at` strictly forward
    async fn update<T: Model>(&self, id: &RecordId, data: T) -> Result<Record<T>>;

    /// Soft delete a record so the tombstone can be merged
    async fn delete<T: Model>(&self, id: &RecordId) -> Result<()>;

    /// One keyset page of records with `updated_at > since`, oldest first
    async fn modified_page<T: Model>(
        &self,
        since: i64,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Vec<Record<T>>>;

    /// Delete one version of a record; a row rewritten since is left alone
    async fn purge_version(&self, kind: ModelKind, id: &RecordId, updated_at: i64) -> Result<u64>;
}

/// libSQL implementation of `RecordRepository`
pub struct LibSqlRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn collect<T: Model>(mut rows: libsql::Rows) -> Result<Vec<Record<T>>> {
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(parse_record(&row, Origin::Local)?);
        }
        Ok(records)
    }
}

impl RecordRepository for LibSqlRecordRepository<'_> {
    async fn create<T: Model>(&self, data: T) -> Result<Record<T>> {
        let record = Record::new(data);
        self.write(&record).await?;
        Ok(record)
    }

    async fn write<T: Model>(&self, record: &Record<T>) -> Result<()> {
        let table = T::KIND.table();
        let payload = serde_json::to_string(&record.data)?;

        self.conn
            .execute(
                &format!(
                    "INSERT INTO {table} ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO UPDATE SET
                        payload = excluded.payload,
                        updated_at = excluded.updated_at,
                        is_deleted = excluded.is_deleted"
                ),
                params![
                    record.id.as_str(),
                    payload,
                    record.created_at,
                    record.updated_at,
                    i32::from(record.is_deleted)
                ],
            )
            .await?;

        Ok(())
    }

    async fn get<T: Model>(&self, id: &RecordId) -> Result<Option<Record<T>>> {
        let table = T::KIND.table();
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM {table} WHERE id = ? AND is_deleted = 0"),
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_record(&row, Origin::Local)?)),
            None => Ok(None),
        }
    }

    async fn list<T: Model>(&self, limit: usize, offset: usize) -> Result<Vec<Record<T>>> {
        let table = T::KIND.table();
        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM {table}
                     WHERE is_deleted = 0
                     ORDER BY updated_at DESC
                     LIMIT ? OFFSET ?"
                ),
                params![limit as i64, offset as i64],
            )
            .await?;

        Self::collect(rows).await
    }

    async fn update<T: Model>(&self, id: &RecordId, data: T) -> Result<Record<T>> {
        let table = T::KIND.table();
        let now = chrono::Utc::now().timestamp_millis();
        let payload = serde_json::to_string(&data)?;

        let changed = self
            .conn
            .execute(
                &format!(
                    "UPDATE {table} SET payload = ?1, updated_at = MAX(?2, updated_at + 1)
                     WHERE id = ?3 AND is_deleted = 0"
                ),
                params![payload, now, id.as_str()],
            )
            .await?;

        if changed == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn delete<T: Model>(&self, id: &RecordId) -> Result<()> {
        let table = T::KIND.table();
        let now = chrono::Utc::now().timestamp_millis();

        let changed = self
            .conn
            .execute(
                &format!(
                    "UPDATE {table} SET is_deleted = 1, updated_at = MAX(?1, updated_at + 1)
                     WHERE id = ?2 AND is_deleted = 0"
                ),
                params![now, id.as_str()],
            )
            .await?;

        if changed == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn modified_page<T: Model>(
        &self,
        since: i64,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Vec<Record<T>>> {
        let table = T::KIND.table();
        let (after_updated_at, after_id) =
            after.map_or((since, String::new()), |cursor| (cursor.updated_at, cursor.id.clone()));

        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM {table}
                     WHERE updated_at > ?1
                       AND (updated_at > ?2 OR (updated_at = ?2 AND id > ?3))
                     ORDER BY updated_at ASC, id ASC
                     LIMIT ?4"
                ),
                params![since, after_updated_at, after_id, limit as i64],
            )
            .await?;

        Self::collect(rows).await
    }

    async fn purge_version(&self, kind: ModelKind, id: &RecordId, updated_at: i64) -> Result<u64> {
        let table = kind.table();
        let removed = self
            .conn
            .execute(
                &format!("DELETE FROM {table} WHERE id = ?1 AND updated_at = ?2"),
                params![id.as_str(), updated_at],
            )
            .await?;
        Ok(removed)
    }
}

/// Parse a record from a row selected with the shared record column order
///
/// Remote selects return the same leading columns, so both stores share this.
pub(crate) fn parse_record<T: Model>(row: &Row, origin: Origin) -> Result<Record<T>> {
    let id: String = row.get(0)?;
    let payload: String = row.get(1)?;
    Ok(Record {
        id: id
            .parse()
            .map_err(|_| Error::Database(format!("Invalid record id in {}: {id}", T::KIND)))?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
        is_deleted: row.get::<i32>(4)? != 0,
        origin,
        data: serde_json::from_str(&payload)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Customer, Product};
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_and_get() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let created = repo.create(Customer::new("Ada")).await.unwrap();
        let fetched = repo.get::<Customer>(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.origin, Origin::Local);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_write_is_an_upsert() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let mut record = Record::at(Customer::new("Ada"), 1_000);
        repo.write(&record).await.unwrap();
        record.data.name = "Ada Lovelace".to_string();
        record.updated_at = 2_000;
        repo.write(&record).await.unwrap();

        let all = repo.list::<Customer>(10, 0).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].data.name, "Ada Lovelace");
        assert_eq!(all[0].created_at, 1_000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_moves_updated_at_forward() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let far_future = chrono::Utc::now().timestamp_millis() + 60_000;
        let record = Record::at(Customer::new("Ada"), far_future);
        repo.write(&record).await.unwrap();

        let updated = repo
            .update(&record.id, Customer::new("Grace"))
            .await
            .unwrap();
        assert_eq!(updated.data.name, "Grace");
        assert_eq!(updated.updated_at, far_future + 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_missing_record() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let result = repo.update(&RecordId::new(), Customer::new("Nobody")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_leaves_tombstone_for_sync() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let record = Record::at(Customer::new("Ada"), 1_000);
        repo.write(&record).await.unwrap();
        repo.delete::<Customer>(&record.id).await.unwrap();

        assert!(repo.get::<Customer>(&record.id).await.unwrap().is_none());
        let modified = repo.modified_page::<Customer>(1_000, None, 10).await.unwrap();
        assert_eq!(modified.len(), 1);
        assert!(modified[0].is_deleted);
        assert!(repo.delete::<Customer>(&record.id).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_modified_page_is_strictly_after_watermark_and_pages() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        for (name, at) in [("old", 100), ("a", 200), ("b", 200), ("c", 300)] {
            repo.write(&Record::at(Customer::new(name), at)).await.unwrap();
        }

        let first = repo.modified_page::<Customer>(100, None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|record| record.updated_at == 200));

        let last = first.last().unwrap();
        let cursor = PageCursor {
            updated_at: last.updated_at,
            id: last.id.as_str(),
        };
        let second = repo
            .modified_page::<Customer>(100, Some(&cursor), 2)
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].data.name, "c");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_purge_version_matches_id_and_timestamp() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let merged = Record::at(Customer::new("merged"), 100);
        let rewritten = Record::at(Customer::new("rewritten"), 100);
        repo.write(&merged).await.unwrap();
        repo.write(&Record {
            updated_at: 250,
            ..rewritten.clone()
        })
        .await
        .unwrap();
        let product = Record {
            id: merged.id,
            ..Record::at(
                Product {
                    name: "Soap".to_string(),
                    price: 150,
                    ..Product::default()
                },
                100,
            )
        };
        repo.write(&product).await.unwrap();

        let removed = repo
            .purge_version(ModelKind::Customers, &merged.id, 100)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let removed = repo
            .purge_version(ModelKind::Customers, &rewritten.id, 100)
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let customers = repo.list::<Customer>(10, 0).await.unwrap();
        assert_eq!(customers.len(), 1);
        assert_eq!(customers[0].data.name, "rewritten");
        assert_eq!(repo.list::<Product>(10, 0).await.unwrap().len(), 1);
    }
}
