//! Database migrations

use crate::error::{Error, Result};
use crate::models::ModelKind;
use libsql::Connection;

/// Current local schema version
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending local migrations
///
/// Refuses to touch a store written by a newer build.
pub async fn run(conn: &Connection) -> Result<()> {
    let version = schema_version(conn).await?;

    if version > CURRENT_VERSION {
        return Err(Error::IncompatibleSchema {
            found: version,
            supported: CURRENT_VERSION,
        });
    }

    if version < 1 {
        apply(conn, 1, &local_v1_statements()).await?;
    }
    if version < 2 {
        apply(conn, 2, &local_v2_statements()).await?;
    }

    Ok(())
}

/// Get the schema version recorded in `schema_version` (0 when absent)
pub(crate) async fn schema_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Apply one migration atomically and record its version
///
/// libsql has no `execute_batch`, so statements run one by one inside a transaction.
pub(crate) async fn apply(conn: &Connection, version: i32, statements: &[String]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let record_version = format!("INSERT INTO schema_version (version) VALUES ({version})");
    for stmt in statements.iter().chain(std::iter::once(&record_version)) {
        if let Err(e) = conn.execute(stmt.as_str(), ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Version 1: record tables and the device-local key-value table
fn local_v1_statements() -> Vec<String> {
    let mut statements = vec![
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )"
        .to_string(),
        // Settings table (device local, never synced)
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )"
        .to_string(),
    ];

    for kind in ModelKind::ALL {
        let table = kind.table();
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0
            )"
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_deleted ON {table}(is_deleted)"
        ));
    }

    statements
}

/// Version 2: keyset index for paging records modified since a watermark
fn local_v2_statements() -> Vec<String> {
    ModelKind::ALL
        .into_iter()
        .map(|kind| {
            let table = kind.table();
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_updated_id ON {table}(updated_at, id)")
        })
        .collect()
}
