//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Schema steps in ascending version order. Each step runs in its own
/// transaction together with its `schema_version` row.
const MIGRATIONS: &[(i32, &[&str])] = &[(
    1,
    &[
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // JSON values under well-known keys (collections, deletedRecords, syncStatus)
        "CREATE TABLE IF NOT EXISTS local_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
    ],
)];

/// Schema version after every migration has been applied
const CURRENT_VERSION: i32 = MIGRATIONS[MIGRATIONS.len() - 1].0;

/// Apply every migration newer than the stored schema version
pub async fn run(conn: &Connection) -> Result<()> {
    let applied = get_version(conn).await?;

    for &(version, statements) in MIGRATIONS.iter().filter(|(version, _)| *version > applied) {
        apply(conn, version, statements).await?;
        tracing::info!(version, "Applied local store migration");
    }

    Ok(())
}

/// Stored schema version, `0` for a fresh database
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            (),
        )
        .await?;
    if rows.next().await?.is_none() {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.transaction().await?;
    for statement in statements {
        tx.execute(statement, ()).await?;
    }
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .await?;
    tx.commit().await?;
    Ok(())
}
