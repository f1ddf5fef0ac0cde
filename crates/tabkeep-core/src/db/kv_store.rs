//! Durable `LocalStore` on top of the libSQL `local_store` table

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::Connection;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use super::Database;
use crate::error::Result;
use crate::store::{notify, LocalStore, StoreChange, CHANGE_CHANNEL_CAPACITY};
use crate::util::now_millis;

/// libSQL implementation of `LocalStore`
///
/// Values are stored as JSON text. The connection is shared behind a mutex so
/// a multi-key `set` owns the connection for the whole transaction.
pub struct LibSqlLocalStore {
    db: Arc<Mutex<Database>>,
    changes: broadcast::Sender<StoreChange>,
}

impl LibSqlLocalStore {
    pub fn new(db: Database) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            db: Arc::new(Mutex::new(db)),
            changes,
        }
    }

    /// Open (or create) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path).await?))
    }

    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory().await?))
    }
}

async fn read_value(conn: &Connection, key: &str) -> Result<Option<Value>> {
    let mut rows = conn
        .query("SELECT value FROM local_store WHERE key = ?", [key])
        .await?;

    if let Some(row) = rows.next().await? {
        let raw: String = row.get(0)?;
        Ok(Some(serde_json::from_str(&raw)?))
    } else {
        Ok(None)
    }
}

async fn write_entries(conn: &Connection, entries: Vec<(String, Value)>) -> Result<Vec<StoreChange>> {
    let now = now_millis();
    let mut changes = Vec::with_capacity(entries.len());

    for (key, new_value) in entries {
        let old_value = read_value(conn, &key).await?;
        let raw = serde_json::to_string(&new_value)?;
        conn.execute(
            "INSERT INTO local_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            libsql::params![key.as_str(), raw, now],
        )
        .await?;

        changes.push(StoreChange {
            key,
            old_value,
            new_value,
        });
    }

    Ok(changes)
}

#[async_trait]
impl LocalStore for LibSqlLocalStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let db = self.db.lock().await;
        let conn = db.connection();

        let mut values = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = read_value(conn, key).await? {
                values.insert((*key).to_string(), value);
            }
        }
        Ok(values)
    }

    async fn set(&self, entries: Vec<(String, Value)>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let db = self.db.lock().await;
        let conn = db.connection();

        conn.execute("BEGIN TRANSACTION", ()).await?;

        let changes = match write_entries(conn, entries).await {
            Ok(changes) => changes,
            Err(e) => {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e);
            }
        };

        if let Err(e) = conn.execute("COMMIT", ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
        drop(db);

        tracing::debug!(keys = changes.len(), "Committed local store write");
        notify(&self.changes, changes);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
