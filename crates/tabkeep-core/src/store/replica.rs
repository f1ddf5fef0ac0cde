//! Typed access to the replica state kept in a `LocalStore`

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::LocalStore;
use crate::error::Result;
use crate::models::{Collection, RecordId, SyncSnapshot, Tombstone};
use crate::state::SyncStatus;

pub const COLLECTIONS_KEY: &str = "collections";
pub const DELETED_RECORDS_KEY: &str = "deletedRecords";
pub const SYNC_STATUS_KEY: &str = "syncStatus";

/// Reads and writes collections, tombstones and the sync status.
#[derive(Clone)]
pub struct LocalReplica {
    store: Arc<dyn LocalStore>,
}

impl LocalReplica {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// Current collections and tombstones. Missing keys read as empty.
    pub async fn read_snapshot(&self) -> Result<SyncSnapshot> {
        let mut values = self
            .store
            .get(&[COLLECTIONS_KEY, DELETED_RECORDS_KEY])
            .await?;

        let collections = decode_or_default(values.remove(COLLECTIONS_KEY))?;
        let deleted_records = decode_or_default(values.remove(DELETED_RECORDS_KEY))?;
        Ok(SyncSnapshot::new(collections, deleted_records))
    }

    pub async fn read_status(&self) -> Result<SyncStatus> {
        let mut values = self.store.get(&[SYNC_STATUS_KEY]).await?;
        decode_or_default(values.remove(SYNC_STATUS_KEY))
    }

    pub async fn write_status(&self, status: &SyncStatus) -> Result<()> {
        self.store
            .set(vec![(
                SYNC_STATUS_KEY.to_string(),
                serde_json::to_value(status)?,
            )])
            .await
    }

    /// Persist a merged snapshot together with its status in one write.
    pub async fn commit_sync(&self, snapshot: &SyncSnapshot, status: &SyncStatus) -> Result<()> {
        self.store
            .set(vec![
                (
                    COLLECTIONS_KEY.to_string(),
                    serde_json::to_value(&snapshot.collections)?,
                ),
                (
                    DELETED_RECORDS_KEY.to_string(),
                    serde_json::to_value(&snapshot.deleted_records)?,
                ),
                (SYNC_STATUS_KEY.to_string(), serde_json::to_value(status)?),
            ])
            .await
    }

    pub async fn save_collections(&self, collections: &[Collection]) -> Result<()> {
        self.store
            .set(vec![(
                COLLECTIONS_KEY.to_string(),
                serde_json::to_value(collections)?,
            )])
            .await
    }

    /// Delete a collection and record its tombstone.
    ///
    /// Returns `false` when no collection has that id; the tombstone is
    /// written either way so a remote copy is suppressed on the next sync.
    pub async fn remove_collection(&self, id: RecordId, deleted_at: i64) -> Result<bool> {
        let snapshot = self.read_snapshot().await?;
        let mut collections = snapshot.collections;
        let before = collections.len();
        collections.retain(|collection| collection.id != id);
        let removed = collections.len() != before;

        self.write_removal(collections, snapshot.deleted_records, id, deleted_at)
            .await?;
        Ok(removed)
    }

    /// Delete an item from whichever collection holds it and record its tombstone.
    pub async fn remove_item(&self, id: RecordId, deleted_at: i64) -> Result<bool> {
        let snapshot = self.read_snapshot().await?;
        let mut collections = snapshot.collections;
        let mut removed = false;
        for collection in &mut collections {
            let before = collection.items.len();
            collection.items.retain(|item| item.id != id);
            removed |= collection.items.len() != before;
        }

        self.write_removal(collections, snapshot.deleted_records, id, deleted_at)
            .await?;
        Ok(removed)
    }

    async fn write_removal(
        &self,
        collections: Vec<Collection>,
        mut deleted_records: Vec<Tombstone>,
        id: RecordId,
        deleted_at: i64,
    ) -> Result<()> {
        if !deleted_records.iter().any(|tombstone| tombstone.id == id) {
            deleted_records.push(Tombstone::new(id, deleted_at));
        }

        self.store
            .set(vec![
                (
                    COLLECTIONS_KEY.to_string(),
                    serde_json::to_value(collections)?,
                ),
                (
                    DELETED_RECORDS_KEY.to_string(),
                    serde_json::to_value(deleted_records)?,
                ),
            ])
            .await
    }
}

fn decode_or_default<T: DeserializeOwned + Default>(value: Option<Value>) -> Result<T> {
    match value {
        Some(Value::Null) | None => Ok(T::default()),
        Some(value) => Ok(serde_json::from_value(value)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Item;
    use crate::state::SyncState;
    use crate::store::MemoryLocalStore;
    use pretty_assertions::assert_eq;

    fn replica() -> LocalReplica {
        LocalReplica::new(Arc::new(MemoryLocalStore::new()))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_store_reads_defaults() {
        let replica = replica();

        let snapshot = replica.read_snapshot().await.unwrap();
        assert!(snapshot.collections.is_empty());
        assert!(snapshot.deleted_records.is_empty());

        let status = replica.read_status().await.unwrap();
        assert_eq!(status.state, SyncState::Unsynced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_commit_sync_writes_all_keys_in_one_change_batch() {
        let replica = replica();
        let mut changes = replica.store().subscribe();

        let snapshot = SyncSnapshot::new(
            vec![Collection::new("Reading")],
            vec![Tombstone::new(RecordId::new(), 3)],
        );
        replica
            .commit_sync(&snapshot, &SyncStatus::synced(10))
            .await
            .unwrap();

        let mut keys = Vec::new();
        for _ in 0..3 {
            keys.push(changes.recv().await.unwrap().key);
        }
        assert_eq!(keys, vec![COLLECTIONS_KEY, DELETED_RECORDS_KEY, SYNC_STATUS_KEY]);

        let read = replica.read_snapshot().await.unwrap();
        assert_eq!(read, snapshot);
        assert_eq!(
            replica.read_status().await.unwrap(),
            SyncStatus::synced(10)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remove_collection_writes_tombstone() {
        let replica = replica();
        let keep = Collection::new("Keep");
        let drop_me = Collection::new("Drop");
        replica
            .save_collections(&[keep.clone(), drop_me.clone()])
            .await
            .unwrap();

        assert!(replica.remove_collection(drop_me.id, 50).await.unwrap());
        // Second removal finds nothing and does not duplicate the tombstone
        assert!(!replica.remove_collection(drop_me.id, 60).await.unwrap());

        let snapshot = replica.read_snapshot().await.unwrap();
        assert_eq!(snapshot.collections, vec![keep]);
        assert_eq!(snapshot.deleted_records, vec![Tombstone::new(drop_me.id, 50)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remove_item_searches_all_collections() {
        let replica = replica();
        let item = Item::new("Rust", "https://rust-lang.org");
        let other = Item::new("Docs", "https://docs.rs");
        let first = Collection::new("First").with_item(other.clone());
        let second = Collection::new("Second").with_item(item.clone());
        replica.save_collections(&[first, second]).await.unwrap();

        assert!(replica.remove_item(item.id, 7).await.unwrap());

        let snapshot = replica.read_snapshot().await.unwrap();
        assert_eq!(snapshot.collections[0].items, vec![other]);
        assert!(snapshot.collections[1].items.is_empty());
        assert_eq!(snapshot.deleted_records, vec![Tombstone::new(item.id, 7)]);
    }
}
