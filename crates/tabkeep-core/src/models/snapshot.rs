//! Snapshot exchanged with the remote store, and deletion tombstones

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{Collection, RecordId};
use crate::error::{Error, Result};

/// Durable marker recording that a collection or item id was deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub id: RecordId,
    /// Deletion timestamp (Unix ms)
    pub deleted_at: i64,
}

impl Tombstone {
    #[must_use]
    pub const fn new(id: RecordId, deleted_at: i64) -> Self {
        Self { id, deleted_at }
    }
}

/// Full replica state as stored in the remote sync file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    #[serde(rename = "collectionData", default)]
    pub collections: Vec<Collection>,
    #[serde(rename = "deletedCollectionData", default)]
    pub deleted_records: Vec<Tombstone>,
    /// Upload timestamp (Unix ms)
    #[serde(default)]
    pub timestamp: i64,
}

impl SyncSnapshot {
    #[must_use]
    pub const fn new(collections: Vec<Collection>, deleted_records: Vec<Tombstone>) -> Self {
        Self {
            collections,
            deleted_records,
            timestamp: 0,
        }
    }

    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Parse and validate a snapshot from its JSON wire form.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self = serde_json::from_slice(bytes)
            .map_err(|error| Error::Validation(format!("invalid snapshot JSON: {error}")))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Schema checks the merge engine relies on: unique non-nil ids and
    /// non-negative timestamps.
    pub fn validate(&self) -> Result<()> {
        let mut collection_ids = HashSet::new();
        let mut item_ids = HashSet::new();

        for collection in &self.collections {
            check_id(collection.id, "collection")?;
            check_timestamps(
                collection.id,
                &[
                    collection.created_at,
                    collection.updated_at,
                    collection.order_updated_at,
                ],
            )?;
            if !collection_ids.insert(collection.id) {
                return Err(Error::Validation(format!(
                    "duplicate collection id {}",
                    collection.id
                )));
            }

            for item in &collection.items {
                check_id(item.id, "item")?;
                check_timestamps(
                    item.id,
                    &[item.created_at, item.updated_at, item.order_updated_at],
                )?;
                if !item_ids.insert(item.id) {
                    return Err(Error::Validation(format!("duplicate item id {}", item.id)));
                }
            }
        }

        let mut tombstone_ids = HashSet::new();
        for tombstone in &self.deleted_records {
            check_id(tombstone.id, "tombstone")?;
            check_timestamps(tombstone.id, &[tombstone.deleted_at])?;
            if !tombstone_ids.insert(tombstone.id) {
                return Err(Error::Validation(format!(
                    "duplicate tombstone id {}",
                    tombstone.id
                )));
            }
        }

        Ok(())
    }
}

fn check_id(id: RecordId, kind: &str) -> Result<()> {
    if id.is_nil() {
        return Err(Error::Validation(format!("{kind} id must not be nil")));
    }
    Ok(())
}

fn check_timestamps(id: RecordId, timestamps: &[i64]) -> Result<()> {
    if timestamps.iter().any(|ts| *ts < 0) {
        return Err(Error::Validation(format!("negative timestamp on {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Item;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_wire_field_names() {
        let snapshot = SyncSnapshot::new(
            vec![Collection::new("Inbox")],
            vec![Tombstone::new(RecordId::new(), 5)],
        )
        .with_timestamp(99);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["timestamp"], 99);
        assert_eq!(json["collectionData"].as_array().unwrap().len(), 1);
        assert_eq!(json["deletedCollectionData"][0]["deletedAt"], 5);
    }

    #[test]
    fn test_from_json_accepts_missing_sections() {
        let snapshot = SyncSnapshot::from_json(b"{}").unwrap();
        assert!(snapshot.collections.is_empty());
        assert!(snapshot.deleted_records.is_empty());
    }

    #[test]
    fn test_from_json_rejects_garbage_as_validation_error() {
        let err = SyncSnapshot::from_json(b"not json").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_validate_rejects_duplicate_item_ids_across_collections() {
        let item = Item::new("Dup", "https://dup.example");
        let first = Collection::new("One").with_item(item.clone());
        let second = Collection::new("Two").with_item(item);

        let err = SyncSnapshot::new(vec![first, second], Vec::new())
            .validate()
            .unwrap_err();
        match err {
            Error::Validation(message) => assert!(message.contains("duplicate item id")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_nil_ids() {
        let mut collection = Collection::new("Nil");
        collection.id = RecordId::from_uuid(Uuid::nil());
        let err = SyncSnapshot::new(vec![collection], Vec::new())
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_validate_rejects_negative_timestamps() {
        let raw = json!({
            "collectionData": [],
            "deletedCollectionData": [{"id": RecordId::new(), "deletedAt": -1}],
            "timestamp": 0,
        });
        let err = SyncSnapshot::from_json(raw.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
