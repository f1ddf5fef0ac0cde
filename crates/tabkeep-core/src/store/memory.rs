//! In-process `LocalStore`

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use super::{notify, LocalStore, StoreChange, CHANGE_CHANNEL_CAPACITY};
use crate::error::Result;

/// `LocalStore` backed by a map in memory. Contents are lost on drop.
pub struct MemoryLocalStore {
    values: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: Mutex::new(HashMap::new()),
            changes,
        }
    }
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let values = self.values.lock().await;
        Ok(keys
            .iter()
            .filter_map(|key| {
                values
                    .get(*key)
                    .map(|value| ((*key).to_string(), value.clone()))
            })
            .collect())
    }

    async fn set(&self, entries: Vec<(String, Value)>) -> Result<()> {
        let mut values = self.values.lock().await;
        let changes = entries
            .into_iter()
            .map(|(key, new_value)| {
                let old_value = values.insert(key.clone(), new_value.clone());
                StoreChange {
                    key,
                    old_value,
                    new_value,
                }
            })
            .collect();
        drop(values);

        notify(&self.changes, changes);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
