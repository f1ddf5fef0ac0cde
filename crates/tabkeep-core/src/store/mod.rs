//! Local key/value store abstraction and the typed replica view over it.

mod memory;
mod replica;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Result;

pub use memory::MemoryLocalStore;
pub use replica::{LocalReplica, COLLECTIONS_KEY, DELETED_RECORDS_KEY, SYNC_STATUS_KEY};

/// Capacity of the change-notification channel of the bundled stores.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A value written to the local store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Value,
}

/// Local persistent store holding JSON values under string keys.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Read the given keys. Missing keys are absent from the returned map.
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>>;

    /// Write all entries atomically: either every entry lands or none does.
    async fn set(&self, entries: Vec<(String, Value)>) -> Result<()>;

    /// Subscribe to changes committed by `set`.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// Publish committed changes; a channel without receivers is not an error.
pub(crate) fn notify(sender: &broadcast::Sender<StoreChange>, changes: Vec<StoreChange>) {
    for change in changes {
        let _ = sender.send(change);
    }
}
