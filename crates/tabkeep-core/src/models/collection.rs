//! Collection model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Item, RecordId};

/// A named, ordered group of saved items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    /// Unique identifier
    pub id: RecordId,
    /// Display title
    pub title: String,
    /// Items in display order
    #[serde(default)]
    pub items: Vec<Item>,
    /// Optional label color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last title/metadata edit timestamp (Unix ms)
    pub updated_at: i64,
    /// Last reorder timestamp (Unix ms)
    #[serde(default)]
    pub order_updated_at: i64,
    /// Fields written by other clients that this version does not model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Collection {
    /// Create an empty collection with all timestamps set to now
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: RecordId::new(),
            title: title.into(),
            items: Vec::new(),
            color: None,
            created_at: now,
            updated_at: now,
            order_updated_at: now,
            extra: Map::new(),
        }
    }

    /// Add an item at the end of the collection
    #[must_use]
    pub fn with_item(mut self, item: Item) -> Self {
        self.items.push(item);
        self
    }

    /// Object-spread `{...self, ...winner}` over the scalar fields.
    ///
    /// Items and `order_updated_at` are left to the caller.
    #[must_use]
    pub(crate) fn overlaid_with(self, winner: Self) -> Self {
        let mut extra = self.extra;
        extra.extend(winner.extra);
        Self {
            id: winner.id,
            title: winner.title,
            items: winner.items,
            color: winner.color.or(self.color),
            created_at: winner.created_at,
            updated_at: winner.updated_at,
            order_updated_at: winner.order_updated_at,
            extra,
        }
    }
}
