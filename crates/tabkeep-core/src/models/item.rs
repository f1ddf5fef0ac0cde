//! Saved item model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::RecordId;

/// A bookmarked item inside a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Unique identifier, stable for the item's lifetime
    pub id: RecordId,
    /// Page title
    pub title: String,
    /// Page URL
    pub url: String,
    /// Optional favicon or preview image URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last content edit timestamp (Unix ms)
    pub updated_at: i64,
    /// Last reorder timestamp (Unix ms)
    #[serde(default)]
    pub order_updated_at: i64,
    /// Fields written by other clients that this version does not model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Item {
    /// Create a new item with all timestamps set to now
    #[must_use]
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: RecordId::new(),
            title: title.into(),
            url: url.into(),
            img: None,
            created_at: now,
            updated_at: now,
            order_updated_at: now,
            extra: Map::new(),
        }
    }

    /// Object-spread `{...self, ...incoming}`: every field the incoming item
    /// carries replaces ours, absent optional fields fall back to ours.
    ///
    /// `order_updated_at` is left to the caller.
    #[must_use]
    pub(crate) fn overlaid_with(self, incoming: Self) -> Self {
        let mut extra = self.extra;
        extra.extend(incoming.extra);
        Self {
            id: incoming.id,
            title: incoming.title,
            url: incoming.url,
            img: incoming.img.or(self.img),
            created_at: incoming.created_at,
            updated_at: incoming.updated_at,
            order_updated_at: incoming.order_updated_at,
            extra,
        }
    }
}
