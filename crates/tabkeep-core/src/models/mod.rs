//! Data models for Tabkeep

mod collection;
mod id;
mod item;
mod snapshot;

pub use collection::Collection;
pub use id::RecordId;
pub use item::Item;
pub use snapshot::{SyncSnapshot, Tombstone};
