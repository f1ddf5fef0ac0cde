//! tabkeep-core - Sync engine for Tabkeep
//!
//! Named, ordered collections of saved tabs are kept in a local store and in a
//! sync file on a remote object store. This crate merges the two replicas and
//! drives that merge under concurrency, network failure and cancellation.
//!
//! The pieces, leaves first:
//! - [`merge`]: pure, deterministic merge of two snapshots
//! - [`store`] and [`db`]: the local key/value store (in memory or libSQL)
//! - [`remote`]: the remote object store (in memory or Cloudflare R2)
//! - [`auth`]: the credential the remote is accessed with
//! - [`sync`]: `SyncSession`, which ties them together

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod merge;
pub mod models;
pub mod remote;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;

pub use auth::{AuthProvider, Credential, StaticAuth};
pub use config::{RetryPolicy, SyncSettings};
pub use error::{Error, Result};
pub use models::{Collection, Item, RecordId, SyncSnapshot, Tombstone};
pub use remote::{RemoteFileId, RemoteStore};
pub use state::{SyncState, SyncStatus};
pub use store::{LocalReplica, LocalStore, StoreChange};
pub use sync::{ScheduleRequest, SyncSession};
