//! Database layer for Tabkeep

mod connection;
mod kv_store;
mod migrations;

pub use connection::Database;
pub use kv_store::LibSqlLocalStore;
