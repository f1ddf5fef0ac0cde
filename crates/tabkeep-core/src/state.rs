//! Sync status shared between the orchestrator and its observers.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the sync engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    NotAuthenticated,
    #[default]
    Unsynced,
    Syncing,
    Synced,
    Error,
}

/// Persisted sync status record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    #[serde(default)]
    pub last_synced_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncStatus {
    pub const fn not_authenticated(last_synced_at: Option<i64>) -> Self {
        Self {
            state: SyncState::NotAuthenticated,
            last_synced_at,
            error: None,
        }
    }

    pub const fn syncing(last_synced_at: Option<i64>) -> Self {
        Self {
            state: SyncState::Syncing,
            last_synced_at,
            error: None,
        }
    }

    pub const fn synced(at: i64) -> Self {
        Self {
            state: SyncState::Synced,
            last_synced_at: Some(at),
            error: None,
        }
    }

    pub fn failed(last_synced_at: Option<i64>, error: impl Into<String>) -> Self {
        Self {
            state: SyncState::Error,
            last_synced_at,
            error: Some(error.into()),
        }
    }

    /// True when the last successful sync happened less than `window_ms` ago.
    pub fn synced_within(&self, now_ms: i64, window_ms: i64) -> bool {
        self.last_synced_at
            .is_some_and(|at| now_ms.saturating_sub(at) < window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_kebab_case() {
        let json = serde_json::to_string(&SyncState::NotAuthenticated).unwrap();
        assert_eq!(json, "\"not-authenticated\"");
    }

    #[test]
    fn status_round_trips_camel_case() {
        let status = SyncStatus::failed(Some(42), "boom");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["lastSyncedAt"], 42);
        assert_eq!(json["state"], "error");
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn default_status_is_unsynced() {
        let status = SyncStatus::default();
        assert_eq!(status.state, SyncState::Unsynced);
        assert_eq!(status.last_synced_at, None);
    }

    #[test]
    fn synced_within_window() {
        let status = SyncStatus::synced(1_000);
        assert!(status.synced_within(30_000, 60_000));
        assert!(!status.synced_within(61_000, 60_000));
        assert!(!SyncStatus::default().synced_within(1_000, 60_000));
    }
}
