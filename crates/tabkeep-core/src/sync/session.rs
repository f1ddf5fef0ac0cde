//! Sync session: cancellation, status transitions and the sync attempt itself.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::retry::with_retry;
use super::scheduler::TimerSlot;
use crate::auth::AuthProvider;
use crate::config::SyncSettings;
use crate::error::{Error, FailureKind, Result};
use crate::merge::{merge_snapshots, prune_tombstones};
use crate::models::SyncSnapshot;
use crate::remote::{ensure_active, RemoteFileId, RemoteStore};
use crate::state::{SyncState, SyncStatus};
use crate::store::{LocalReplica, LocalStore};
use crate::util::now_millis;

pub(super) struct Inner {
    pub(super) replica: LocalReplica,
    pub(super) remote: Arc<dyn RemoteStore>,
    pub(super) auth: Arc<dyn AuthProvider>,
    pub(super) settings: SyncSettings,
    /// Token of the newest attempt.
    current: Mutex<CancellationToken>,
    /// Bumped each time an attempt starts.
    generation: AtomicU64,
    /// Held while an attempt writes its status or result locally.
    commit_lock: Mutex<()>,
    pub(super) debounce: TimerSlot,
    pub(super) fallback: TimerSlot,
    pub(super) closed: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.debounce.abort_now();
        self.fallback.abort_now();
        self.current.get_mut().cancel();
    }
}

/// Drives synchronization between one local store and one remote store.
///
/// Cheap to clone; clones share the same session. At most one attempt is in
/// flight: starting a new one cancels the previous one.
#[derive(Clone)]
pub struct SyncSession {
    pub(super) inner: Arc<Inner>,
}

impl SyncSession {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                replica: LocalReplica::new(local),
                remote,
                auth,
                settings,
                current: Mutex::new(CancellationToken::new()),
                generation: AtomicU64::new(0),
                commit_lock: Mutex::new(()),
                debounce: TimerSlot::default(),
                fallback: TimerSlot::default(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn replica(&self) -> &LocalReplica {
        &self.inner.replica
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        self.inner.replica.read_status().await
    }

    /// Record that the user signed in. Moves `not-authenticated` to `unsynced`.
    pub async fn mark_authenticated(&self) -> Result<()> {
        let status = self.status().await?;
        if status.state == SyncState::NotAuthenticated {
            self.inner
                .replica
                .write_status(&SyncStatus {
                    state: SyncState::Unsynced,
                    last_synced_at: status.last_synced_at,
                    error: None,
                })
                .await?;
            tracing::info!("Sync session authenticated");
        }
        Ok(())
    }

    /// Re-check the credential and update the status to match.
    ///
    /// Returns whether a valid credential is present.
    pub async fn refresh_auth_status(&self) -> Result<bool> {
        if self.inner.auth.is_authenticated().await {
            self.mark_authenticated().await?;
            return Ok(true);
        }

        let status = self.status().await?;
        if status.state != SyncState::NotAuthenticated {
            self.inner
                .replica
                .write_status(&SyncStatus::not_authenticated(status.last_synced_at))
                .await?;
            tracing::info!("No valid credential, sync disabled");
        }
        Ok(false)
    }

    /// Cancel the in-flight attempt, if any, without starting a new one.
    pub async fn cancel(&self) {
        self.inner.current.lock().await.cancel();
    }

    /// Run one sync attempt now, cancelling any attempt already in flight.
    pub async fn sync_now(&self) -> Result<()> {
        let (token, generation) = self.begin_attempt().await;
        tracing::info!(generation, "Sync started");

        let result = self.run_attempt(&token).await;
        if let Err(error) = &result {
            self.record_failure(error, generation).await;
        }

        self.arm_fallback().await;
        result
    }

    async fn begin_attempt(&self) -> (CancellationToken, u64) {
        let mut current = self.inner.current.lock().await;
        current.cancel();
        *current = CancellationToken::new();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        (current.clone(), generation)
    }

    async fn run_attempt(&self, token: &CancellationToken) -> Result<()> {
        let inner = &self.inner;

        if !inner.auth.is_authenticated().await {
            return Err(Error::Auth("no valid credential".to_string()));
        }

        {
            let _commit = inner.commit_lock.lock().await;
            ensure_active(token)?;
            let previous = inner.replica.read_status().await?;
            inner
                .replica
                .write_status(&SyncStatus::syncing(previous.last_synced_at))
                .await?;
        }

        let timestamp = now_millis();
        let (file_id, remote) = self.fetch_remote(token).await?;
        let local = inner.replica.read_snapshot().await?;

        let mut merged = merge_snapshots(
            local.collections,
            remote.collections,
            &local.deleted_records,
            &remote.deleted_records,
        );
        if let Some(retention) = inner.settings.tombstone_retention {
            let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
            let before = merged.deleted_records.len();
            merged.deleted_records = prune_tombstones(merged.deleted_records, timestamp, retention_ms);
            tracing::debug!(
                pruned = before - merged.deleted_records.len(),
                "Pruned expired tombstones"
            );
        }
        let merged = merged.with_timestamp(timestamp);

        let bytes = merged.to_json()?;
        let remote_store = &inner.remote;
        let name = inner.settings.remote_file_name.as_str();
        let file_id = file_id.as_ref();
        with_retry(&inner.settings.retry, token, "upload", || {
            remote_store.upload(file_id, name, bytes.clone(), token)
        })
        .await?;

        let _commit = inner.commit_lock.lock().await;
        ensure_active(token)?;
        inner
            .replica
            .commit_sync(&merged, &SyncStatus::synced(timestamp))
            .await?;

        tracing::info!(
            collections = merged.collections.len(),
            tombstones = merged.deleted_records.len(),
            timestamp,
            "Sync completed"
        );
        Ok(())
    }

    /// Locate and download the remote snapshot.
    ///
    /// A missing file and an invalid file both read as an empty snapshot.
    async fn fetch_remote(
        &self,
        token: &CancellationToken,
    ) -> Result<(Option<RemoteFileId>, SyncSnapshot)> {
        let inner = &self.inner;
        let remote_store = &inner.remote;
        let name = inner.settings.remote_file_name.as_str();

        let found = with_retry(&inner.settings.retry, token, "find", || {
            remote_store.find(name, token)
        })
        .await?;
        let Some(file_id) = found else {
            tracing::debug!(name, "No remote sync file yet");
            return Ok((None, SyncSnapshot::default()));
        };

        let downloaded = with_retry(&inner.settings.retry, token, "download", || {
            remote_store.download(&file_id, token)
        })
        .await?;
        let Some(bytes) = downloaded else {
            tracing::debug!(%file_id, "Remote sync file disappeared");
            return Ok((None, SyncSnapshot::default()));
        };

        match SyncSnapshot::from_json(&bytes) {
            Ok(snapshot) => Ok((Some(file_id), snapshot)),
            Err(error) => {
                tracing::warn!(%file_id, %error, "Ignoring invalid remote snapshot");
                Ok((Some(file_id), SyncSnapshot::default()))
            }
        }
    }

    async fn record_failure(&self, error: &Error, generation: u64) {
        let _commit = self.inner.commit_lock.lock().await;
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(generation, %error, "Superseded sync attempt ended");
            return;
        }

        let last_synced_at = match self.status().await {
            Ok(status) => status.last_synced_at,
            Err(read_error) => {
                tracing::error!(%read_error, "Failed to read sync status");
                None
            }
        };

        let status = match error.failure_kind() {
            FailureKind::Auth => {
                tracing::warn!(%error, "Sync failed: not authenticated");
                SyncStatus::not_authenticated(last_synced_at)
            }
            FailureKind::Aborted => {
                tracing::info!("Sync aborted");
                SyncStatus::failed(last_synced_at, error.to_string())
            }
            FailureKind::PermissionDenied | FailureKind::Other => {
                tracing::error!(%error, "Sync failed");
                SyncStatus::failed(last_synced_at, error.to_string())
            }
        };

        if let Err(write_error) = self.inner.replica.write_status(&status).await {
            tracing::error!(%write_error, "Failed to record sync failure");
        }
    }
}
