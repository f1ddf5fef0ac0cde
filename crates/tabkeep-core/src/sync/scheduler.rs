//! Debounced and periodic sync triggers.
//!
//! Each trigger owns one named slot holding at most one pending timer. Arming
//! a slot aborts the timer it replaces. A timer that fires hands the sync off
//! to a detached task, so replacing a slot never interrupts a running sync.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::session::{Inner, SyncSession};
use crate::error::Result;
use crate::state::{SyncState, SyncStatus};
use crate::util::now_millis;

/// Options of a debounced sync request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleRequest {
    /// Delay before the sync runs; the session's debounce delay when `None`.
    pub delay: Option<Duration>,
    /// Arm the timer even while a sync is running.
    pub ignore_syncing: bool,
    /// Arm the timer even if the last sync finished recently.
    pub ignore_recent: bool,
}

impl ScheduleRequest {
    #[must_use]
    pub const fn after(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ignore_syncing: false,
            ignore_recent: false,
        }
    }

    /// Bypass both guards.
    #[must_use]
    pub const fn forced(mut self) -> Self {
        self.ignore_syncing = true;
        self.ignore_recent = true;
        self
    }
}

/// A single pending timer.
#[derive(Default)]
pub(super) struct TimerSlot {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerSlot {
    async fn replace(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.handle.lock().await.replace(handle) {
            previous.abort();
        }
    }

    async fn clear(&self) {
        if let Some(previous) = self.handle.lock().await.take() {
            previous.abort();
        }
    }

    async fn is_armed(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub(super) fn abort_now(&mut self) {
        if let Some(previous) = self.handle.get_mut().take() {
            previous.abort();
        }
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Why a scheduled sync should not run right now.
fn skip_reason(
    status: &SyncStatus,
    recent_window: Duration,
    ignore_syncing: bool,
    ignore_recent: bool,
) -> Option<&'static str> {
    if !ignore_syncing && status.state == SyncState::Syncing {
        return Some("sync in progress");
    }
    if !ignore_recent && status.synced_within(now_millis(), millis(recent_window)) {
        return Some("synced recently");
    }
    None
}

// Spawning from plain functions keeps the futures of `sync_now` and the
// timer tasks from depending on each other's auto traits.
fn spawn_sync(session: SyncSession, trigger: &'static str) {
    tokio::spawn(async move {
        if let Err(error) = session.sync_now().await {
            tracing::warn!(trigger, %error, "Scheduled sync failed");
        }
    });
}

fn spawn_fallback_check(session: SyncSession) {
    tokio::spawn(async move { session.fire_fallback().await });
}

impl SyncSession {
    fn from_weak(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// Arm the debounce timer, replacing any pending one.
    ///
    /// Returns `false` without arming when a sync is running or the last one
    /// finished within the recent window, unless the request ignores that
    /// guard, or when the session has been shut down.
    pub async fn schedule_sync(&self, request: ScheduleRequest) -> Result<bool> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Ok(false);
        }

        let status = self.status().await?;
        if let Some(reason) = skip_reason(
            &status,
            self.inner.settings.recent_window,
            request.ignore_syncing,
            request.ignore_recent,
        ) {
            tracing::debug!(reason, "Scheduled sync skipped");
            return Ok(false);
        }

        let delay = request.delay.unwrap_or(self.inner.settings.debounce_delay);
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(session) = Self::from_weak(&weak) {
                spawn_sync(session, "debounce");
            }
        });
        self.inner.debounce.replace(handle).await;

        tracing::debug!(delay_ms = millis(delay), "Debounced sync scheduled");
        Ok(true)
    }

    /// (Re-)arm the periodic fallback timer.
    pub(super) async fn arm_fallback(&self) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }

        let interval = self.inner.settings.fallback_interval;
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(session) = Self::from_weak(&weak) {
                spawn_fallback_check(session);
            }
        });
        self.inner.fallback.replace(handle).await;
    }

    async fn fire_fallback(&self) {
        let reason = match self.status().await {
            Ok(status) => skip_reason(&status, self.inner.settings.recent_window, false, false),
            Err(error) => {
                tracing::error!(%error, "Failed to read sync status");
                Some("status unavailable")
            }
        };

        if let Some(reason) = reason {
            tracing::debug!(reason, "Fallback sync deferred");
            self.arm_fallback().await;
            return;
        }

        tracing::debug!("Fallback sync firing");
        if let Err(error) = self.sync_now().await {
            tracing::warn!(trigger = "fallback", %error, "Scheduled sync failed");
        }
    }

    /// Whether a debounced sync is pending.
    pub async fn debounce_armed(&self) -> bool {
        self.inner.debounce.is_armed().await
    }

    /// Whether the periodic fallback timer is pending.
    pub async fn fallback_armed(&self) -> bool {
        self.inner.fallback.is_armed().await
    }

    /// Stop both timers and cancel the in-flight attempt.
    ///
    /// Afterwards `schedule_sync` refuses and attempts no longer re-arm the
    /// fallback. `sync_now` still works when called directly.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.debounce.clear().await;
        self.inner.fallback.clear().await;
        self.cancel().await;
        tracing::info!("Sync session shut down");
    }
}
