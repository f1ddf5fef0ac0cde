//! Remote object store holding the shared sync file.

mod memory;
mod r2;

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

pub use memory::{MemoryRemoteStore, RemoteOp};
pub use r2::{R2Config, R2RemoteStore};

/// Default name of the sync file in the remote store.
pub const DEFAULT_SYNC_FILE_NAME: &str = "tabkeep-sync.json";

/// Opaque handle to a file in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteFileId(String);

impl RemoteFileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote storage of the sync file.
///
/// Every call takes the cancellation token of the sync attempt it belongs to
/// and returns `Error::Aborted` once that token is cancelled.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Locate a file by name.
    async fn find(&self, name: &str, token: &CancellationToken) -> Result<Option<RemoteFileId>>;

    /// Download file contents; `None` when the file no longer exists.
    async fn download(
        &self,
        id: &RemoteFileId,
        token: &CancellationToken,
    ) -> Result<Option<Vec<u8>>>;

    /// Create the file (`id == None`) or replace an existing one.
    async fn upload(
        &self,
        id: Option<&RemoteFileId>,
        name: &str,
        bytes: Vec<u8>,
        token: &CancellationToken,
    ) -> Result<RemoteFileId>;

    async fn delete(&self, id: &RemoteFileId, token: &CancellationToken) -> Result<()>;
}

/// Fail with `Error::Aborted` if the token has been cancelled.
pub fn ensure_active(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::Aborted)
    } else {
        Ok(())
    }
}

/// Run a request, checking the token before it starts, while it is in flight,
/// and after it completes.
pub(crate) async fn cancellable<T, F>(token: &CancellationToken, request: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    ensure_active(token)?;
    let result = tokio::select! {
        () = token.cancelled() => return Err(Error::Aborted),
        result = request => result,
    };
    ensure_active(token)?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancellable_rejects_cancelled_token_before_request() {
        let token = CancellationToken::new();
        token.cancel();

        let result = cancellable(&token, async { Ok(1) }).await;
        assert!(matches!(result, Err(Error::Aborted)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancellable_passes_through_result() {
        let token = CancellationToken::new();
        assert_eq!(cancellable(&token, async { Ok(7) }).await.unwrap(), 7);

        let err = cancellable::<(), _>(&token, async {
            Err(Error::Transient("reset".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Transient(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancellable_interrupts_pending_request() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move { child.cancel() });

        let result = cancellable(&token, std::future::pending::<Result<()>>()).await;
        assert!(matches!(result, Err(Error::Aborted)));
    }
}
