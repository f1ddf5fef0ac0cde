//! In-process `RemoteStore` with fault injection

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{cancellable, RemoteFileId, RemoteStore};
use crate::error::{Error, Result};

/// Remote operation, used to target injected failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Find,
    Download,
    Upload,
    Delete,
}

#[derive(Default)]
struct State {
    files: HashMap<RemoteFileId, (String, Vec<u8>)>,
    next_id: u64,
    failures: HashMap<RemoteOp, VecDeque<Error>>,
    calls: HashMap<RemoteOp, usize>,
    latency: Option<Duration>,
}

impl State {
    fn find_by_name(&self, name: &str) -> Option<RemoteFileId> {
        self.files
            .iter()
            .find(|(_, (file_name, _))| file_name == name)
            .map(|(id, _)| id.clone())
    }
}

/// `RemoteStore` keeping files in memory.
///
/// Failures queued with [`MemoryRemoteStore::fail_next`] are returned by the
/// next calls of the targeted operation, in order. An optional latency makes
/// every call wait before answering, which lets tests cancel calls in flight.
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<State>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next call of `op`.
    pub async fn fail_next(&self, op: RemoteOp, error: Error) {
        self.state
            .lock()
            .await
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().await.latency = latency;
    }

    /// Number of calls made to `op`, including failed ones.
    pub async fn calls(&self, op: RemoteOp) -> usize {
        self.state
            .lock()
            .await
            .calls
            .get(&op)
            .copied()
            .unwrap_or_default()
    }

    /// Store raw bytes under `name`, bypassing fault injection.
    pub async fn put(&self, name: &str, bytes: Vec<u8>) -> RemoteFileId {
        let mut state = self.state.lock().await;
        let id = state.find_by_name(name).unwrap_or_else(|| {
            state.next_id += 1;
            RemoteFileId::new(format!("mem-{}", state.next_id))
        });
        state.files.insert(id.clone(), (name.to_string(), bytes));
        id
    }

    /// Contents of the file called `name`, bypassing fault injection.
    pub async fn contents(&self, name: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().await;
        state
            .find_by_name(name)
            .and_then(|id| state.files.get(&id).map(|(_, bytes)| bytes.clone()))
    }

    /// Record the call, wait out the latency, and pop an injected failure.
    async fn begin(&self, op: RemoteOp) -> Result<()> {
        let latency = {
            let mut state = self.state.lock().await;
            *state.calls.entry(op).or_default() += 1;
            state.latency
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        match state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn find(&self, name: &str, token: &CancellationToken) -> Result<Option<RemoteFileId>> {
        cancellable(token, async {
            self.begin(RemoteOp::Find).await?;
            Ok(self.state.lock().await.find_by_name(name))
        })
        .await
    }

    async fn download(
        &self,
        id: &RemoteFileId,
        token: &CancellationToken,
    ) -> Result<Option<Vec<u8>>> {
        cancellable(token, async {
            self.begin(RemoteOp::Download).await?;
            let state = self.state.lock().await;
            Ok(state.files.get(id).map(|(_, bytes)| bytes.clone()))
        })
        .await
    }

    async fn upload(
        &self,
        id: Option<&RemoteFileId>,
        name: &str,
        bytes: Vec<u8>,
        token: &CancellationToken,
    ) -> Result<RemoteFileId> {
        cancellable(token, async {
            self.begin(RemoteOp::Upload).await?;
            let mut state = self.state.lock().await;
            let id = match id {
                Some(id) if state.files.contains_key(id) => id.clone(),
                Some(id) => {
                    return Err(Error::NotFound(format!("remote file {id}")));
                }
                None => {
                    state.next_id += 1;
                    RemoteFileId::new(format!("mem-{}", state.next_id))
                }
            };
            state.files.insert(id.clone(), (name.to_string(), bytes));
            Ok(id)
        })
        .await
    }

    async fn delete(&self, id: &RemoteFileId, token: &CancellationToken) -> Result<()> {
        cancellable(token, async {
            self.begin(RemoteOp::Delete).await?;
            self.state.lock().await.files.remove(id);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upload_find_download_delete() {
        let store = MemoryRemoteStore::new();
        let token = CancellationToken::new();

        assert_eq!(store.find("sync.json", &token).await.unwrap(), None);

        let id = store
            .upload(None, "sync.json", b"v1".to_vec(), &token)
            .await
            .unwrap();
        assert_eq!(
            store.find("sync.json", &token).await.unwrap(),
            Some(id.clone())
        );

        let replaced = store
            .upload(Some(&id), "sync.json", b"v2".to_vec(), &token)
            .await
            .unwrap();
        assert_eq!(replaced, id);
        assert_eq!(
            store.download(&id, &token).await.unwrap(),
            Some(b"v2".to_vec())
        );

        store.delete(&id, &token).await.unwrap();
        assert_eq!(store.download(&id, &token).await.unwrap(), None);
        assert_eq!(store.calls(RemoteOp::Upload).await, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_injected_failures_are_consumed_in_order() {
        let store = MemoryRemoteStore::new();
        let token = CancellationToken::new();
        store
            .fail_next(RemoteOp::Find, Error::Transient("timeout".to_string()))
            .await;
        store
            .fail_next(RemoteOp::Find, Error::Auth("401".to_string()))
            .await;

        assert!(matches!(
            store.find("x", &token).await,
            Err(Error::Transient(_))
        ));
        assert!(matches!(store.find("x", &token).await, Err(Error::Auth(_))));
        assert_eq!(store.find("x", &token).await.unwrap(), None);
        assert_eq!(store.calls(RemoteOp::Find).await, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replace_of_missing_file_is_not_found() {
        let store = MemoryRemoteStore::new();
        let token = CancellationToken::new();

        let err = store
            .upload(Some(&RemoteFileId::new("gone")), "x", Vec::new(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_latency_aborts_call() {
        let store = MemoryRemoteStore::new();
        store.set_latency(Some(Duration::from_secs(5))).await;
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let result = store.upload(None, "x", b"data".to_vec(), &token).await;
        assert!(matches!(result, Err(Error::Aborted)));
        assert_eq!(store.contents("x").await, None);
    }
}
