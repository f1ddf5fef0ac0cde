//! Credential source consulted before every sync attempt.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::util::now_millis;

/// Credentials within this many milliseconds of expiry count as expired.
const EXPIRY_SKEW_MS: i64 = 60_000;

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    /// Expiry as Unix ms; `None` for tokens that do not expire.
    pub expires_at: Option<i64>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, expires_at: Option<i64>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }

    #[must_use]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.access_token.trim().is_empty()
            || self
                .expires_at
                .is_some_and(|expires_at| expires_at <= now_ms + EXPIRY_SKEW_MS)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of the credential the remote store is accessed with.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The current credential, if any.
    async fn credential(&self) -> Option<Credential>;

    /// Whether a usable credential is available right now.
    async fn is_authenticated(&self) -> bool {
        self.credential()
            .await
            .is_some_and(|credential| !credential.is_expired_at(now_millis()))
    }
}

/// `AuthProvider` holding a credential set by the embedder.
#[derive(Debug, Default)]
pub struct StaticAuth {
    credential: RwLock<Option<Credential>>,
}

impl StaticAuth {
    pub fn new(credential: Option<Credential>) -> Self {
        Self {
            credential: RwLock::new(credential),
        }
    }

    /// Provider that is always signed in with a non-expiring token.
    pub fn signed_in(access_token: impl Into<String>) -> Self {
        Self::new(Some(Credential::new(access_token, None)))
    }

    pub async fn sign_in(&self, credential: Credential) {
        *self.credential.write().await = Some(credential);
        tracing::info!("Credential stored");
    }

    pub async fn sign_out(&self) {
        *self.credential.write().await = None;
        tracing::info!("Credential cleared");
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn credential(&self) -> Option<Credential> {
        self.credential.read().await.clone()
    }
}
