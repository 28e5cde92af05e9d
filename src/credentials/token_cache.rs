use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::{system_clock, Clock, Credential, TokenSupplier};
use crate::error::AuthError;

/// Caches the credential produced by a supplier and refreshes it on demand.
///
/// Refresh is lazy: `current()` only calls the supplier when nothing is cached
/// or the cached credential is no longer live. Clones share the same cache.
#[derive(Clone)]
pub struct CredentialCache {
    supplier: Arc<dyn TokenSupplier>,
    credential: Arc<RwLock<Option<Arc<Credential>>>>,
    last_rotated: Arc<RwLock<Option<DateTime<Utc>>>>,
    refresh_margin: Duration,
    clock: Clock,
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("supplier", &self.supplier.name())
            .field("refresh_margin", &self.refresh_margin)
            .finish_non_exhaustive()
    }
}

impl CredentialCache {
    pub fn new(supplier: Arc<dyn TokenSupplier>) -> Self {
        Self {
            supplier,
            credential: Arc::new(RwLock::new(None)),
            last_rotated: Arc::new(RwLock::new(None)),
            refresh_margin: Duration::zero(),
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Treat credentials as stale `margin` before their real expiry.
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    fn is_live(&self, credential: &Credential, now: DateTime<Utc>) -> bool {
        !credential.is_expired_at(now + self.refresh_margin)
    }

    /// Return the cached credential, fetching a new one if it is absent or stale.
    ///
    /// Concurrent callers that all see a stale cache may each fetch; the last
    /// completed fetch wins. Readers only ever see a complete credential.
    pub async fn current(&self) -> Result<Arc<Credential>, AuthError> {
        let now = (self.clock)();
        if let Some(cached) = self.credential.read().await.as_ref() {
            if self.is_live(cached, now) {
                return Ok(Arc::clone(cached));
            }
        }

        debug!(supplier = self.supplier.name(), "credential absent or expired, fetching");
        let fresh = Arc::new(self.supplier.fetch().await?);
        debug!(
            supplier = self.supplier.name(),
            expires_at = ?fresh.expiry,
            "credential refreshed"
        );

        *self.credential.write().await = Some(Arc::clone(&fresh));
        *self.last_rotated.write().await = Some((self.clock)());
        Ok(fresh)
    }

    /// Cached credential without triggering a fetch.
    pub async fn peek(&self) -> Option<Arc<Credential>> {
        self.credential.read().await.clone()
    }

    /// Drop the cached credential so the next `current()` refetches.
    pub async fn invalidate(&self) {
        self.credential.write().await.take();
        debug!(supplier = self.supplier.name(), "credential invalidated");
    }

    pub async fn last_rotated(&self) -> Option<DateTime<Utc>> {
        *self.last_rotated.read().await
    }
}
