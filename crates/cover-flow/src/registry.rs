//! Cross-instance record of which jobs have an active run.
//!
//! One hash field per job key, valued with the RFC3339 time it was set.
//! This is not a mutex: two instances can both see a key absent before
//! either sets it. `try_set` uses set-if-absent so only stores without that
//! primitive widen the window.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use cover_core::KvStore;

use crate::error::Result;
use crate::job_key::CoverageJobKey;

/// Hash holding the in-progress markers.
pub const REGISTRY_KEY: &str = "cover:in-progress";

/// Tracks active runs by job key.
#[derive(Clone)]
pub struct InProgressRegistry {
    kv: Arc<dyn KvStore>,
    stale_after: Duration,
}

impl std::fmt::Debug for InProgressRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProgressRegistry")
            .field("stale_after", &self.stale_after)
            .finish_non_exhaustive()
    }
}

impl InProgressRegistry {
    /// Creates a registry. Markers older than `stale_after` count as absent.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, stale_after: Duration) -> Self {
        Self { kv, stale_after }
    }

    fn is_stale(&self, marker: &[u8], now: DateTime<Utc>) -> bool {
        let Some(set_at) = std::str::from_utf8(marker)
            .ok()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        else {
            // Unreadable markers can never be cleared by their owner.
            return true;
        };
        let age = now.signed_duration_since(set_at.with_timezone(&Utc));
        age.to_std().is_ok_and(|age| age > self.stale_after)
    }

    /// Returns true if a live marker exists for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub async fn is_set(&self, key: &CoverageJobKey) -> Result<bool> {
        let marker = self.kv.hash_get(REGISTRY_KEY, &key.canonical_string()).await?;
        Ok(marker.is_some_and(|m| !self.is_stale(&m, Utc::now())))
    }

    /// Sets the marker if no live marker exists.
    ///
    /// Returns `true` if this caller now owns the marker. A stale marker is
    /// taken over.
    ///
    /// # Errors
    ///
    /// Returns an error if a store operation fails.
    pub async fn try_set(&self, key: &CoverageJobKey) -> Result<bool> {
        let field = key.canonical_string();
        let now = Utc::now();
        let value = Bytes::from(now.to_rfc3339());

        if self
            .kv
            .hash_set_if_absent(REGISTRY_KEY, &field, value.clone())
            .await?
        {
            return Ok(true);
        }

        match self.kv.hash_get(REGISTRY_KEY, &field).await? {
            Some(existing) if !self.is_stale(&existing, now) => Ok(false),
            _ => {
                tracing::warn!(key = %field, "Taking over stale in-progress marker");
                self.kv.hash_set(REGISTRY_KEY, &field, value).await?;
                Ok(true)
            }
        }
    }

    /// Sets or refreshes the marker unconditionally.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn mark(&self, key: &CoverageJobKey) -> Result<()> {
        self.kv
            .hash_set(
                REGISTRY_KEY,
                &key.canonical_string(),
                Bytes::from(Utc::now().to_rfc3339()),
            )
            .await?;
        Ok(())
    }

    /// Removes the marker. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store delete fails.
    pub async fn clear(&self, key: &CoverageJobKey) -> Result<()> {
        self.kv
            .hash_delete(REGISTRY_KEY, &key.canonical_string())
            .await?;
        Ok(())
    }
}
