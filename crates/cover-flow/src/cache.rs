//! Result cache over the key-value store.

use std::sync::Arc;
use std::time::Duration;

use cover_core::KvStore;

use crate::error::Result;
use crate::job_key::CoverageJobKey;
use crate::result::CoverageResult;

/// Key prefix of cached results.
pub const RESULT_PREFIX: &str = "cover:result:";

/// Default result lifetime.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Returns the store key of a job's cached result.
#[must_use]
pub fn cache_key(key: &CoverageJobKey) -> String {
    format!("{RESULT_PREFIX}{key}")
}

/// JSON-encoded coverage results with a fixed expiry.
#[derive(Clone)]
pub struct ResultCache {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ResultCache {
    /// Creates a cache over `kv`.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    /// Returns the configured lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Reads a cached result.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the entry cannot be decoded.
    pub async fn get(&self, key: &CoverageJobKey) -> Result<Option<CoverageResult>> {
        let Some(raw) = self.kv.get(&cache_key(key)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Writes a result, replacing any previous entry and restarting its TTL.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the store write fails.
    pub async fn put(&self, result: &CoverageResult) -> Result<()> {
        let raw = serde_json::to_vec(result)?;
        self.kv
            .set_with_ttl(&cache_key(&result.key()), raw.into(), Some(self.ttl))
            .await?;
        Ok(())
    }

    /// Returns up to `limit` cached results with measured coverage.
    ///
    /// Scans a bounded number of keys; undecodable entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the key scan fails.
    pub async fn recent(&self, limit: usize) -> Result<Vec<CoverageResult>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let budget = limit.saturating_mul(2).max(10);
        let keys = self
            .kv
            .scan_keys(&format!("{RESULT_PREFIX}*"), budget)
            .await?;

        let mut results = Vec::with_capacity(limit);
        for key in keys {
            if results.len() == limit {
                break;
            }
            let raw = match self.kv.get(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(error) => {
                    tracing::warn!(%key, %error, "Skipping unreadable cache entry");
                    continue;
                }
            };
            match serde_json::from_slice::<CoverageResult>(&raw) {
                Ok(result) if result.has_output => results.push(result),
                Ok(_) => {}
                Err(error) => tracing::warn!(%key, %error, "Skipping undecodable cache entry"),
            }
        }
        Ok(results)
    }
}
