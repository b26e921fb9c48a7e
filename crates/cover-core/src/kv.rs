//! Key-value store abstraction for shared cache and coordination state.
//!
//! This module defines the store contract the orchestrator depends on. The
//! contract is the subset of a Redis-like server that cover.run needs:
//! - Plain values with an optional expiry
//! - Hash fields (set, set-if-absent, get, delete)
//! - Bounded key scans by pattern
//!
//! Values are opaque bytes; callers own their encoding.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

/// Key-value store trait.
///
/// All backends (Redis, memory) implement this trait. Every write is a
/// last-writer-wins overwrite unless the method says otherwise.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Reads a value.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Writes a value, replacing any previous value and expiry.
    ///
    /// `ttl = None` keeps the value until it is overwritten.
    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    /// Reads a field of a hash.
    async fn hash_get(&self, map: &str, field: &str) -> Result<Option<Bytes>>;

    /// Writes a field of a hash unconditionally.
    async fn hash_set(&self, map: &str, field: &str, value: Bytes) -> Result<()>;

    /// Writes a field of a hash only if it is absent.
    ///
    /// Returns `true` if the field was written.
    async fn hash_set_if_absent(&self, map: &str, field: &str, value: Bytes) -> Result<bool>;

    /// Deletes a field of a hash.
    ///
    /// Succeeds even if the field doesn't exist (idempotent).
    async fn hash_delete(&self, map: &str, field: &str) -> Result<()>;

    /// Returns up to `limit` live keys matching `pattern`.
    ///
    /// Patterns are either an exact key or a prefix followed by a single
    /// trailing `*`.
    async fn scan_keys(&self, pattern: &str, limit: usize) -> Result<Vec<String>>;
}

/// In-memory key-value store.
///
/// Thread-safe via `RwLock`. Expired entries are hidden on read and pruned
/// on the next write. Suitable for tests and single-instance deployments;
/// state is not shared across processes.
#[derive(Debug, Default, Clone)]
pub struct MemoryKv {
    state: Arc<RwLock<KvState>>,
}

#[derive(Debug, Default)]
struct KvState {
    values: HashMap<String, StoredValue>,
    hashes: HashMap<String, HashMap<String, Bytes>>,
}

#[derive(Debug, Clone)]
struct StoredValue {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::internal("kv store lock poisoned")
}

fn matches_pattern(key: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

impl MemoryKv {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live plain values.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        let now = Instant::now();
        Ok(state.values.values().filter(|v| v.is_live(now)).count())
    }

    /// Returns true if no live plain values are stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the number of fields in a hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn hash_len(&self, map: &str) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.hashes.get(map).map_or(0, HashMap::len))
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let state = self.state.read().map_err(poison_err)?;
        let now = Instant::now();
        Ok(state
            .values
            .get(key)
            .filter(|v| v.is_live(now))
            .map(|v| v.data.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let now = Instant::now();
        state.values.retain(|_, v| v.is_live(now));
        state.values.insert(
            key.to_string(),
            StoredValue {
                data: value,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        drop(state);
        Ok(())
    }

    async fn hash_get(&self, map: &str, field: &str) -> Result<Option<Bytes>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.hashes.get(map).and_then(|h| h.get(field)).cloned())
    }

    async fn hash_set(&self, map: &str, field: &str, value: Bytes) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state
            .hashes
            .entry(map.to_string())
            .or_default()
            .insert(field.to_string(), value);
        drop(state);
        Ok(())
    }

    async fn hash_set_if_absent(&self, map: &str, field: &str, value: Bytes) -> Result<bool> {
        let mut state = self.state.write().map_err(poison_err)?;
        let hash = state.hashes.entry(map.to_string()).or_default();
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value);
        drop(state);
        Ok(true)
    }

    async fn hash_delete(&self, map: &str, field: &str) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        if let Some(hash) = state.hashes.get_mut(map) {
            hash.remove(field);
            if hash.is_empty() {
                state.hashes.remove(map);
            }
        }
        drop(state);
        Ok(())
    }

    async fn scan_keys(&self, pattern: &str, limit: usize) -> Result<Vec<String>> {
        let state = self.state.read().map_err(poison_err)?;
        let now = Instant::now();
        let mut keys: Vec<String> = state
            .values
            .iter()
            .filter(|(key, value)| value.is_live(now) && matches_pattern(key, pattern))
            .map(|(key, _)| key.clone())
            .collect();
        drop(state);
        keys.sort();
        keys.truncate(limit);
        Ok(keys)
    }
}
