//! Key-value store with operation recording.
//!
//! Wraps [`MemoryKv`] and records every call so tests can assert which
//! store paths a request touched.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use cover_core::error::{Error, Result};
use cover_core::{KvStore, MemoryKv};
use std::time::Duration;

/// Record of a store operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    /// Plain value read.
    Get {
        /// Key that was read.
        key: String,
    },
    /// Plain value write.
    Set {
        /// Key that was written.
        key: String,
        /// Expiry requested.
        ttl: Option<Duration>,
    },
    /// Hash field read.
    HashGet {
        /// Hash name.
        map: String,
        /// Field name.
        field: String,
    },
    /// Unconditional hash field write.
    HashSet {
        /// Hash name.
        map: String,
        /// Field name.
        field: String,
    },
    /// Conditional hash field write.
    HashSetIfAbsent {
        /// Hash name.
        map: String,
        /// Field name.
        field: String,
    },
    /// Hash field delete.
    HashDelete {
        /// Hash name.
        map: String,
        /// Field name.
        field: String,
    },
    /// Key scan.
    Scan {
        /// Pattern scanned.
        pattern: String,
    },
}

impl KvOp {
    /// Returns true for operations that change state.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Set { .. }
                | Self::HashSet { .. }
                | Self::HashSetIfAbsent { .. }
                | Self::HashDelete { .. }
        )
    }

    fn target(&self) -> &str {
        match self {
            Self::Get { key } | Self::Set { key, .. } => key,
            Self::HashGet { map, .. }
            | Self::HashSet { map, .. }
            | Self::HashSetIfAbsent { map, .. }
            | Self::HashDelete { map, .. } => map,
            Self::Scan { pattern } => pattern,
        }
    }
}

/// In-memory store with operation recording and failure injection.
#[derive(Debug, Clone, Default)]
pub struct RecordingKv {
    inner: MemoryKv,
    operations: Arc<Mutex<Vec<KvOp>>>,
    fail_prefixes: Arc<Mutex<Vec<String>>>,
    fail_delete_prefixes: Arc<Mutex<Vec<String>>>,
}

impl RecordingKv {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the wrapped store for direct inspection.
    #[must_use]
    pub fn memory(&self) -> &MemoryKv {
        &self.inner
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<KvOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Returns recorded operations that changed state.
    #[must_use]
    pub fn writes(&self) -> Vec<KvOp> {
        self.operations()
            .into_iter()
            .filter(KvOp::is_write)
            .collect()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Makes every operation whose key or hash starts with `prefix` fail.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.fail_prefixes.lock().expect("lock").push(prefix.into());
    }

    /// Makes only hash deletes on maps starting with `prefix` fail.
    ///
    /// Reads and writes of the same map keep working.
    pub fn inject_delete_failure(&self, prefix: impl Into<String>) {
        self.fail_delete_prefixes
            .lock()
            .expect("lock")
            .push(prefix.into());
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.fail_prefixes.lock().expect("lock").clear();
        self.fail_delete_prefixes.lock().expect("lock").clear();
    }

    fn record(&self, op: KvOp) -> Result<()> {
        let matches = |prefixes: &Mutex<Vec<String>>| {
            prefixes
                .lock()
                .expect("lock")
                .iter()
                .any(|p| op.target().starts_with(p.as_str()))
        };
        let failing = matches(&self.fail_prefixes)
            || (matches!(op, KvOp::HashDelete { .. }) && matches(&self.fail_delete_prefixes));
        let target = op.target().to_string();
        self.operations.lock().expect("lock").push(op);
        if failing {
            return Err(Error::storage(format!("injected failure for {target}")));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for RecordingKv {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.record(KvOp::Get {
            key: key.to_string(),
        })?;
        self.inner.get(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.record(KvOp::Set {
            key: key.to_string(),
            ttl,
        })?;
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn hash_get(&self, map: &str, field: &str) -> Result<Option<Bytes>> {
        self.record(KvOp::HashGet {
            map: map.to_string(),
            field: field.to_string(),
        })?;
        self.inner.hash_get(map, field).await
    }

    async fn hash_set(&self, map: &str, field: &str, value: Bytes) -> Result<()> {
        self.record(KvOp::HashSet {
            map: map.to_string(),
            field: field.to_string(),
        })?;
        self.inner.hash_set(map, field, value).await
    }

    async fn hash_set_if_absent(&self, map: &str, field: &str, value: Bytes) -> Result<bool> {
        self.record(KvOp::HashSetIfAbsent {
            map: map.to_string(),
            field: field.to_string(),
        })?;
        self.inner.hash_set_if_absent(map, field, value).await
    }

    async fn hash_delete(&self, map: &str, field: &str) -> Result<()> {
        self.record(KvOp::HashDelete {
            map: map.to_string(),
            field: field.to_string(),
        })?;
        self.inner.hash_delete(map, field).await
    }

    async fn scan_keys(&self, pattern: &str, limit: usize) -> Result<Vec<String>> {
        self.record(KvOp::Scan {
            pattern: pattern.to_string(),
        })?;
        self.inner.scan_keys(pattern, limit).await
    }
}
