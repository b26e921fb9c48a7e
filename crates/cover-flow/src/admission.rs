//! Per-instance bound on concurrent runner invocations.

use std::sync::Arc;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Default number of simultaneous runs per instance.
pub const DEFAULT_Q_MAX: usize = 5;

/// Counting gate over admission tokens.
///
/// Clones share the same tokens.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    closed: Arc<watch::Sender<bool>>,
}

/// One held admission token. Dropping it returns the token.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    /// Creates a gate with `capacity` tokens (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            closed: Arc::new(watch::channel(false).0),
        }
    }

    /// Takes a token without waiting.
    #[must_use]
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionPermit { _permit: permit })
    }

    /// Waits for a token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GateClosed`] if the gate was closed.
    pub async fn acquire(&self) -> Result<AdmissionPermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map(|permit| AdmissionPermit { _permit: permit })
            .map_err(|_| Error::GateClosed)
    }

    /// Number of tokens currently held.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Total number of tokens.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Closes the gate; waiting and future acquires fail.
    pub fn close(&self) {
        self.semaphore.close();
        self.closed.send_replace(true);
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the gate is closed, immediately if it already is.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives as long as `self`, so this only returns on close.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(DEFAULT_Q_MAX)
    }
}
