//! Background consumer of the overflow queue.
//!
//! Subscribes once, then handles one job at a time: each job waits for an
//! admission token and runs to completion before the next message is read.

use cover_core::{job_span, Subscription};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::Result;
use crate::job_key::CoverageJobKey;
use crate::orchestrator::Orchestrator;

/// What the dispatcher did with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The job ran and produced no runner error.
    Completed,
    /// The job ran and the runner failed; the failure was cached.
    Failed,
    /// The message was not a job key.
    Malformed,
    /// The job named an unsupported toolchain.
    Unsupported,
    /// A result for the key is already cached.
    AlreadyCached,
    /// Another run owns the key.
    InProgress,
    /// The admission gate was closed.
    GateClosed,
}

/// Feeds overflow jobs back through the orchestrator.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    orchestrator: Orchestrator,
}

impl Dispatcher {
    /// Creates a dispatcher over `orchestrator`.
    #[must_use]
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Subscribes to the overflow queue and spawns the consume loop.
    ///
    /// The subscription is live when this returns, so jobs enqueued
    /// afterwards are delivered.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be opened.
    pub async fn start(self) -> Result<JoinHandle<()>> {
        let subscription = self.orchestrator.queue().subscribe().await?;
        tracing::info!(channel = subscription.channel(), "Overflow dispatcher started");
        Ok(tokio::spawn(self.run(subscription)))
    }

    /// Consumes `subscription` until it closes or the admission gate closes.
    ///
    /// Gate closure is observed while idle too, so shutdown does not wait
    /// for another message to arrive.
    pub async fn run(self, mut subscription: Subscription) {
        let gate = self.orchestrator.gate().clone();
        loop {
            let message = tokio::select! {
                biased;
                () = gate.closed() => {
                    tracing::info!("Admission gate closed; dispatcher exiting");
                    break;
                }
                message = subscription.next() => message,
            };
            let Some(message) = message else { break };
            let outcome = self.handle(&message).await;
            tracing::debug!(?outcome, "Overflow job handled");
            if outcome == DispatchOutcome::GateClosed {
                break;
            }
        }
        tracing::warn!(channel = subscription.channel(), "Overflow dispatcher stopped");
    }

    /// Handles one raw queue message.
    pub async fn handle(&self, message: &[u8]) -> DispatchOutcome {
        let key = match CoverageJobKey::from_message(message) {
            Ok(key) => key,
            Err(error) => {
                tracing::warn!(%error, "Dropping malformed overflow message");
                return DispatchOutcome::Malformed;
            }
        };
        let span = job_span("dispatch", &key.repository, &key.tag);
        self.handle_key(key).instrument(span).await
    }

    async fn handle_key(&self, key: CoverageJobKey) -> DispatchOutcome {
        let orchestrator = &self.orchestrator;
        if !orchestrator.config().toolchains.contains(&key.tag) {
            tracing::warn!("Dropping overflow job for unsupported toolchain");
            return DispatchOutcome::Unsupported;
        }

        if self.is_cached(&key).await {
            return DispatchOutcome::AlreadyCached;
        }
        if orchestrator.registry().is_set(&key).await.unwrap_or(false) {
            return DispatchOutcome::InProgress;
        }

        let permit = match orchestrator.gate().acquire().await {
            Ok(permit) => permit,
            Err(error) => {
                tracing::error!(%error, "Admission gate closed; dispatcher exiting");
                return DispatchOutcome::GateClosed;
            }
        };

        // State may have changed while waiting for the token.
        if self.is_cached(&key).await {
            return DispatchOutcome::AlreadyCached;
        }
        match orchestrator.registry().try_set(&key).await {
            Ok(true) => {}
            Ok(false) => return DispatchOutcome::InProgress,
            Err(error) => tracing::warn!(%error, "Registry write failed; running anyway"),
        }

        match orchestrator.cover(&key, permit).await {
            Ok(()) => DispatchOutcome::Completed,
            Err(_) => DispatchOutcome::Failed,
        }
    }

    async fn is_cached(&self, key: &CoverageJobKey) -> bool {
        match self.orchestrator.cache().get(key).await {
            Ok(hit) => hit.is_some(),
            Err(error) => {
                tracing::warn!(%error, "Result cache read failed; treating as miss");
                false
            }
        }
    }
}
