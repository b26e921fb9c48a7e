//! Overflow queue for jobs that found no free admission token.
//!
//! The bus-backed queue is best-effort: a job published while no dispatcher
//! is subscribed is lost. Requesters re-poll, so a lost job is re-enqueued on
//! the next request for the same key.

use std::sync::Arc;

use async_trait::async_trait;
use cover_core::{MessageBus, Subscription};

use crate::error::{Error, Result};
use crate::job_key::CoverageJobKey;

/// Default overflow channel name.
pub const DEFAULT_QUEUE_CHANNEL: &str = "cover:queue";

/// Deferred job submission.
#[async_trait]
pub trait OverflowQueue: Send + Sync + 'static {
    /// Publishes a job. Returns the number of consumers that received it.
    async fn enqueue(&self, key: &CoverageJobKey) -> Result<usize>;

    /// Opens a consumer stream of raw job messages.
    async fn subscribe(&self) -> Result<Subscription>;
}

/// Overflow queue over a named bus channel.
#[derive(Clone)]
pub struct BusOverflowQueue {
    bus: Arc<dyn MessageBus>,
    channel: String,
}

impl std::fmt::Debug for BusOverflowQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusOverflowQueue")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl BusOverflowQueue {
    /// Creates a queue publishing on `channel`.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, channel: impl Into<String>) -> Self {
        Self {
            bus,
            channel: channel.into(),
        }
    }

    /// Returns the channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl OverflowQueue for BusOverflowQueue {
    async fn enqueue(&self, key: &CoverageJobKey) -> Result<usize> {
        let message = key.to_message()?;
        Ok(self.bus.publish(&self.channel, message).await?)
    }

    async fn subscribe(&self) -> Result<Subscription> {
        self.bus
            .subscribe(&self.channel)
            .await
            .map_err(|e| match e {
                cover_core::Error::NotFound(_) => Error::QueueClosed {
                    channel: self.channel.clone(),
                },
                other => other.into(),
            })
    }
}
