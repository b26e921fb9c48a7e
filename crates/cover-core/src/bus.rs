//! Publish/subscribe bus abstraction.
//!
//! The bus is at-most-once and non-durable: a message published while nobody
//! is subscribed to its channel is dropped, and a subscriber that falls behind
//! skips what it missed. Callers must tolerate loss.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use tokio::sync::broadcast;

use crate::error::{Error, Result};

/// Per-channel buffer for the in-memory bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A live subscription to one channel.
///
/// Yields messages in publish order until the channel is closed.
pub struct Subscription {
    channel: String,
    inner: Pin<Box<dyn Stream<Item = Bytes> + Send>>,
}

impl Subscription {
    /// Wraps a backend stream as a subscription.
    #[must_use]
    pub fn new(channel: impl Into<String>, stream: impl Stream<Item = Bytes> + Send + 'static) -> Self {
        Self {
            channel: channel.into(),
            inner: Box::pin(stream),
        }
    }

    /// Returns the subscribed channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next message.
    ///
    /// Returns `None` once the channel is closed.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.inner.next().await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Message bus trait.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Publishes a message to a channel.
    ///
    /// Returns the number of subscribers that received it. Zero is not an
    /// error.
    async fn publish(&self, channel: &str, message: Bytes) -> Result<usize>;

    /// Subscribes to a channel.
    ///
    /// Only messages published after this call returns are delivered.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

/// In-memory message bus built on `tokio::sync::broadcast`.
///
/// One broadcast channel per name, created lazily. Not shared across
/// processes.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Bytes>>>>,
    capacity: usize,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::internal("message bus lock poisoned")
}

impl MemoryBus {
    /// Creates a new bus with the default per-channel buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus with the given per-channel buffer.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Returns the current subscriber count of a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn subscriber_count(&self, channel: &str) -> Result<usize> {
        let channels = self.channels.read().map_err(poison_err)?;
        Ok(channels
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count))
    }

    fn sender(&self, channel: &str) -> Result<broadcast::Sender<Bytes>> {
        if let Some(sender) = self.channels.read().map_err(poison_err)?.get(channel) {
            return Ok(sender.clone());
        }
        let mut channels = self.channels.write().map_err(poison_err)?;
        let sender = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();
        drop(channels);
        Ok(sender)
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, message: Bytes) -> Result<usize> {
        let sender = self.sender(channel)?;
        // SendError only means there are no receivers right now.
        Ok(sender.send(message).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let receiver = self.sender(channel)?.subscribe();
        let name = channel.to_string();
        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let name = name.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(message) => return Some((message, receiver)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(channel = %name, skipped, "Subscriber lagged; messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(Subscription::new(channel, stream))
    }
}
