//! Lifecycle event bus
//!
//! A single bounded channel carries [`ProviderEvent`]s from the provider to
//! any number of consumers.
//!
//! ## Semantics
//!
//! - **Non-blocking publish**: a full buffer drops the event and logs a warning
//! - **Single close**: the publish side is closed once, by shutdown
//! - **Shared receive side**: every [`Subscription`] clone pulls from the same
//!   queue, so each event is delivered to exactly one consumer
//! - **Termination**: `recv()` returning `None` is the end-of-stream signal
//!
//! ```text
//! ┌──────────────┐  try_send   ┌──────────────────┐   recv    ┌──────────────┐
//! │ FlagProvider │────────────▶│ bounded channel  │──────────▶│ Subscription │ (xN)
//! └──────────────┘             └──────────────────┘           └──────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::Stream;
use tracing::warn;

/// Kind of lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Provider finished initialization
    Ready,
    /// Initialization failed or was cancelled
    Error,
    /// Flag definitions changed
    ConfigurationChanged,
}

/// Events published by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEvent {
    /// What happened
    pub kind: EventKind,
    /// Human-readable detail
    pub message: String,
    /// Name of the publishing provider
    pub provider_name: String,
    /// When the event was created
    pub emitted_at: DateTime<Utc>,
}

impl ProviderEvent {
    /// Create a new event stamped with the current time
    pub fn new(kind: EventKind, provider_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider_name: provider_name.into(),
            emitted_at: Utc::now(),
        }
    }
}

/// Result of a publish attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The event was queued
    Delivered,
    /// The buffer was full; the event was dropped
    Dropped,
    /// The bus was already closed
    Closed,
}

/// Publish side of the bus
///
/// Owned by the provider's gate slot, so publishing happens under the shared
/// lock and closing under the exclusive lock.
#[derive(Debug)]
pub struct EventBus {
    tx: Option<mpsc::Sender<ProviderEvent>>,
}

impl EventBus {
    /// Create a bus holding at most `capacity` undelivered events
    ///
    /// # Returns
    ///
    /// A tuple of (bus, subscription); clone the subscription to add consumers.
    pub fn with_capacity(capacity: usize) -> (Self, Subscription) {
        let (tx, rx) = mpsc::channel(capacity);
        let bus = Self { tx: Some(tx) };
        let subscription = Subscription {
            rx: Arc::new(Mutex::new(rx)),
        };
        (bus, subscription)
    }

    /// Queue an event without blocking
    pub fn publish(&self, event: ProviderEvent) -> PublishOutcome {
        let Some(tx) = &self.tx else {
            return PublishOutcome::Closed;
        };

        match tx.try_send(event) {
            Ok(()) => PublishOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(event_kind = ?event.kind, "event channel full, dropping event");
                PublishOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => PublishOutcome::Closed,
        }
    }

    /// Close the publish side. Only the first call has an effect.
    ///
    /// # Returns
    ///
    /// `true` if this call closed the bus
    pub fn close(&mut self) -> bool {
        self.tx.take().is_some()
    }

    /// Whether the bus has been closed
    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Number of events queued and not yet received
    pub fn pending(&self) -> usize {
        self.tx
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }
}

/// Receive side of the bus
///
/// Clones share one queue. Once the bus is closed and drained, every clone
/// observes the end of the stream.
#[derive(Debug, Clone)]
pub struct Subscription {
    rx: Arc<Mutex<mpsc::Receiver<ProviderEvent>>>,
}

impl Subscription {
    /// Wait for the next event; `None` once the bus is closed and drained
    pub async fn recv(&self) -> Option<ProviderEvent> {
        self.rx.lock().await.recv().await
    }

    /// Take the next event if one is queued and no other consumer is mid-receive
    pub fn try_recv(&self) -> Option<ProviderEvent> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Consume the subscription as a stream that ends when the bus closes
    pub fn into_stream(self) -> impl Stream<Item = ProviderEvent> + Send + 'static {
        futures::stream::unfold(self, |subscription| async move {
            let event = subscription.recv().await?;
            Some((event, subscription))
        })
    }
}
