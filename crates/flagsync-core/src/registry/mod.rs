//! Event handler registry
//!
//! Layers callback registration on top of the provider's event stream.
//! Handlers are registered per [`EventKind`] and invoked by a single dispatch
//! task that drains a [`Subscription`] and ends when the bus closes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use flagsync_core::registry::{HandlerRegistry, LoggingHandler};
//! use flagsync_core::events::EventKind;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(HandlerRegistry::new());
//! registry.register(EventKind::ConfigurationChanged, Arc::new(LoggingHandler));
//!
//! // Runs until provider.shutdown() closes the bus
//! let dispatcher = registry.dispatch(provider.subscribe());
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::events::{EventKind, ProviderEvent, Subscription};
use crate::traits::EventHandler;

/// Registry of event handlers keyed by event kind
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing registration
/// while a dispatch task is running. Handlers registered later only see
/// events dispatched after registration.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>,
}

impl HandlerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind
    ///
    /// # Parameters
    ///
    /// - `kind`: Event kind the handler receives
    /// - `handler`: Handler invoked once per matching event
    pub fn register(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.entry(kind).or_default().push(handler);
    }

    /// Register a handler for every event kind
    pub fn register_all(&self, handler: Arc<dyn EventHandler>) {
        for kind in [EventKind::Ready, EventKind::Error, EventKind::ConfigurationChanged] {
            self.register(kind, Arc::clone(&handler));
        }
    }

    /// Number of handlers registered for `kind`
    pub fn handler_count(&self, kind: EventKind) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the event's kind, in registration order
    pub async fn notify(&self, event: &ProviderEvent) {
        // Snapshot so no lock is held while handlers run
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            handlers.get(&event.kind).cloned().unwrap_or_default()
        };

        if handlers.is_empty() {
            debug!(event_kind = ?event.kind, "no handlers registered for event");
            return;
        }

        for handler in handlers {
            handler.handle(event).await;
        }
    }

    /// Drain `subscription` on a background task until the bus closes
    ///
    /// # Returns
    ///
    /// A handle resolving to the number of events dispatched
    pub fn dispatch(self: &Arc<Self>, subscription: Subscription) -> JoinHandle<usize> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut events = Box::pin(subscription.into_stream());
            let mut dispatched = 0;

            while let Some(event) = events.next().await {
                registry.notify(&event).await;
                dispatched += 1;
            }

            debug!(dispatched, "event stream closed, dispatcher exiting");
            dispatched
        })
    }
}

/// Handler that writes every event to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &ProviderEvent) {
        match event.kind {
            EventKind::Error => warn!(
                provider = %event.provider_name,
                message = %event.message,
                "provider error"
            ),
            kind => info!(
                provider = %event.provider_name,
                event_kind = ?kind,
                message = %event.message,
                "provider event"
            ),
        }
    }
}
