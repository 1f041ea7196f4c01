// # Event Handler Trait
//
// Consumers that react to provider lifecycle events register an
// `EventHandler` with a `HandlerRegistry` instead of draining the
// subscription themselves.

use async_trait::async_trait;

use crate::events::ProviderEvent;

/// Trait for lifecycle event handlers
///
/// Handlers run on the registry's dispatch task, one event at a time. A slow
/// handler delays later events but never blocks the provider: the provider
/// drops events once the bus is full.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event
    async fn handle(&self, event: &ProviderEvent);
}
