// # flagsync-core
//
// Lifecycle and concurrency core for a feature-flag provider that wraps a
// long-lived, non-cancelable flag client.
//
// ## Architecture Overview
//
// - **FlagClient**: Trait for the wrapped client (readiness wait, snapshot, evaluation, destroy)
// - **FlagProvider**: Lifecycle controller (`init`, `shutdown`, `status`, `evaluate`)
// - **ReadinessGate**: Reader/writer discipline around the client and the event bus
// - **ChangeMonitor**: Background poller publishing definition changes
// - **EventBus**: Bounded, non-blocking lifecycle event channel
// - **HandlerRegistry**: Callback registration layered on the event stream
//
// ## Design Principles
//
// 1. **Singleflight**: Concurrent initializations share one readiness wait
// 2. **Best outcome wins**: An expired context never hides a completed result
// 3. **Bounded teardown**: Every shutdown wait is bounded by the caller's context
// 4. **Tracked cleanup**: Work that outlives a caller is counted, never orphaned
// 5. **Library-First**: The daemon is a thin shell over this crate

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluation;
pub mod events;
pub mod gate;
pub mod lifecycle;
pub mod monitor;
pub mod registry;
pub mod traits;

// Re-export core types for convenience
pub use client::{InMemoryClient, InMemoryClientFactory, LocalhostClient, LocalhostClientFactory};
pub use config::{OperationMode, ProviderConfig};
pub use context::{Context, ContextError};
pub use error::{Error, Result};
pub use evaluation::{EvaluationContext, Treatment, evaluation_context};
pub use events::{EventBus, EventKind, ProviderEvent, PublishOutcome, Subscription};
pub use lifecycle::{FlagProvider, HealthSnapshot, ProviderStatus};
pub use registry::{HandlerRegistry, LoggingHandler};
pub use traits::{ClientFactory, EventHandler, FlagClient, FlagSnapshot, TreatmentResult};
