//! Provider lifecycle
//!
//! [`FlagProvider`] owns the wrapped flag client and drives it through
//! `NotReady → Ready → Shutdown`. Shutdown is terminal.
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────────────────┐
//!   init(ctx) ────▶│ InitTicket (singleflight)    │──▶ readiness task (blocking pool)
//!                  └──────────────────────────────┘             │
//!                                                                ▼
//!                  ┌──────────────────────────────┐      finalize (exclusive lock)
//!   status() ─────▶│ ReadinessGate                │◀─────  ready = true
//!   evaluate() ───▶│  client │ events │ monitor   │        ChangeMonitor started
//!                  └──────────────────────────────┘
//!                                 ▲
//!   shutdown(ctx) ────────────────┘  stop monitor → join init tasks → teardown
//! ```
//!
//! ## Guarantees
//!
//! 1. Concurrent `init` calls share one readiness wait
//! 2. An expired caller context never hides an outcome that already completed
//! 3. `shutdown` is idempotent, bounded by its context, and never panics
//! 4. The client is destroyed once, after every task using it has finished

mod init;
mod shutdown;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::config::{EVENT_CHANNEL_CAPACITY, ProviderConfig};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::evaluation::{self, EvaluationContext, Treatment};
use crate::events::{EventBus, Subscription};
use crate::gate::ReadinessGate;
use crate::traits::{ClientFactory, FlagClient};

use init::InitTicket;

/// Externally visible provider state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStatus {
    /// Not initialized yet, initializing, failed, or shut down
    NotReady,
    /// Initialized and serving evaluations
    Ready,
}

/// Point-in-time health report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Provider name
    pub provider: String,
    /// Current status
    pub status: ProviderStatus,
    /// Shorthand for `status == Ready`
    pub ready: bool,
    /// Number of loaded flags, only reported while ready
    pub flags_count: Option<usize>,
}

/// Lifecycle-managed wrapper around a flag client
///
/// Cheap to clone; all clones drive the same provider.
///
/// # Example
///
/// ```rust,no_run
/// use flagsync_core::client::LocalhostClientFactory;
/// use flagsync_core::{Context, FlagProvider, ProviderConfig};
/// use std::time::Duration;
///
/// # async fn demo() -> flagsync_core::Result<()> {
/// let config = ProviderConfig::new("localhost").with_flag_file("flags.json");
/// let provider = FlagProvider::new(config, &LocalhostClientFactory)?;
///
/// provider.init(&Context::with_timeout(Duration::from_secs(15))).await?;
/// // ... evaluate flags ...
/// provider.shutdown(&Context::with_timeout(Duration::from_secs(30))).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FlagProvider {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) name: String,
    pub(crate) config: ProviderConfig,
    pub(crate) gate: Arc<ReadinessGate>,
    pub(crate) init_ticket: Mutex<Option<InitTicket>>,
    pub(crate) next_ticket_id: AtomicU64,
    /// Readiness attempts; shutdown waits on these before destroying the client
    pub(crate) init_tasks: TaskTracker,
    /// Teardowns that outlived their shutdown call
    pub(crate) teardown_tasks: TaskTracker,
    pub(crate) monitor_stop: CancellationToken,
    pub(crate) subscription: Subscription,
}

impl FlagProvider {
    /// Create a provider, constructing its client through `factory`
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the configuration is invalid
    /// - Whatever the factory returns when client construction fails
    pub fn new<F>(config: ProviderConfig, factory: &F) -> Result<Self>
    where
        F: ClientFactory + ?Sized,
    {
        config.validate()?;

        let client: Arc<dyn FlagClient> = Arc::from(factory.create(&config.api_key, &config)?);
        let (events, subscription) = EventBus::with_capacity(EVENT_CHANNEL_CAPACITY);

        info!(
            provider = %config.provider_name,
            mode = config.operation_mode().as_str(),
            ready_timeout_secs = config.ready_timeout_secs,
            "provider created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                name: config.provider_name.clone(),
                gate: Arc::new(ReadinessGate::new(client, events)),
                init_ticket: Mutex::new(None),
                next_ticket_id: AtomicU64::new(0),
                init_tasks: TaskTracker::new(),
                teardown_tasks: TaskTracker::new(),
                monitor_stop: CancellationToken::new(),
                subscription,
                config,
            }),
        })
    }

    /// Provider name stamped on events
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Configuration the provider was created with
    pub fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }

    /// Current status, read consistently under the gate
    pub fn status(&self) -> ProviderStatus {
        if self.inner.is_ready() {
            ProviderStatus::Ready
        } else {
            ProviderStatus::NotReady
        }
    }

    /// Shorthand for `status() == Ready`
    pub fn is_ready(&self) -> bool {
        self.status() == ProviderStatus::Ready
    }

    /// Receive side of the event bus
    ///
    /// Every call returns a handle to the same queue. The stream ends once
    /// shutdown has closed the bus.
    pub fn subscribe(&self) -> Subscription {
        self.inner.subscription.clone()
    }

    /// Evaluate `flag` for the targeting key in `eval_ctx`
    ///
    /// # Errors
    ///
    /// See [`evaluation::validate`] for boundary errors;
    /// [`Error::FlagNotFound`] when the client serves the control treatment.
    pub fn evaluate(&self, ctx: &Context, flag: &str, eval_ctx: &EvaluationContext) -> Result<Treatment> {
        let key = evaluation::validate(self.status(), ctx, eval_ctx)?;
        let attributes = evaluation::client_attributes(eval_ctx);

        let result = {
            let slot = self.inner.gate.read().ok_or(Error::NotReady)?;
            let client = slot.ready_client().ok_or(Error::NotReady)?;
            client.treatment(key, flag, &attributes)
        };

        evaluation::interpret(flag, result)
    }

    /// Health report; counts flags only while ready
    pub fn health(&self) -> HealthSnapshot {
        // Snapshot with the gate released
        let flags_count = self
            .inner
            .ready_client()
            .map(|client| client.snapshot().len());

        let status = if flags_count.is_some() {
            ProviderStatus::Ready
        } else {
            ProviderStatus::NotReady
        };

        HealthSnapshot {
            provider: self.inner.name.clone(),
            status,
            ready: status == ProviderStatus::Ready,
            flags_count,
        }
    }

    /// Number of tracked background tasks still running
    ///
    /// Counts readiness attempts and teardowns that outlived their caller's
    /// context. Drops to zero once all cleanup has settled.
    pub fn background_tasks(&self) -> usize {
        self.inner.init_tasks.len() + self.inner.teardown_tasks.len()
    }

    /// [`init`](Self::init) with a deadline of [`ProviderConfig::init_timeout`]
    pub async fn init_default(&self) -> Result<()> {
        self.init(&Context::with_timeout(self.inner.config.init_timeout()))
            .await
    }

    /// [`shutdown`](Self::shutdown) with a deadline of [`ProviderConfig::shutdown_timeout`]
    pub async fn shutdown_default(&self) -> Result<()> {
        self.shutdown(&Context::with_timeout(self.inner.config.shutdown_timeout()))
            .await
    }
}

impl Inner {
    pub(crate) fn is_ready(&self) -> bool {
        self.gate
            .read()
            .is_some_and(|slot| slot.ready_client().is_some())
    }

    /// The client while ready, cloned out of the gate
    pub(crate) fn ready_client(&self) -> Option<Arc<dyn FlagClient>> {
        self.gate
            .read()
            .and_then(|slot| slot.ready_client().cloned())
    }
}

impl fmt::Debug for FlagProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagProvider")
            .field("name", &self.inner.name)
            .field("status", &self.status())
            .field("shutdown", &self.inner.gate.is_shutdown())
            .finish()
    }
}
