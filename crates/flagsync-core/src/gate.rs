//! Readiness gate
//!
//! Guards everything the lifecycle mutates: the client handle, the publish
//! side of the event bus, the ready flag and the monitor handle. The shutdown
//! flag lives outside the lock so that `init` can reject a shut-down provider
//! without contending with evaluations.
//!
//! ## Discipline
//!
//! - Mutations happen only under [`ReadinessGate::write`]
//! - Reads go through [`ReadinessGate::read`], which refuses access once the
//!   shutdown flag is set, before and after acquiring the lock
//! - Guards are never held across an `.await`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::task::JoinHandle;

use crate::events::{EventBus, ProviderEvent, PublishOutcome};
use crate::traits::FlagClient;

/// State guarded by the gate's lock
pub struct Slot {
    /// Wrapped client; `None` once shutdown has taken it
    pub client: Option<Arc<dyn FlagClient>>,
    /// Publish side of the event bus
    pub events: EventBus,
    /// Set when initialization completed
    pub ready: bool,
    /// Completion handle of the change monitor, if one was started
    pub monitor: Option<JoinHandle<()>>,
}

impl Slot {
    /// Client handle, only while ready
    pub fn ready_client(&self) -> Option<&Arc<dyn FlagClient>> {
        if self.ready { self.client.as_ref() } else { None }
    }

    /// Publish an event through the bus
    pub fn publish(&self, event: ProviderEvent) -> PublishOutcome {
        self.events.publish(event)
    }
}

/// Reader/writer gate plus the monotonic shutdown flag
pub struct ReadinessGate {
    shutdown: AtomicBool,
    slot: RwLock<Slot>,
}

impl ReadinessGate {
    /// Create a gate around a freshly constructed client
    pub fn new(client: Arc<dyn FlagClient>, events: EventBus) -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            slot: RwLock::new(Slot {
                client: Some(client),
                events,
                ready: false,
                monitor: None,
            }),
        }
    }

    /// Whether shutdown has begun
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Flip the shutdown flag
    ///
    /// # Returns
    ///
    /// `true` only for the call that performed the transition
    pub fn begin_shutdown(&self) -> bool {
        self.shutdown
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Shared access, refused once shutdown has begun
    pub fn read(&self) -> Option<RwLockReadGuard<'_, Slot>> {
        if self.is_shutdown() {
            return None;
        }

        let guard = self.slot.read().unwrap_or_else(PoisonError::into_inner);

        // Shutdown may have started while we waited for the lock
        if self.is_shutdown() {
            return None;
        }
        Some(guard)
    }

    /// Exclusive access, granted regardless of the shutdown flag
    pub fn write(&self) -> RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }
}
