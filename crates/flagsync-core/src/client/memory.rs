// # In-Memory Flag Client
//
// Programmable implementation of FlagClient.
//
// ## Purpose
//
// Holds flag definitions in a HashMap and simulates the slow parts of a real
// SDK client: a readiness wait that only completes after a configurable
// delay, and a destroy call that can take arbitrarily long.
//
// ## When to Use
//
// - Testing the lifecycle against precise timings
// - Embedding the provider where definitions come from another source
// - Counting readiness waits and destroy calls
//
// Clones share the same state, so a test can keep one handle and give the
// other to the provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::Error;
use crate::config::ProviderConfig;
use crate::traits::flag_client::{
    Attributes, ClientFactory, FlagClient, FlagSnapshot, TreatmentResult,
};

/// One programmed flag
#[derive(Debug, Clone, PartialEq, Eq)]
struct FlagDefinition {
    treatment: String,
    config: Option<String>,
    change_number: i64,
}

#[derive(Debug, Clone, Copy)]
enum Readiness {
    /// Ready this long after the first readiness wait starts
    After(Duration),
    /// Ready from this instant on
    At(Instant),
    /// Never ready
    Never,
}

#[derive(Debug)]
struct Inner {
    flags: RwLock<HashMap<String, FlagDefinition>>,
    change_counter: AtomicI64,
    readiness: Mutex<Readiness>,
    destroy_delay: Mutex<Duration>,
    snapshot_delay: Mutex<Duration>,
    destroyed: AtomicBool,
    readiness_waits: AtomicUsize,
    destroy_calls: AtomicUsize,
    snapshot_calls: AtomicUsize,
    panic_after_snapshots: Mutex<Option<usize>>,
    last_evaluation: Mutex<Option<(String, Attributes)>>,
}

/// In-memory flag client
///
/// # Example
///
/// ```rust
/// use flagsync_core::client::InMemoryClient;
/// use flagsync_core::traits::FlagClient;
/// use std::time::Duration;
///
/// let client = InMemoryClient::new().with_ready_delay(Duration::from_millis(10));
/// client.set_flag("checkout", "on", None);
///
/// client.block_until_ready(Duration::from_secs(1)).unwrap();
/// assert!(client.is_ready());
/// assert_eq!(client.snapshot().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryClient {
    inner: Arc<Inner>,
}

impl InMemoryClient {
    /// A client that becomes ready as soon as it is waited on
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                flags: RwLock::new(HashMap::new()),
                change_counter: AtomicI64::new(0),
                readiness: Mutex::new(Readiness::After(Duration::ZERO)),
                destroy_delay: Mutex::new(Duration::ZERO),
                snapshot_delay: Mutex::new(Duration::ZERO),
                destroyed: AtomicBool::new(false),
                readiness_waits: AtomicUsize::new(0),
                destroy_calls: AtomicUsize::new(0),
                snapshot_calls: AtomicUsize::new(0),
                panic_after_snapshots: Mutex::new(None),
                last_evaluation: Mutex::new(None),
            }),
        }
    }

    /// Become ready `delay` after the first readiness wait starts
    pub fn with_ready_delay(self, delay: Duration) -> Self {
        *lock(&self.inner.readiness) = Readiness::After(delay);
        self
    }

    /// Never become ready; every readiness wait runs to its timeout
    pub fn never_ready(self) -> Self {
        *lock(&self.inner.readiness) = Readiness::Never;
        self
    }

    /// Make `destroy` block for `delay`
    pub fn with_destroy_delay(self, delay: Duration) -> Self {
        *lock(&self.inner.destroy_delay) = delay;
        self
    }


    /// Add a flag at construction time
    pub fn with_flag(self, name: &str, treatment: &str) -> Self {
        self.set_flag(name, treatment, None);
        self
    }

    /// Add or replace a flag, bumping its change number
    pub fn set_flag(&self, name: &str, treatment: &str, config: Option<&str>) {
        let change_number = self.inner.change_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let definition = FlagDefinition {
            treatment: treatment.to_string(),
            config: config.map(str::to_string),
            change_number,
        };
        self.inner
            .flags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), definition);
    }

    /// Remove a flag
    pub fn remove_flag(&self, name: &str) {
        self.inner
            .flags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// Make every later `snapshot` block for `delay`
    pub fn set_snapshot_delay(&self, delay: Duration) {
        *lock(&self.inner.snapshot_delay) = delay;
    }

    /// Panic inside `snapshot` once it has been called `calls` times
    pub fn panic_on_snapshot_after(&self, calls: usize) {
        *lock(&self.inner.panic_after_snapshots) = Some(calls);
    }

    /// Number of readiness waits started
    pub fn readiness_waits(&self) -> usize {
        self.inner.readiness_waits.load(Ordering::SeqCst)
    }

    /// Number of destroy calls
    pub fn destroy_calls(&self) -> usize {
        self.inner.destroy_calls.load(Ordering::SeqCst)
    }

    /// Whether `destroy` has completed
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Targeting key and attributes of the most recent evaluation
    pub fn last_evaluation(&self) -> Option<(String, Attributes)> {
        lock(&self.inner.last_evaluation).clone()
    }

    /// Resolve a pending delay into a fixed instant, starting the clock now
    fn start_readiness_clock(&self) -> Readiness {
        let mut readiness = lock(&self.inner.readiness);
        if let Readiness::After(delay) = *readiness {
            *readiness = Readiness::At(Instant::now() + delay);
        }
        *readiness
    }
}

impl Default for InMemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FlagClient for InMemoryClient {
    fn block_until_ready(&self, timeout: Duration) -> Result<(), Error> {
        self.inner.readiness_waits.fetch_add(1, Ordering::SeqCst);

        let ready_at = match self.start_readiness_clock() {
            Readiness::At(at) => at,
            Readiness::After(_) | Readiness::Never => {
                std::thread::sleep(timeout);
                return Err(Error::client("flag definitions never became available"));
            }
        };

        let remaining = ready_at.saturating_duration_since(Instant::now());
        if remaining > timeout {
            std::thread::sleep(timeout);
            return Err(Error::client(format!(
                "not ready after {}ms",
                timeout.as_millis()
            )));
        }

        std::thread::sleep(remaining);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        if self.is_destroyed() {
            return false;
        }
        match *lock(&self.inner.readiness) {
            Readiness::At(at) => Instant::now() >= at,
            Readiness::After(_) | Readiness::Never => false,
        }
    }

    fn snapshot(&self) -> FlagSnapshot {
        let calls = self.inner.snapshot_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let limit = *lock(&self.inner.panic_after_snapshots);
        if limit.is_some_and(|limit| calls > limit) {
            panic!("snapshot failed after {calls} calls");
        }
        let delay = *lock(&self.inner.snapshot_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        self.inner
            .flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, definition)| (name.clone(), definition.change_number))
            .collect()
    }

    fn treatment(&self, key: &str, flag: &str, attributes: &Attributes) -> TreatmentResult {
        *lock(&self.inner.last_evaluation) = Some((key.to_string(), attributes.clone()));

        if self.is_destroyed() {
            return TreatmentResult::control();
        }

        let flags = self.inner.flags.read().unwrap_or_else(PoisonError::into_inner);
        match flags.get(flag) {
            Some(definition) => TreatmentResult {
                treatment: definition.treatment.clone(),
                config: definition.config.clone(),
            },
            None => TreatmentResult::control(),
        }
    }

    fn destroy(&self) {
        self.inner.destroy_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.inner.destroy_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.inner.destroyed.store(true, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Factory handing out clones of one in-memory client
#[derive(Debug, Clone, Default)]
pub struct InMemoryClientFactory {
    client: InMemoryClient,
}

impl InMemoryClientFactory {
    /// Create a factory around `client`; keep a clone to observe the provider's use of it
    pub fn new(client: InMemoryClient) -> Self {
        Self { client }
    }
}

impl ClientFactory for InMemoryClientFactory {
    fn create(&self, _api_key: &str, _config: &ProviderConfig) -> Result<Box<dyn FlagClient>, Error> {
        Ok(Box::new(self.client.clone()))
    }
}
