// # Flag Client Trait
//
// Defines the interface of the wrapped remote configuration / feature-flag client.
//
// ## Implementations
//
// - In-memory, programmable: `client::InMemoryClient`
// - Local flag file: `client::LocalhostClient`
// - Remote SDK bindings live outside this crate
//
// ## Usage
//
// ```rust,ignore
// use flagsync_core::traits::FlagClient;
// use std::time::Duration;
//
// fn warm_up(client: &dyn FlagClient) -> flagsync_core::Result<()> {
//     // Blocks the calling thread; there is no way to interrupt it
//     client.block_until_ready(Duration::from_secs(10))?;
//     println!("{} flags loaded", client.snapshot().len());
//     Ok(())
// }
// ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Evaluation attributes handed to the client (targeting key excluded)
pub type Attributes = HashMap<String, serde_json::Value>;

/// Raw outcome of a single flag lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentResult {
    /// Treatment name (`"control"` when the flag is unknown)
    pub treatment: String,
    /// Dynamic configuration attached to the treatment, as raw JSON text
    pub config: Option<String>,
}

impl TreatmentResult {
    /// A treatment without dynamic configuration
    pub fn new(treatment: impl Into<String>) -> Self {
        Self {
            treatment: treatment.into(),
            config: None,
        }
    }

    /// The control treatment
    pub fn control() -> Self {
        Self::new(crate::config::CONTROL_TREATMENT)
    }

    /// Attach dynamic configuration
    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = Some(config.into());
        self
    }
}

/// Flag name → change number, as reported by the client at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSnapshot {
    versions: HashMap<String, i64>,
}

impl FlagSnapshot {
    /// An empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a flag's change number
    pub fn insert(&mut self, name: impl Into<String>, change_number: i64) {
        self.versions.insert(name.into(), change_number);
    }

    /// Change number of a flag, if present
    pub fn get(&self, name: &str) -> Option<i64> {
        self.versions.get(name).copied()
    }

    /// Number of flags
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Whether the snapshot holds no flags
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Iterate over `(name, change_number)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.versions.iter().map(|(name, version)| (name.as_str(), *version))
    }
}

impl<S: Into<String>> FromIterator<(S, i64)> for FlagSnapshot {
    fn from_iter<I: IntoIterator<Item = (S, i64)>>(iter: I) -> Self {
        Self {
            versions: iter
                .into_iter()
                .map(|(name, version)| (name.into(), version))
                .collect(),
        }
    }
}

/// Trait for wrapped flag client implementations
///
/// All methods are synchronous. The lifecycle core moves the ones that can
/// block ([`block_until_ready`](FlagClient::block_until_ready) and
/// [`destroy`](FlagClient::destroy)) onto the blocking pool and never holds
/// the provider's exclusive lock while they run.
///
/// # Ownership
///
/// The provider owns the client exclusively between construction and
/// shutdown. Implementations must not be destroyed or waited on by anyone
/// else while a provider holds them.
pub trait FlagClient: Send + Sync {
    /// Block until the initial definitions are loaded, or fail after `timeout`
    ///
    /// This call has no cancellation; it returns only when the client is ready
    /// or its own bound elapses.
    fn block_until_ready(&self, timeout: Duration) -> Result<(), crate::Error>;

    /// Whether the initial definitions are loaded
    fn is_ready(&self) -> bool;

    /// Current flag name → change number mapping
    fn snapshot(&self) -> FlagSnapshot;

    /// Evaluate one flag for a targeting key
    fn treatment(&self, key: &str, flag: &str, attributes: &Attributes) -> TreatmentResult;

    /// Release the client's resources. May block for an arbitrary time.
    fn destroy(&self);
}

/// Helper trait for constructing flag clients from configuration
pub trait ClientFactory: Send + Sync {
    /// Create a FlagClient instance
    ///
    /// # Parameters
    ///
    /// - `api_key`: SDK key or `"localhost"`
    /// - `config`: Provider configuration
    fn create(
        &self,
        api_key: &str,
        config: &crate::config::ProviderConfig,
    ) -> Result<Box<dyn FlagClient>, crate::Error>;
}

impl<F> ClientFactory for F
where
    F: Fn(&str, &crate::config::ProviderConfig) -> Result<Box<dyn FlagClient>, crate::Error>
        + Send
        + Sync,
{
    fn create(
        &self,
        api_key: &str,
        config: &crate::config::ProviderConfig,
    ) -> Result<Box<dyn FlagClient>, crate::Error> {
        self(api_key, config)
    }
}
