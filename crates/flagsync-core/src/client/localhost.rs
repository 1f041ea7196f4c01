// # Localhost Flag Client
//
// Flag client backed by a local JSON file ("localhost mode").
//
// ## File Format
//
// ```json
// {
//   "checkout": { "treatment": "on", "config": { "color": "blue" } },
//   "theme":    { "treatment": "dark" }
// }
// ```
//
// `config` may be a JSON object or a string holding JSON text.
//
// ## Reload Behavior
//
// - The file is first read by the readiness wait, which retries until the
//   file parses or the timeout elapses
// - Each `snapshot()` re-reads the file when its modification time or size
//   changed since the last load
// - A definition whose content changed gets a new change number; unchanged
//   definitions keep theirs
// - A reload that fails to parse keeps the previous definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

use crate::Error;
use crate::config::ProviderConfig;
use crate::traits::flag_client::{
    Attributes, ClientFactory, FlagClient, FlagSnapshot, TreatmentResult,
};

/// Delay between attempts while the flag file is missing or malformed
const RELOAD_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// One entry of the flag file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagEntry {
    /// Treatment served for every key
    pub treatment: String,

    /// Dynamic configuration
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

impl FlagEntry {
    fn to_result(&self) -> TreatmentResult {
        let config = self.config.as_ref().map(|value| match value {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        });
        TreatmentResult {
            treatment: self.treatment.clone(),
            config,
        }
    }
}

/// Fingerprint used to detect file modifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

#[derive(Debug, Default)]
struct LoadedFlags {
    definitions: HashMap<String, (FlagEntry, i64)>,
    stamp: Option<FileStamp>,
    next_change_number: i64,
    loaded: bool,
}

impl LoadedFlags {
    /// Merge freshly parsed entries, keeping change numbers of unchanged ones
    fn merge(&mut self, entries: HashMap<String, FlagEntry>, stamp: FileStamp) -> usize {
        let mut changed = 0;
        let mut definitions = HashMap::with_capacity(entries.len());

        for (name, entry) in entries {
            let unchanged = self
                .definitions
                .get(&name)
                .filter(|(previous, _)| *previous == entry)
                .map(|(_, number)| *number);
            let change_number = match unchanged {
                Some(number) => number,
                None => {
                    changed += 1;
                    self.next_change_number += 1;
                    self.next_change_number
                }
            };
            definitions.insert(name, (entry, change_number));
        }

        changed += self
            .definitions
            .keys()
            .filter(|name| !definitions.contains_key(*name))
            .count();

        self.definitions = definitions;
        self.stamp = Some(stamp);
        self.loaded = true;
        changed
    }
}

/// Flag client reading definitions from a JSON file
#[derive(Debug)]
pub struct LocalhostClient {
    path: PathBuf,
    state: RwLock<LoadedFlags>,
    destroyed: AtomicBool,
}

impl LocalhostClient {
    /// Create a client for `path`. The file is not read until the readiness wait.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(LoadedFlags::default()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Path of the flag file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stamp(&self) -> Result<FileStamp, Error> {
        let metadata = std::fs::metadata(&self.path)?;
        Ok(FileStamp {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }

    fn read_entries(&self) -> Result<HashMap<String, FlagEntry>, Error> {
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Read the file and merge it into the loaded definitions
    fn load(&self) -> Result<usize, Error> {
        let stamp = self.stamp()?;
        let entries = self.read_entries()?;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let changed = state.merge(entries, stamp);
        debug!(
            path = %self.path.display(),
            flags = state.definitions.len(),
            changed,
            "flag file loaded"
        );
        Ok(changed)
    }

    /// Reload when the file changed since the last load
    fn refresh(&self) {
        let previous = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if !state.loaded {
                return;
            }
            state.stamp
        };

        match self.stamp() {
            Ok(stamp) if Some(stamp) == previous => {}
            Ok(_) => {
                if let Err(e) = self.load() {
                    warn!(path = %self.path.display(), error = %e, "failed to reload flag file, keeping previous definitions");
                }
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "flag file unavailable, keeping previous definitions");
            }
        }
    }
}

impl FlagClient for LocalhostClient {
    fn block_until_ready(&self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        loop {
            let err = match self.load() {
                Ok(_) => return Ok(()),
                Err(e) => e,
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::client(format!(
                    "failed to load flag file {}: {err}",
                    self.path.display()
                )));
            }
            std::thread::sleep(RELOAD_RETRY_INTERVAL.min(deadline - now));
        }
    }

    fn is_ready(&self) -> bool {
        !self.destroyed.load(Ordering::SeqCst)
            && self
                .state
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .loaded
    }

    fn snapshot(&self) -> FlagSnapshot {
        self.refresh();
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .definitions
            .iter()
            .map(|(name, (_, change_number))| (name.clone(), *change_number))
            .collect()
    }

    fn treatment(&self, _key: &str, flag: &str, _attributes: &Attributes) -> TreatmentResult {
        if self.destroyed.load(Ordering::SeqCst) {
            return TreatmentResult::control();
        }
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .definitions
            .get(flag)
            .map(|(entry, _)| entry.to_result())
            .unwrap_or_else(TreatmentResult::control)
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

/// Factory for [`LocalhostClient`]
///
/// Requires `flag_file` to be set in the provider configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalhostClientFactory;

impl ClientFactory for LocalhostClientFactory {
    fn create(&self, _api_key: &str, config: &ProviderConfig) -> Result<Box<dyn FlagClient>, Error> {
        let path = config
            .flag_file
            .as_ref()
            .ok_or_else(|| Error::config("localhost mode requires a flag file"))?;
        Ok(Box::new(LocalhostClient::new(path)))
    }
}
