//! # Counter Store
//!
//! Persistent name → value counters for the photobooth (photos taken, prints made, ...).
//! The set of counter names is fixed when the store is opened; values only move through
//! `set`, `increment` and `reset`, and every mutation is written back to disk.
//!
//! ## File Format
//!
//! The store is a flat TOML table, one key per counter:
//!
//! ```text
//! forgotten = 0
//! printed = 12
//! remaining_duplicates = 3
//! taken = 40
//! ```
//!
//! Missing keys are filled from the declared defaults, unknown keys are dropped with a
//! warning so a schema change never prevents startup.

pub mod snapshot;

pub use snapshot::{CounterSnapshot, SyncEvent, EVENT_KEY};

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Counter holding the number of photos taken.
pub const TAKEN: &str = "taken";
/// Counter holding the number of prints sent to the printer.
pub const PRINTED: &str = "printed";
/// Counter holding the number of captures nobody printed or kept.
pub const FORGOTTEN: &str = "forgotten";
/// Counter holding the number of duplicates left for the current capture.
pub const REMAINING_DUPLICATES: &str = "remaining_duplicates";

pub type CounterValues = BTreeMap<String, u64>;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("unknown counter '{0}'")]
    Unknown(String),

    #[error("'{0}' is reserved for the published event and cannot name a counter")]
    Reserved(String),

    #[error("failed to read counters file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write counters file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("counters file {path} is malformed: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize counters: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// One observed mutation, returned by `set` and `increment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterChange {
    pub name: String,
    pub previous: u64,
    pub current: u64,
}

impl CounterChange {
    /// True when the counter moved up by exactly one step.
    pub fn is_single_step(&self) -> bool {
        self.previous.checked_add(1) == Some(self.current)
    }
}

/// The pibooth counter schema with every value at zero.
pub fn default_counters() -> CounterValues {
    [TAKEN, PRINTED, FORGOTTEN, REMAINING_DUPLICATES]
        .into_iter()
        .map(|name| (name.to_string(), 0))
        .collect()
}

#[derive(Debug)]
pub struct CounterStore {
    path: PathBuf,
    defaults: CounterValues,
    values: CounterValues,
}

impl CounterStore {
    /// Opens the store at `path`, creating it from `defaults` if the file does not exist.
    pub fn open(path: impl Into<PathBuf>, defaults: CounterValues) -> Result<Self, CounterError> {
        let path = path.into();
        if defaults.contains_key(EVENT_KEY) {
            return Err(CounterError::Reserved(EVENT_KEY.to_string()));
        }
        let mut values = defaults.clone();

        if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| CounterError::Read {
                path: path.clone(),
                source,
            })?;
            let stored: CounterValues =
                toml::from_str(&content).map_err(|source| CounterError::Parse {
                    path: path.clone(),
                    source,
                })?;

            for (name, value) in stored {
                match values.get_mut(&name) {
                    Some(slot) => *slot = value,
                    None => warn!("Dropping unknown counter '{}' from {}", name, path.display()),
                }
            }
            info!("Loaded counters from {}", path.display());
        } else {
            info!(
                "Counters file {} does not exist, starting from defaults",
                path.display()
            );
        }

        let store = Self {
            path,
            defaults,
            values,
        };
        store.save()?;
        Ok(store)
    }

    pub fn values(&self) -> &CounterValues {
        &self.values
    }

    pub fn get(&self, name: &str) -> Result<u64, CounterError> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| CounterError::Unknown(name.to_string()))
    }

    pub fn set(&mut self, name: &str, value: u64) -> Result<CounterChange, CounterError> {
        let slot = self
            .values
            .get_mut(name)
            .ok_or_else(|| CounterError::Unknown(name.to_string()))?;
        let previous = std::mem::replace(slot, value);
        self.save()?;

        debug!("Counter {} changed {} -> {}", name, previous, value);
        Ok(CounterChange {
            name: name.to_string(),
            previous,
            current: value,
        })
    }

    pub fn increment(&mut self, name: &str) -> Result<CounterChange, CounterError> {
        let current = self.get(name)?;
        self.set(name, current.saturating_add(1))
    }

    /// Puts every counter back to its declared default.
    pub fn reset(&mut self) -> Result<(), CounterError> {
        self.values = self.defaults.clone();
        self.save()?;
        info!("Counters reset to defaults");
        Ok(())
    }

    pub fn save(&self) -> Result<(), CounterError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| CounterError::Write {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }

        let content = toml::to_string_pretty(&self.values)?;
        fs::write(&self.path, content).map_err(|source| CounterError::Write {
            path: self.path.clone(),
            source,
        })
    }
}
