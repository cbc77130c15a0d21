//! Persisted baseline document
//!
//! One JSON object keyed by channel name. Each value carries the channel's
//! full configuration and learned statistics as flat keys. Loading overlays
//! whatever the document holds onto the per-channel defaults, one field at a
//! time: unknown keys are ignored, missing or malformed ones keep the default.

use crate::core::{BaselineConfig, ChannelBaseline, Error, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::stats::population_summary;

/// Channel name to baseline, in the shape written to storage
pub type BaselineDocument = BTreeMap<String, ChannelBaseline>;

/// Storage backend for the baseline document
pub trait BaselineStore: Send {
    /// Read the raw persisted document, `None` if nothing was saved yet
    fn read(&self) -> Result<Option<Value>>;

    /// Overwrite the persisted document
    fn save(&self, document: &BaselineDocument) -> Result<()>;

    /// Load every configured channel, persisted values winning over defaults.
    ///
    /// Never fails: an unreadable or corrupt document is logged and the
    /// defaults are used. It is recreated on the next save.
    fn load(&self, defaults: &[(String, BaselineConfig)]) -> Vec<(String, ChannelBaseline)> {
        let persisted = match self.read() {
            Ok(Some(Value::Object(doc))) => doc,
            Ok(Some(_)) => {
                log::warn!("Baseline document is not an object, using defaults");
                Map::new()
            }
            Ok(None) => {
                log::info!("No baseline document yet, it will be created on first save");
                Map::new()
            }
            Err(e) => {
                log::warn!("Failed to read baseline document, using defaults: {}", e);
                Map::new()
            }
        };

        defaults
            .iter()
            .map(|(name, config)| {
                let base = ChannelBaseline::new(config.clone());
                let merged = match persisted.get(name) {
                    Some(value) => overlay(base, value),
                    None => base,
                };
                (name.clone(), merged)
            })
            .collect()
    }
}

fn field<T: DeserializeOwned>(obj: &Map<String, Value>, key: &str) -> Option<T> {
    let value = obj.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("Ignoring malformed baseline field {}: {}", key, e);
            None
        }
    }
}

macro_rules! overlay_fields {
    ($obj:expr, $target:expr, [$($name:ident),* $(,)?]) => {
        $(
            if let Some(v) = field($obj, stringify!($name)) {
                $target.$name = v;
            }
        )*
    };
}

/// Overlay the persisted fields of one channel onto its defaults
pub fn overlay(defaults: ChannelBaseline, persisted: &Value) -> ChannelBaseline {
    let Some(obj) = persisted.as_object() else {
        log::warn!("Baseline entry is not an object, using defaults");
        return defaults;
    };

    let mut merged = defaults;
    overlay_fields!(obj, merged.config, [
        startup_guard_secs,
        shutdown_guard_secs,
        learning_window,
        power_sigma_enabled,
        power_sigma_bound,
        runtime_sigma_enabled,
        runtime_sigma_bound,
        envelope_enabled,
        rated_power,
        rating_unit,
        low_fraction,
        high_fraction,
    ]);
    overlay_fields!(obj, merged.stats, [
        runtimes,
        powers,
        mean_runtime,
        stdev_runtime,
        mean_power,
        stdev_power,
    ]);

    enforce_window(&mut merged);
    merged
}

/// Keep the retained sequences paired and within the learning window.
///
/// Both sequences are cut to the shorter of the two and to the window,
/// keeping the earliest cycles, and the summaries are recomputed from what
/// remains. A document missing one of the sequences therefore restarts
/// learning instead of growing the other past the window.
fn enforce_window(baseline: &mut ChannelBaseline) {
    let window = baseline.config.learning_window;
    let stats = &mut baseline.stats;
    let keep = stats.runtimes.len().min(stats.powers.len()).min(window);
    if stats.runtimes.len() == keep && stats.powers.len() == keep {
        return;
    }

    log::warn!(
        "Baseline holds {} runtimes and {} powers for a learning window of {}, keeping {}",
        stats.runtimes.len(),
        stats.powers.len(),
        window,
        keep
    );
    stats.runtimes.truncate(keep);
    stats.powers.truncate(keep);

    let runtime = population_summary(&stats.runtimes);
    stats.mean_runtime = runtime.map_or(0.0, |s| s.mean);
    stats.stdev_runtime = runtime.map_or(0.0, |s| s.stdev);
    let power = population_summary(&stats.powers);
    stats.mean_power = power.map_or(0.0, |s| s.mean);
    stats.stdev_power = power.map_or(0.0, |s| s.stdev);
}

/// Baseline document stored as a JSON file
pub struct JsonBaselineStore {
    path: PathBuf,
}

impl JsonBaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BaselineStore for JsonBaselineStore {
    fn read(&self) -> Result<Option<Value>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let value = serde_json::from_str(&content)?;
        Ok(Some(value))
    }

    fn save(&self, document: &BaselineDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(document)?;

        // Write beside the target and rename so a crash never leaves half a document
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Baseline document kept in memory (tests and the demo)
#[derive(Default)]
pub struct InMemoryBaselineStore {
    document: Mutex<Option<Value>>,
}

impl InMemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing raw document
    pub fn with_document(document: Value) -> Self {
        Self {
            document: Mutex::new(Some(document)),
        }
    }

    /// The last saved document, if any
    pub fn document(&self) -> Option<Value> {
        self.document.lock().ok().and_then(|d| d.clone())
    }
}

impl BaselineStore for InMemoryBaselineStore {
    fn read(&self) -> Result<Option<Value>> {
        let doc = self
            .document
            .lock()
            .map_err(|_| Error::Serialization("baseline store lock poisoned".to_string()))?;
        Ok(doc.clone())
    }

    fn save(&self, document: &BaselineDocument) -> Result<()> {
        let value = serde_json::to_value(document)?;
        let mut doc = self
            .document
            .lock()
            .map_err(|_| Error::Serialization("baseline store lock poisoned".to_string()))?;
        *doc = Some(value);
        Ok(())
    }
}
