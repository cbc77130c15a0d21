//! Configuration management

use crate::core::{BaselineConfig, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "cyclewatch";

/// Longest startup or shutdown guard band accepted (s)
pub const MAX_GUARD_SECS: f64 = 3600.0;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub sinks: SinkConfig,
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            alerts: AlertConfig::default(),
            sinks: SinkConfig::default(),
            channels: default_channels(),
        }
    }
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

        let app_config_dir = config_dir.join(APP_DIR);

        if !app_config_dir.exists() {
            fs::create_dir_all(&app_config_dir)?;
        }

        Ok(app_config_dir.join("config.toml"))
    }

    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            let config = Self::default();
            config.save_to(&path)?;
            return Ok(config);
        }

        Self::load_from(&path)
    }

    /// Load and validate configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations the monitor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(Error::Config("At least one channel must be configured".to_string()));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.name.trim().is_empty() {
                return Err(Error::Config("Channel name must not be empty".to_string()));
            }
            if !seen.insert(channel.name.as_str()) {
                return Err(Error::Config(format!("Duplicate channel name: {}", channel.name)));
            }
            let baseline = &channel.baseline;
            if baseline.low_fraction > baseline.high_fraction {
                return Err(Error::Config(format!(
                    "Channel {}: low_fraction {} exceeds high_fraction {}",
                    channel.name, baseline.low_fraction, baseline.high_fraction
                )));
            }
            for guard in [baseline.startup_guard_secs, baseline.shutdown_guard_secs] {
                if !(0.0..=MAX_GUARD_SECS).contains(&guard) {
                    return Err(Error::Config(format!(
                        "Channel {}: guard durations must be between 0 and {} s, got {}",
                        channel.name, MAX_GUARD_SECS, guard
                    )));
                }
            }
        }

        if !(self.general.sample_interval_secs > 0.0) {
            return Err(Error::Config("sample_interval_secs must be positive".to_string()));
        }
        let minutes = self.general.log_interval_minutes;
        if minutes == 0 || 60 % minutes != 0 {
            return Err(Error::Config(format!(
                "log_interval_minutes must divide the hour evenly (1-60), got {}",
                minutes
            )));
        }
        parse_hhmm(&self.alerts.status_time)?;

        Ok(())
    }

    /// Channel names in configured order
    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }

    /// Baseline document location, explicit or under the data directory
    pub fn baseline_path(&self) -> Result<PathBuf> {
        match &self.general.baseline_file {
            Some(path) => Ok(path.clone()),
            None => Ok(self.data_dir()?.join("baseline.json")),
        }
    }

    /// Directory for CSV logs and the SQLite database
    pub fn data_dir(&self) -> Result<PathBuf> {
        let dir = match &self.general.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))?
                .join(APP_DIR),
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Parse "HH:MM" into (hour, minute)
pub fn parse_hhmm(value: &str) -> Result<(u32, u32)> {
    let invalid = || Error::Config(format!("Invalid time of day (expected HH:MM): {}", value));
    let (h, m) = value.split_once(':').ok_or_else(invalid)?;
    let hour: u32 = h.trim().parse().map_err(|_| invalid())?;
    let minute: u32 = m.trim().parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

/// General sampling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Seconds between power samples
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: f64,
    /// Minutes between energy log roll-ups
    #[serde(default = "default_log_interval")]
    pub log_interval_minutes: u32,
    /// Baseline document path (defaults to the data directory)
    #[serde(default)]
    pub baseline_file: Option<PathBuf>,
    /// Output directory for CSV logs and the database
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_sample_interval() -> f64 { 0.5 }
fn default_log_interval() -> u32 { 15 }

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_sample_interval(),
            log_interval_minutes: default_log_interval(),
            baseline_file: None,
            data_dir: None,
        }
    }
}

/// Alert delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Send alerts at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum seconds between two alerts of the same kind for one channel
    #[serde(default = "default_min_alert_interval")]
    pub min_interval_between_alerts_secs: f64,
    /// Send a daily "yesterday summary"
    #[serde(default)]
    pub status_enabled: bool,
    /// Local time of the daily summary (HH:MM)
    #[serde(default = "default_status_time")]
    pub status_time: String,
}

fn default_true() -> bool { true }
fn default_min_alert_interval() -> f64 { 600.0 }
fn default_status_time() -> String { "12:00".to_string() }

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_between_alerts_secs: default_min_alert_interval(),
            status_enabled: false,
            status_time: default_status_time(),
        }
    }
}

/// Which record sinks are active
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_true")]
    pub csv_enabled: bool,
    #[serde(default)]
    pub database_enabled: bool,
    /// Log every on-sample to `logDetails_<channel>`
    #[serde(default)]
    pub details_enabled: bool,
    /// Days of records kept by the CSV logs and the database, 0 keeps everything
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 { 30 }

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            csv_enabled: true,
            database_enabled: false,
            details_enabled: false,
            retention_days: default_retention_days(),
        }
    }
}

/// One monitored circuit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Stable channel name
    pub name: String,
    /// Power above which the load counts as on (W)
    #[serde(default = "default_on_threshold")]
    pub on_threshold_watts: f64,
    /// Continuous on-time that raises a long-running alert (s)
    #[serde(default = "default_runtime_alert")]
    pub runtime_alert_secs: f64,
    /// Baseline tuning overlaid on the compiled-in defaults
    #[serde(default)]
    pub baseline: BaselineConfig,
    /// Synthetic load played back when no meter is attached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation: Option<DutyProfile>,
}

fn default_on_threshold() -> f64 { 20.0 }
fn default_runtime_alert() -> f64 { 30.0 * 60.0 }

impl ChannelConfig {
    pub fn new(name: &str, on_threshold_watts: f64) -> Self {
        Self {
            name: name.to_string(),
            on_threshold_watts,
            runtime_alert_secs: default_runtime_alert(),
            baseline: BaselineConfig::default(),
            simulation: None,
        }
    }

    /// Simulation profile, or one derived from the on-threshold
    pub fn duty_profile(&self) -> DutyProfile {
        self.simulation.clone().unwrap_or_else(|| DutyProfile {
            on_watts: self.on_threshold_watts * 20.0,
            ..DutyProfile::default()
        })
    }
}

/// Repeating on/off pattern of a simulated load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DutyProfile {
    /// Mean draw while on (W)
    #[serde(default = "default_on_watts")]
    pub on_watts: f64,
    #[serde(default = "default_on_secs")]
    pub on_secs: f64,
    #[serde(default = "default_off_secs")]
    pub off_secs: f64,
    /// Peak deviation around `on_watts` (W)
    #[serde(default)]
    pub ripple_watts: f64,
    /// Draw while off (W)
    #[serde(default)]
    pub idle_watts: f64,
    /// Offset into the pattern (s)
    #[serde(default)]
    pub phase_secs: f64,
}

fn default_on_watts() -> f64 { 400.0 }
fn default_on_secs() -> f64 { 60.0 }
fn default_off_secs() -> f64 { 240.0 }

impl Default for DutyProfile {
    fn default() -> Self {
        Self {
            on_watts: default_on_watts(),
            on_secs: default_on_secs(),
            off_secs: default_off_secs(),
            ripple_watts: 0.0,
            idle_watts: 0.0,
            phase_secs: 0.0,
        }
    }
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![ChannelConfig::new("Pump", default_on_threshold())]
}
