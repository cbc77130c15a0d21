//! Common types used across the application

use serde::{Deserialize, Serialize};

/// Watts per mechanical horsepower
pub const HP_TO_WATTS: f64 = 745.7;

/// Header of the per-cycle statistics record
pub const CYCLE_STATS_HEADER: &str = "Runtime (s),Avg (W),StdDev (W)";

/// A single instantaneous power reading for one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelReading {
    /// Channel name
    pub channel: String,
    /// Instantaneous power in watts
    pub power_watts: f64,
}

impl ChannelReading {
    pub fn new(channel: &str, power_watts: f64) -> Self {
        Self {
            channel: channel.to_string(),
            power_watts,
        }
    }
}

/// Unit the nameplate rating of a channel is expressed in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingUnit {
    #[default]
    Horsepower,
    Watts,
}

impl RatingUnit {
    /// How many watts one unit of rated capacity represents
    pub fn watts_per_unit(self) -> f64 {
        match self {
            RatingUnit::Horsepower => HP_TO_WATTS,
            RatingUnit::Watts => 1.0,
        }
    }

    /// Label used in envelope alert text
    pub fn label(self) -> &'static str {
        match self {
            RatingUnit::Horsepower => "HP",
            RatingUnit::Watts => "W",
        }
    }
}

/// Per-channel baseline tuning (persisted, user-tunable)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// Seconds of samples dropped at the start of each cycle
    #[serde(default = "default_guard")]
    pub startup_guard_secs: f64,
    /// Seconds of samples dropped at the end of each cycle
    #[serde(default = "default_guard")]
    pub shutdown_guard_secs: f64,
    /// Number of completed cycles that establish the baseline
    #[serde(default = "default_learning_window")]
    pub learning_window: usize,
    #[serde(default)]
    pub power_sigma_enabled: bool,
    #[serde(default = "default_sigma_bound")]
    pub power_sigma_bound: f64,
    #[serde(default)]
    pub runtime_sigma_enabled: bool,
    #[serde(default = "default_sigma_bound")]
    pub runtime_sigma_bound: f64,
    /// Fixed nameplate envelope check
    #[serde(default)]
    pub envelope_enabled: bool,
    #[serde(default = "default_rated_power")]
    pub rated_power: f64,
    #[serde(default)]
    pub rating_unit: RatingUnit,
    /// Lower admissible fraction of the rating (motors are inefficient below 50%)
    #[serde(default = "default_low_fraction")]
    pub low_fraction: f64,
    /// Upper admissible fraction of the rating (overloaded above 115%)
    #[serde(default = "default_high_fraction")]
    pub high_fraction: f64,
}

fn default_guard() -> f64 { 2.0 }
fn default_learning_window() -> usize { 21 }
fn default_sigma_bound() -> f64 { 3.0 }
fn default_rated_power() -> f64 { 0.5 }
fn default_low_fraction() -> f64 { 0.5 }
fn default_high_fraction() -> f64 { 1.15 }

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            startup_guard_secs: default_guard(),
            shutdown_guard_secs: default_guard(),
            learning_window: default_learning_window(),
            power_sigma_enabled: false,
            power_sigma_bound: default_sigma_bound(),
            runtime_sigma_enabled: false,
            runtime_sigma_bound: default_sigma_bound(),
            envelope_enabled: false,
            rated_power: default_rated_power(),
            rating_unit: RatingUnit::default(),
            low_fraction: default_low_fraction(),
            high_fraction: default_high_fraction(),
        }
    }
}

/// Learned per-channel statistics (persisted, derived)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineStats {
    /// Observed cycle runtimes in seconds, in arrival order
    pub runtimes: Vec<f64>,
    /// Observed cycle mean powers in watts, in arrival order
    pub powers: Vec<f64>,
    pub mean_runtime: f64,
    pub stdev_runtime: f64,
    pub mean_power: f64,
    pub stdev_power: f64,
}

impl BaselineStats {
    /// Number of cycles folded into the baseline so far
    pub fn cycles_seen(&self) -> usize {
        self.runtimes.len().min(self.powers.len())
    }

    /// Whether the learning window has been filled
    pub fn is_frozen(&self, learning_window: usize) -> bool {
        self.cycles_seen() >= learning_window
    }
}

/// Configuration and learned statistics of one channel.
///
/// Serialized flat: config and stats keys share one object per channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelBaseline {
    #[serde(flatten)]
    pub config: BaselineConfig,
    #[serde(flatten)]
    pub stats: BaselineStats,
}

impl ChannelBaseline {
    pub fn new(config: BaselineConfig) -> Self {
        Self {
            config,
            stats: BaselineStats::default(),
        }
    }
}

/// Statistics of one completed on-cycle after guard-band trimming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedCycle {
    pub channel: String,
    /// Mean power over the trimmed samples (W)
    pub mean_power: f64,
    /// Population standard deviation over the trimmed samples (W)
    pub stdev_power: f64,
    /// Elapsed seconds from on-transition to off-transition
    pub run_time: f64,
}

impl ClosedCycle {
    /// Row for the `logStats_<channel>` record
    pub fn stats_row(&self) -> String {
        format!("{:.1},{:.1},{:.1}", self.run_time, self.mean_power, self.stdev_power)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_row_format() {
        let cycle = ClosedCycle {
            channel: "Sump".into(),
            mean_power: 412.349,
            stdev_power: 3.06,
            run_time: 37.5,
        };
        assert_eq!(cycle.stats_row(), "37.5,412.3,3.1");
    }

    #[test]
    fn test_baseline_config_partial_toml() {
        let config: BaselineConfig = toml::from_str("learning_window = 5\npower_sigma_enabled = true").unwrap();
        assert_eq!(config.learning_window, 5);
        assert!(config.power_sigma_enabled);
        assert_eq!(config.startup_guard_secs, 2.0);
        assert_eq!(config.high_fraction, 1.15);
        assert_eq!(config.rating_unit, RatingUnit::Horsepower);
    }

    #[test]
    fn test_rating_unit_defaults_to_horsepower() {
        assert_eq!(RatingUnit::default(), RatingUnit::Horsepower);
        assert_eq!(RatingUnit::default().watts_per_unit(), HP_TO_WATTS);
    }

    #[test]
    fn test_frozen_after_window() {
        let mut stats = BaselineStats::default();
        assert!(!stats.is_frozen(2));
        stats.runtimes = vec![10.0, 11.0];
        stats.powers = vec![100.0, 101.0];
        assert!(stats.is_frozen(2));
        assert_eq!(stats.cycles_seen(), 2);
    }
}
