//! Core module - configuration, errors, and common types

mod config;
mod error;
pub mod format;
mod types;

pub use config::{parse_hhmm, AlertConfig, ChannelConfig, Config, DutyProfile, GeneralConfig, SinkConfig, MAX_GUARD_SECS};
pub use error::{Error, Result};
pub use types::{
    BaselineConfig, BaselineStats, ChannelBaseline, ChannelReading, ClosedCycle, RatingUnit,
    CYCLE_STATS_HEADER, HP_TO_WATTS,
};
