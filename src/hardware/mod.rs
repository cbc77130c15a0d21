//! Power sample sources
//!
//! The monitor never talks to a meter directly. A [`SampleSource`] answers
//! "how many watts is this channel drawing right now" and [`SampleMonitor`]
//! polls it for every channel once per tick.

mod scripted;

pub use scripted::ScriptedSource;

use crate::core::{ChannelReading, Result};

/// Something that can report instantaneous power per channel
pub trait SampleSource {
    /// Current draw of one channel in watts
    fn read_watts(&mut self, channel: &str, now: f64) -> Result<f64>;

    /// Name of this source
    fn name(&self) -> &str;

    /// Whether readings are synthetic
    fn is_simulated(&self) -> bool;
}

/// Polls a source for a fixed set of channels
pub struct SampleMonitor {
    source: Box<dyn SampleSource + Send>,
    channels: Vec<String>,
}

impl SampleMonitor {
    pub fn new(source: Box<dyn SampleSource + Send>, channels: Vec<String>) -> Self {
        if source.is_simulated() {
            log::warn!("Using simulated readings from {}", source.name());
        } else {
            log::info!("Reading power from {}", source.name());
        }
        Self { source, channels }
    }

    /// One reading per channel. Channels whose read fails are left out of
    /// this tick and logged.
    pub fn read_all(&mut self, now: f64) -> Vec<ChannelReading> {
        let mut readings = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            match self.source.read_watts(channel, now) {
                Ok(watts) => readings.push(ChannelReading::new(channel, watts)),
                Err(e) => log::warn!("{}: read failed: {}", channel, e),
            }
        }
        readings
    }

    pub fn get_source_name(&self) -> &str {
        self.source.name()
    }

    pub fn is_simulated(&self) -> bool {
        self.source.is_simulated()
    }
}
