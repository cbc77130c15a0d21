//! Deterministic synthetic loads
//!
//! Each channel follows a repeating on/off pattern keyed to the sample
//! timestamp, so the same instant always produces the same reading.

use crate::core::{ChannelConfig, DutyProfile, Error, Result};
use crate::hardware::SampleSource;
use std::collections::HashMap;
use std::f64::consts::TAU;

/// Seconds per ripple oscillation while on
const RIPPLE_PERIOD_SECS: f64 = 7.0;

pub struct ScriptedSource {
    profiles: HashMap<String, DutyProfile>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            profiles: HashMap::new(),
        }
    }

    /// One profile per configured channel
    pub fn from_channels(channels: &[ChannelConfig]) -> Self {
        let mut source = Self::new();
        for channel in channels {
            source.set_profile(&channel.name, channel.duty_profile());
        }
        source
    }

    pub fn with_profile(mut self, channel: &str, profile: DutyProfile) -> Self {
        self.set_profile(channel, profile);
        self
    }

    pub fn set_profile(&mut self, channel: &str, profile: DutyProfile) {
        self.profiles.insert(channel.to_string(), profile);
    }

    fn watts_at(profile: &DutyProfile, now: f64) -> f64 {
        let period = profile.on_secs + profile.off_secs;
        if !(period > 0.0) {
            return profile.idle_watts;
        }

        let t = (now + profile.phase_secs).rem_euclid(period);
        if t < profile.on_secs {
            profile.on_watts + profile.ripple_watts * (TAU * t / RIPPLE_PERIOD_SECS).sin()
        } else {
            profile.idle_watts
        }
    }
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for ScriptedSource {
    fn read_watts(&mut self, channel: &str, now: f64) -> Result<f64> {
        let profile = self
            .profiles
            .get(channel)
            .ok_or_else(|| Error::Source(format!("no scripted profile for {}", channel)))?;
        Ok(Self::watts_at(profile, now))
    }

    fn name(&self) -> &str {
        "Scripted duty cycle (no meter)"
    }

    fn is_simulated(&self) -> bool {
        true
    }
}
