//! On/off cycle detection per channel
//!
//! Each channel is a two-state machine driven by instantaneous power samples.
//! While on, samples are buffered; on the off transition the buffer is trimmed
//! by the startup/shutdown guard bands and summarised into a [`ClosedCycle`].
//!
//! A load that stays on for a long time does not grow the buffer without
//! bound. Once it holds [`MAX_BUFFERED_SAMPLES`] beyond both guard bands, the
//! samples between the bands are folded into a running mean and variance and
//! dropped; only the guard-band samples stay buffered.

use crate::baseline::population_summary;
use crate::core::{ClosedCycle, Error, Result};
use std::collections::HashMap;

/// A cycle needs more than this many samples after trimming to count
pub const MIN_CYCLE_SAMPLES: usize = 10;

/// Samples kept between the guard bands before they are folded
pub const MAX_BUFFERED_SAMPLES: usize = 1 << 16;

/// Per-channel detection settings
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    /// Power above which the channel counts as on (W)
    pub on_threshold_watts: f64,
    pub startup_guard_secs: f64,
    pub shutdown_guard_secs: f64,
    /// Continuous on-time that raises a long-running condition, `None` to disable
    pub runtime_alert_secs: Option<f64>,
    /// Minimum seconds between two long-running conditions
    pub min_alert_interval_secs: f64,
}

/// What a single sample did to its channel
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    /// Below threshold and already off
    Idle,
    /// Off to on transition
    Started,
    /// Still on. `long_running` carries the elapsed on-time when the
    /// long-running condition fires on this sample.
    Running { long_running: Option<f64> },
    /// On to off transition. `cycle` is `None` when too few samples
    /// survived trimming.
    Stopped { run_time: f64, cycle: Option<ClosedCycle> },
}

impl SampleOutcome {
    pub fn is_on(&self) -> bool {
        matches!(self, SampleOutcome::Started | SampleOutcome::Running { .. })
    }
}

/// Running mean and sum of squared deviations (Welford)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Folded {
    count: usize,
    mean: f64,
    m2: f64,
}

impl Folded {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }
}

#[derive(Debug)]
struct ChannelCycle {
    settings: TrackerSettings,
    is_on: bool,
    on_timestamp: f64,
    samples: Vec<f64>,
    /// Samples already folded out of the middle of `samples`
    folded: Folded,
    last_long_run_alert: Option<f64>,
}

impl ChannelCycle {
    fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            is_on: false,
            on_timestamp: 0.0,
            samples: Vec::new(),
            folded: Folded::default(),
            last_long_run_alert: None,
        }
    }

    fn guards(&self, interval: f64) -> (usize, usize) {
        (
            guard_samples(self.settings.startup_guard_secs, interval),
            guard_samples(self.settings.shutdown_guard_secs, interval),
        )
    }

    fn buffer(&mut self, power_watts: f64, interval: f64) {
        self.samples.push(power_watts);

        let (front, back) = self.guards(interval);
        let limit = front.saturating_add(back).saturating_add(MAX_BUFFERED_SAMPLES);
        if self.samples.len() < limit {
            return;
        }

        let end = self.samples.len() - back;
        for value in self.samples.drain(front..end) {
            self.folded.push(value);
        }
    }
}

/// Cycle state machine for every monitored channel
#[derive(Debug)]
pub struct CycleTracker {
    sample_interval_secs: f64,
    channels: HashMap<String, ChannelCycle>,
}

impl CycleTracker {
    pub fn new(sample_interval_secs: f64) -> Self {
        Self {
            sample_interval_secs,
            channels: HashMap::new(),
        }
    }

    /// Register (or reconfigure) a channel
    pub fn add_channel(&mut self, name: &str, settings: TrackerSettings) {
        match self.channels.get_mut(name) {
            Some(state) => state.settings = settings,
            None => {
                self.channels.insert(name.to_string(), ChannelCycle::new(settings));
            }
        }
    }

    /// Replace the on-threshold supplied for a channel
    pub fn set_on_threshold(&mut self, name: &str, watts: f64) -> Result<()> {
        let state = self
            .channels
            .get_mut(name)
            .ok_or_else(|| Error::UnknownChannel(name.to_string()))?;
        state.settings.on_threshold_watts = watts;
        Ok(())
    }

    pub fn is_on(&self, name: &str) -> bool {
        self.channels.get(name).map_or(false, |s| s.is_on)
    }

    /// Number of samples held in memory for the cycle in progress
    pub fn buffered(&self, name: &str) -> usize {
        self.channels.get(name).map_or(0, |s| s.samples.len())
    }

    /// Feed one instantaneous power sample taken at `now` (unix seconds).
    ///
    /// Negative or non-finite power is treated as below threshold.
    pub fn on_sample(&mut self, name: &str, power_watts: f64, now: f64) -> Result<SampleOutcome> {
        let interval = self.sample_interval_secs;
        let state = self
            .channels
            .get_mut(name)
            .ok_or_else(|| Error::UnknownChannel(name.to_string()))?;

        let valid = power_watts.is_finite() && power_watts >= 0.0;
        if !valid {
            log::warn!("{}: rejecting invalid power sample {}", name, power_watts);
        }

        if valid && power_watts > state.settings.on_threshold_watts {
            state.buffer(power_watts, interval);

            if !state.is_on {
                state.is_on = true;
                state.on_timestamp = now;
                log::debug!("{}: on at {:.1} W", name, power_watts);
                return Ok(SampleOutcome::Started);
            }

            return Ok(SampleOutcome::Running {
                long_running: check_long_running(state, now),
            });
        }

        if !state.is_on {
            return Ok(SampleOutcome::Idle);
        }

        state.is_on = false;
        let run_time = now - state.on_timestamp;
        let (front, back) = state.guards(interval);
        let samples = std::mem::take(&mut state.samples);
        let folded = std::mem::take(&mut state.folded);
        let cycle = summarize(name, trim_guard_bands(&samples, front, back), folded, run_time);
        log::debug!(
            "{}: off after {:.1} s ({} samples)",
            name,
            run_time,
            samples.len() + folded.count
        );

        Ok(SampleOutcome::Stopped { run_time, cycle })
    }
}

fn check_long_running(state: &mut ChannelCycle, now: f64) -> Option<f64> {
    let limit = state.settings.runtime_alert_secs?;
    let elapsed = now - state.on_timestamp;
    if elapsed <= limit {
        return None;
    }

    let resend_ok = state
        .last_long_run_alert
        .map_or(true, |last| now > last + state.settings.min_alert_interval_secs);
    if !resend_ok {
        return None;
    }

    state.last_long_run_alert = Some(now);
    Some(elapsed)
}

/// Samples covered by a guard band, rounded up to whole samples
pub fn guard_samples(guard_secs: f64, sample_interval_secs: f64) -> usize {
    if !(guard_secs > 0.0) || !(sample_interval_secs > 0.0) {
        return 0;
    }
    let ratio = guard_secs / sample_interval_secs;
    let nearest = ratio.round();
    // Exact multiples must not be pushed up by float noise (2.0 / 0.1)
    if (ratio - nearest).abs() < 1e-9 {
        nearest as usize
    } else {
        ratio.ceil() as usize
    }
}

/// Drop the guard bands from both ends of a cycle's samples
pub fn trim_guard_bands(samples: &[f64], front: usize, back: usize) -> &[f64] {
    if front.saturating_add(back) >= samples.len() {
        return &[];
    }
    &samples[front..samples.len() - back]
}

fn summarize(name: &str, trimmed: &[f64], folded: Folded, run_time: f64) -> Option<ClosedCycle> {
    let count = folded.count + trimmed.len();
    if count <= MIN_CYCLE_SAMPLES {
        log::debug!("{}: {} samples after trimming, not a real cycle", name, count);
        return None;
    }

    let (mean_power, stdev_power) = if folded.count == 0 {
        let summary = population_summary(trimmed)?;
        (summary.mean, summary.stdev)
    } else {
        let mut all = folded;
        for &value in trimmed {
            all.push(value);
        }
        (all.mean, (all.m2 / all.count as f64).sqrt())
    };

    Some(ClosedCycle {
        channel: name.to_string(),
        mean_power,
        stdev_power,
        run_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(startup: f64, shutdown: f64) -> TrackerSettings {
        TrackerSettings {
            on_threshold_watts: 5.0,
            startup_guard_secs: startup,
            shutdown_guard_secs: shutdown,
            runtime_alert_secs: None,
            min_alert_interval_secs: 600.0,
        }
    }

    fn tracker(startup: f64, shutdown: f64) -> CycleTracker {
        let mut tracker = CycleTracker::new(0.5);
        tracker.add_channel("Sump", settings(startup, shutdown));
        tracker
    }

    /// Run one on-period of `samples` readings starting at `start`, then one off reading
    fn run_cycle(tracker: &mut CycleTracker, samples: &[f64], start: f64) -> SampleOutcome {
        let mut t = start;
        for &p in samples {
            tracker.on_sample("Sump", p, t).unwrap();
            t += 0.5;
        }
        tracker.on_sample("Sump", 0.0, t).unwrap()
    }

    #[test]
    fn test_guard_samples() {
        assert_eq!(guard_samples(2.0, 0.5), 4);
        assert_eq!(guard_samples(2.2, 0.5), 5);
        assert_eq!(guard_samples(120.0, 0.5), 240);
        assert_eq!(guard_samples(2.0, 0.1), 20);
        assert_eq!(guard_samples(0.0, 0.5), 0);
    }

    #[test]
    fn test_trim_law() {
        let samples: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let front = guard_samples(2.0, 0.5);
        let back = guard_samples(2.0, 0.5);
        let trimmed = trim_guard_bands(&samples, front, back);
        assert_eq!(trimmed.len(), 22);
        assert_eq!(trimmed[0], 4.0);
        assert_eq!(trimmed[21], 25.0);
    }

    #[test]
    fn test_trim_overlapping_guards_is_empty() {
        let samples = [1.0; 6];
        assert!(trim_guard_bands(&samples, 4, 4).is_empty());
        assert_eq!(trim_guard_bands(&samples, 0, 0).len(), 6);
    }

    #[test]
    fn test_huge_guards_never_overflow() {
        let samples = [1.0; 6];
        assert!(trim_guard_bands(&samples, usize::MAX, 1).is_empty());
        assert_eq!(guard_samples(1e30, 0.5), usize::MAX);

        let mut tracker = tracker(1e30, 0.5);
        assert_eq!(tracker.on_sample("Sump", 50.0, 0.0).unwrap(), SampleOutcome::Started);
        match tracker.on_sample("Sump", 0.0, 0.5).unwrap() {
            SampleOutcome::Stopped { run_time, cycle } => {
                assert_eq!(run_time, 0.5);
                assert!(cycle.is_none());
            }
            other => panic!("expected stop, got {:?}", other),
        }
    }

    #[test]
    fn test_long_cycle_keeps_buffer_bounded() {
        let mut tracker = tracker(2.0, 2.0);
        let mut t = 0.0;
        for _ in 0..4 {
            tracker.on_sample("Sump", 900.0, t).unwrap();
            t += 0.5;
        }
        for i in 0..2 * MAX_BUFFERED_SAMPLES {
            let watts = if i % 2 == 0 { 100.0 } else { 102.0 };
            tracker.on_sample("Sump", watts, t).unwrap();
            t += 0.5;
            assert!(tracker.buffered("Sump") <= MAX_BUFFERED_SAMPLES + 8);
        }
        for _ in 0..4 {
            tracker.on_sample("Sump", 20.0, t).unwrap();
            t += 0.5;
        }

        match tracker.on_sample("Sump", 0.0, t).unwrap() {
            SampleOutcome::Stopped { cycle: Some(cycle), .. } => {
                assert!((cycle.mean_power - 101.0).abs() < 1e-9);
                assert!((cycle.stdev_power - 1.0).abs() < 1e-9);
                assert_eq!(cycle.run_time, t);
            }
            other => panic!("expected closed cycle, got {:?}", other),
        }
        assert_eq!(tracker.buffered("Sump"), 0);
    }

    #[test]
    fn test_state_transitions() {
        let mut tracker = tracker(0.0, 0.0);
        assert_eq!(tracker.on_sample("Sump", 1.0, 0.0).unwrap(), SampleOutcome::Idle);
        assert_eq!(tracker.on_sample("Sump", 50.0, 0.5).unwrap(), SampleOutcome::Started);
        assert!(tracker.is_on("Sump"));
        assert_eq!(
            tracker.on_sample("Sump", 50.0, 1.0).unwrap(),
            SampleOutcome::Running { long_running: None }
        );
        // Exactly at threshold counts as off
        match tracker.on_sample("Sump", 5.0, 1.5).unwrap() {
            SampleOutcome::Stopped { run_time, cycle } => {
                assert_eq!(run_time, 1.0);
                assert!(cycle.is_none());
            }
            other => panic!("expected stop, got {:?}", other),
        }
        assert!(!tracker.is_on("Sump"));
        assert_eq!(tracker.buffered("Sump"), 0);
    }

    #[test]
    fn test_cycle_statistics_after_trim() {
        let mut tracker = tracker(2.0, 2.0);
        // Inrush and spin-down samples fall inside the guard bands
        let mut samples = vec![900.0; 4];
        samples.extend(std::iter::repeat(100.0).take(11));
        samples.extend(std::iter::repeat(102.0).take(11));
        samples.extend(vec![20.0; 4]);
        assert_eq!(samples.len(), 30);

        match run_cycle(&mut tracker, &samples, 1000.0) {
            SampleOutcome::Stopped { run_time, cycle: Some(cycle) } => {
                assert_eq!(run_time, 15.0);
                assert_eq!(cycle.mean_power, 101.0);
                assert_eq!(cycle.stdev_power, 1.0);
                assert_eq!(cycle.run_time, 15.0);
                assert_eq!(cycle.channel, "Sump");
            }
            other => panic!("expected closed cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_minimum_sample_count() {
        let mut tracker = tracker(0.0, 0.0);
        match run_cycle(&mut tracker, &[50.0; 10], 0.0) {
            SampleOutcome::Stopped { cycle, .. } => assert!(cycle.is_none()),
            other => panic!("unexpected {:?}", other),
        }
        match run_cycle(&mut tracker, &[50.0; 11], 100.0) {
            SampleOutcome::Stopped { cycle, .. } => assert!(cycle.is_some()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_samples_count_as_off() {
        let mut tracker = tracker(0.0, 0.0);
        assert_eq!(tracker.on_sample("Sump", f64::NAN, 0.0).unwrap(), SampleOutcome::Idle);
        assert_eq!(tracker.on_sample("Sump", -80.0, 0.5).unwrap(), SampleOutcome::Idle);

        tracker.on_sample("Sump", 50.0, 1.0).unwrap();
        let outcome = tracker.on_sample("Sump", f64::INFINITY, 1.5).unwrap();
        assert!(matches!(outcome, SampleOutcome::Stopped { .. }));
    }

    #[test]
    fn test_long_running_respects_resend_interval() {
        let mut tracker = CycleTracker::new(1.0);
        tracker.add_channel(
            "Sump",
            TrackerSettings {
                runtime_alert_secs: Some(10.0),
                min_alert_interval_secs: 5.0,
                ..settings(0.0, 0.0)
            },
        );

        let mut fired = Vec::new();
        for t in 0..=20 {
            if let SampleOutcome::Running { long_running: Some(elapsed) } =
                tracker.on_sample("Sump", 50.0, t as f64).unwrap()
            {
                fired.push(elapsed);
            }
        }
        assert_eq!(fired, vec![11.0, 17.0]);
    }

    #[test]
    fn test_unknown_channel() {
        let mut tracker = tracker(0.0, 0.0);
        assert!(matches!(
            tracker.on_sample("Attic", 10.0, 0.0),
            Err(Error::UnknownChannel(_))
        ));
        assert!(tracker.set_on_threshold("Attic", 1.0).is_err());
    }
}
