//! Interval roll-up accounting: current/last interval and today/yesterday

use crate::core::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;

/// Totals for a logging interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IntervalTotals {
    pub cycles: u64,
    pub run_time_secs: f64,
    pub energy_wh: f64,
}

/// Totals for a calendar day, with shortest and longest cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DayTotals {
    pub cycles: u64,
    pub run_time_secs: f64,
    pub energy_wh: f64,
    /// `None` until the first cycle of the day closes
    pub min_run_time_secs: Option<f64>,
    pub max_run_time_secs: Option<f64>,
}

/// The four buckets kept for one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ChannelBuckets {
    pub current: IntervalTotals,
    pub last_interval: IntervalTotals,
    pub today: DayTotals,
    pub yesterday: DayTotals,
}

/// Per-channel roll-up of cycles, runtime and energy.
///
/// Boundaries are signalled from outside; nothing here reads a clock.
#[derive(Debug, Default)]
pub struct IntervalAccumulator {
    channels: HashMap<String, ChannelBuckets>,
}

impl IntervalAccumulator {
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            channels: names
                .iter()
                .map(|n| (n.as_ref().to_string(), ChannelBuckets::default()))
                .collect(),
        }
    }

    fn bucket(&mut self, name: &str) -> Result<&mut ChannelBuckets> {
        self.channels
            .get_mut(name)
            .ok_or_else(|| Error::UnknownChannel(name.to_string()))
    }

    pub fn buckets(&self, name: &str) -> Option<&ChannelBuckets> {
        self.channels.get(name)
    }

    /// Count an off to on transition
    pub fn on_cycle_start(&mut self, name: &str) -> Result<()> {
        let b = self.bucket(name)?;
        b.current.cycles += 1;
        b.today.cycles += 1;
        Ok(())
    }

    /// Add one on-sample worth of runtime and energy
    pub fn on_sample_while_on(&mut self, name: &str, elapsed_secs: f64, energy_wh: f64) -> Result<()> {
        let b = self.bucket(name)?;
        b.current.run_time_secs += elapsed_secs;
        b.current.energy_wh += energy_wh;
        b.today.run_time_secs += elapsed_secs;
        b.today.energy_wh += energy_wh;
        Ok(())
    }

    /// Track today's shortest and longest cycle
    pub fn on_cycle_close(&mut self, name: &str, run_time_secs: f64) -> Result<()> {
        let today = &mut self.bucket(name)?.today;
        today.min_run_time_secs = Some(match today.min_run_time_secs {
            Some(min) => min.min(run_time_secs),
            None => run_time_secs,
        });
        today.max_run_time_secs = Some(match today.max_run_time_secs {
            Some(max) => max.max(run_time_secs),
            None => run_time_secs,
        });
        Ok(())
    }

    /// Current interval becomes the last interval and starts over
    pub fn rollover_interval(&mut self, name: &str) -> Result<()> {
        let b = self.bucket(name)?;
        b.last_interval = std::mem::take(&mut b.current);
        Ok(())
    }

    /// Today becomes yesterday and starts over
    pub fn rollover_day(&mut self, name: &str) -> Result<()> {
        let b = self.bucket(name)?;
        b.yesterday = std::mem::take(&mut b.today);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_day_rollover_moves_totals() {
        let mut acc = IntervalAccumulator::new(&["Sump"]);
        for _ in 0..7 {
            acc.on_cycle_start("Sump").unwrap();
        }
        acc.on_sample_while_on("Sump", 1200.0, 150.0).unwrap();
        acc.on_cycle_close("Sump", 100.0).unwrap();
        acc.on_cycle_close("Sump", 300.0).unwrap();

        let today = acc.buckets("Sump").unwrap().today;
        acc.rollover_day("Sump").unwrap();

        let b = acc.buckets("Sump").unwrap();
        assert_eq!(b.yesterday, today);
        assert_eq!(b.yesterday.cycles, 7);
        assert_eq!(b.yesterday.run_time_secs, 1200.0);
        assert_eq!(b.today, DayTotals::default());
        assert_eq!(b.today.min_run_time_secs, None);
        assert_eq!(b.today.max_run_time_secs, None);
    }

    #[test]
    fn test_first_cycle_sets_min_and_max() {
        let mut acc = IntervalAccumulator::new(&["Sump"]);
        acc.on_cycle_close("Sump", 0.0).unwrap();
        let today = acc.buckets("Sump").unwrap().today;
        assert_eq!(today.min_run_time_secs, Some(0.0));
        assert_eq!(today.max_run_time_secs, Some(0.0));

        acc.on_cycle_close("Sump", 42.0).unwrap();
        acc.on_cycle_close("Sump", 12.0).unwrap();
        let today = acc.buckets("Sump").unwrap().today;
        assert_eq!(today.min_run_time_secs, Some(0.0));
        assert_eq!(today.max_run_time_secs, Some(42.0));
    }

    #[test]
    fn test_interval_rollover_keeps_today() {
        let mut acc = IntervalAccumulator::new(&["Sump", "Well"]);
        acc.on_cycle_start("Sump").unwrap();
        acc.on_sample_while_on("Sump", 0.5, 0.25).unwrap();
        acc.rollover_interval("Sump").unwrap();

        let b = acc.buckets("Sump").unwrap();
        assert_eq!(b.current, IntervalTotals::default());
        assert_eq!(b.last_interval.cycles, 1);
        assert_eq!(b.last_interval.energy_wh, 0.25);
        assert_eq!(b.today.cycles, 1);
        assert_eq!(acc.buckets("Well").unwrap(), &ChannelBuckets::default());
    }

    #[test]
    fn test_unknown_channel() {
        let mut acc = IntervalAccumulator::new(&["Sump"]);
        assert!(acc.on_cycle_start("Attic").is_err());
        assert!(acc.rollover_day("Attic").is_err());
    }
}
