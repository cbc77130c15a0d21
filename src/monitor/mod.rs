//! Monitoring service
//!
//! Ties the cycle tracker, the baseline engine and the interval accumulator
//! together and turns their outcomes into records for the sink. The driver
//! owns the clock: it calls [`Monitor::process_tick`] every sample interval and
//! the roll-over methods when the schedule says a boundary was crossed.

mod intervals;
mod tracker;

pub use intervals::{ChannelBuckets, DayTotals, IntervalAccumulator, IntervalTotals};
pub use tracker::{
    guard_samples, trim_guard_bands, CycleTracker, SampleOutcome, TrackerSettings, MAX_BUFFERED_SAMPLES,
    MIN_CYCLE_SAMPLES,
};

use crate::alerts::{Alert, AlertFormatter, LegacyTextFormatter};
use crate::baseline::{BaselineEngine, BaselineStore, Phase};
use crate::core::format::{float_repr, hms, round_to};
use crate::core::{ChannelReading, ClosedCycle, Config, Result, CYCLE_STATS_HEADER, MAX_GUARD_SECS};
use crate::sink::{Destination, Record, RecordSink};
use serde_json::{json, Map};
use std::collections::HashMap;

/// Prefix of every published topic
pub const TOPIC_PREFIX: &str = "cyclewatch";

/// Gaps longer than this many sample intervals count as a single interval
const MAX_GAP_INTERVALS: f64 = 10.0;

const SECS_PER_DAY: f64 = 24.0 * 60.0 * 60.0;

pub fn details_topic(channel: &str) -> String {
    format!("{}/logDetails_{}", TOPIC_PREFIX, channel)
}

pub fn stats_topic(channel: &str) -> String {
    format!("{}/logStats_{}", TOPIC_PREFIX, channel)
}

pub fn alert_topic() -> String {
    format!("{}/Alert", TOPIC_PREFIX)
}

pub fn status_topic() -> String {
    format!("{}/Status", TOPIC_PREFIX)
}

pub fn energy_topic() -> String {
    format!("{}/logEnergy", TOPIC_PREFIX)
}

/// What one tick produced
#[derive(Debug, Default)]
pub struct TickReport {
    /// Cycles that closed with usable statistics
    pub closed: Vec<ClosedCycle>,
    /// Every alert raised, whether or not it was sent
    pub alerts: Vec<Alert>,
    /// Alert texts handed to the sink
    pub notifications: Vec<String>,
}

/// Read-only view of one channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSnapshot {
    pub name: String,
    pub is_on: bool,
    pub buffered_samples: usize,
    pub phase: Phase,
    pub buckets: ChannelBuckets,
}

pub struct Monitor {
    sample_interval: f64,
    order: Vec<String>,
    tracker: CycleTracker,
    engine: BaselineEngine,
    intervals: IntervalAccumulator,
    sink: Box<dyn RecordSink>,
    formatter: Box<dyn AlertFormatter>,
    alerts_enabled: bool,
    details_enabled: bool,
    retention_days: u32,
    min_alert_interval: f64,
    last_alert_sent: HashMap<String, f64>,
    last_tick: Option<f64>,
}

/// Guard band from the persisted document, held to the configurable range
fn bounded_guard(channel: &str, secs: f64) -> f64 {
    let bounded = secs.clamp(0.0, MAX_GUARD_SECS);
    if bounded != secs {
        log::warn!("{}: guard band of {} s out of range, using {} s", channel, secs, bounded);
    }
    bounded
}

impl Monitor {
    /// Build the monitor for every configured channel.
    ///
    /// The baseline store is read here; the guard bands used by the tracker
    /// come from the merged (persisted over configured) baseline settings.
    pub fn new(config: &Config, store: Box<dyn BaselineStore>, sink: Box<dyn RecordSink>) -> Result<Self> {
        config.validate()?;

        let defaults: Vec<_> = config
            .channels
            .iter()
            .map(|c| (c.name.clone(), c.baseline.clone()))
            .collect();
        let engine = BaselineEngine::load(&defaults, store);

        let sample_interval = config.general.sample_interval_secs;
        let min_alert_interval = config.alerts.min_interval_between_alerts_secs;
        let mut tracker = CycleTracker::new(sample_interval);

        for channel in &config.channels {
            let baseline = engine
                .channel(&channel.name)
                .map(|b| b.config.clone())
                .unwrap_or_else(|| channel.baseline.clone());
            let startup_guard_secs = bounded_guard(&channel.name, baseline.startup_guard_secs);
            let shutdown_guard_secs = bounded_guard(&channel.name, baseline.shutdown_guard_secs);

            tracker.add_channel(
                &channel.name,
                TrackerSettings {
                    on_threshold_watts: channel.on_threshold_watts,
                    startup_guard_secs,
                    shutdown_guard_secs,
                    runtime_alert_secs: (channel.runtime_alert_secs > 0.0).then_some(channel.runtime_alert_secs),
                    min_alert_interval_secs: min_alert_interval,
                },
            );
            log::info!(
                "Monitoring {} (on above {:.1} W, guards {:.1}/{:.1} s)",
                channel.name,
                channel.on_threshold_watts,
                startup_guard_secs,
                shutdown_guard_secs
            );
        }

        let order = config.channel_names();
        Ok(Self {
            sample_interval,
            intervals: IntervalAccumulator::new(&order),
            order,
            tracker,
            engine,
            sink,
            formatter: Box::new(LegacyTextFormatter),
            alerts_enabled: config.alerts.enabled,
            details_enabled: config.sinks.details_enabled,
            retention_days: config.sinks.retention_days,
            min_alert_interval,
            last_alert_sent: HashMap::new(),
            last_tick: None,
        })
    }

    /// Swap the alert wording
    pub fn with_formatter(mut self, formatter: Box<dyn AlertFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn channel_names(&self) -> &[String] {
        &self.order
    }

    pub fn engine(&self) -> &BaselineEngine {
        &self.engine
    }

    /// Seconds this tick accounts for
    fn tick_delta(&mut self, now: f64) -> f64 {
        let delta = match self.last_tick {
            Some(last) => now - last,
            None => self.sample_interval,
        };
        self.last_tick = Some(now);

        if !(delta > 0.0) || delta > self.sample_interval * MAX_GAP_INTERVALS {
            self.sample_interval
        } else {
            delta
        }
    }

    /// Feed one round of readings taken at `now` (unix seconds)
    pub fn process_tick(&mut self, now: f64, readings: &[ChannelReading]) -> TickReport {
        let delta = self.tick_delta(now);
        let mut report = TickReport::default();

        for reading in readings {
            let outcome = match self.tracker.on_sample(&reading.channel, reading.power_watts, now) {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::warn!("Skipping reading: {}", e);
                    continue;
                }
            };

            if let Err(e) = self.account(reading, &outcome, delta, now, &mut report) {
                log::warn!("{}: {}", reading.channel, e);
            }
        }

        report
    }

    fn account(
        &mut self,
        reading: &ChannelReading,
        outcome: &SampleOutcome,
        delta: f64,
        now: f64,
        report: &mut TickReport,
    ) -> Result<()> {
        let name = reading.channel.as_str();

        if outcome.is_on() {
            self.intervals
                .on_sample_while_on(name, delta, reading.power_watts * delta / 3600.0)?;
            if self.details_enabled {
                self.log_details(reading, now);
            }
        }

        match outcome {
            SampleOutcome::Idle => {}
            SampleOutcome::Started => self.intervals.on_cycle_start(name)?,
            SampleOutcome::Running { long_running } => {
                if let Some(elapsed_secs) = long_running {
                    let alert = Alert::LongRunning {
                        channel: name.to_string(),
                        elapsed_secs: *elapsed_secs,
                    };
                    log::warn!("{}: on for {} without stopping", name, hms(*elapsed_secs));
                    if self.alerts_enabled {
                        let text = self.formatter.format(&alert);
                        self.notify(&text, now);
                        report.notifications.push(text);
                    }
                    report.alerts.push(alert);
                }
            }
            SampleOutcome::Stopped { run_time, cycle } => {
                self.intervals.on_cycle_close(name, *run_time)?;
                if let Some(cycle) = cycle {
                    self.close_cycle(cycle, now, report)?;
                }
            }
        }
        Ok(())
    }

    /// One `logDetails_<channel>` row per on-sample
    fn log_details(&mut self, reading: &ChannelReading, now: f64) {
        let mut fields = Map::new();
        fields.insert("Watts".to_string(), json!(round_to(reading.power_watts, 1)));
        fields.insert("State".to_string(), json!("on"));
        let record = Record::fields(&[Destination::CsvFile], &details_topic(&reading.channel), fields, now);
        self.publish(&record);
    }

    fn close_cycle(&mut self, cycle: &ClosedCycle, now: f64, report: &mut TickReport) -> Result<()> {
        log::info!(
            "{}: cycle closed, {:.1} s at {:.1}±{:.1} W",
            cycle.channel,
            cycle.run_time,
            cycle.mean_power,
            cycle.stdev_power
        );

        let record = Record::text(
            &[Destination::CsvFile, Destination::Database],
            &stats_topic(&cycle.channel),
            cycle.stats_row(),
            now,
        )
        .with_header(CYCLE_STATS_HEADER);
        self.publish(&record);

        let evaluation = self.engine.evaluate(cycle)?;
        if let Some(e) = &evaluation.persist_error {
            log::warn!("{}: baseline update kept in memory only: {}", cycle.channel, e);
        }
        report.closed.push(cycle.clone());

        if evaluation.alerts.is_empty() {
            return Ok(());
        }

        let text = self.formatter.format_all(&evaluation.alerts);
        report.alerts.extend(evaluation.alerts);

        if !self.alerts_enabled {
            return Ok(());
        }

        let allowed = self
            .last_alert_sent
            .get(&cycle.channel)
            .map_or(true, |last| now > last + self.min_alert_interval);
        if allowed {
            self.last_alert_sent.insert(cycle.channel.clone(), now);
            self.notify(&text, now);
            report.notifications.push(text);
        } else {
            log::info!("{}: alert suppressed, last one was sent recently", cycle.channel);
        }
        Ok(())
    }

    fn notify(&mut self, text: &str, now: f64) {
        let record = Record::text(
            &[Destination::Notify, Destination::Database],
            &alert_topic(),
            text.to_string(),
            now,
        );
        self.publish(&record);
    }

    fn publish(&mut self, record: &Record) {
        if let Err(e) = self.sink.publish(record) {
            log::warn!("Failed to publish {}: {}", record.topic, e);
        }
    }

    /// Energy log header and row for the current interval
    pub fn energy_row(&self) -> (String, String) {
        let mut header = Vec::new();
        let mut row = Vec::new();
        for name in &self.order {
            let current = self.intervals.buckets(name).map(|b| b.current).unwrap_or_default();
            header.push(format!("{} cycles,{} (Wh)", name, name));
            row.push(format!("{},{}", current.cycles, float_repr(round_to(current.energy_wh, 2))));
        }
        (header.join(","), row.join(","))
    }

    /// Log the finished interval and start a new one
    pub fn rollover_interval(&mut self, now: f64) {
        let (header, row) = self.energy_row();
        let record = Record::text(
            &[Destination::CsvFile, Destination::Database],
            &energy_topic(),
            row,
            now,
        )
        .with_header(&header);
        self.publish(&record);

        for name in &self.order {
            if let Err(e) = self.intervals.rollover_interval(name) {
                log::warn!("Interval roll-over failed: {}", e);
            }
        }
        log::debug!("Logging interval rolled over");
    }

    /// Today becomes yesterday for every channel
    pub fn rollover_day(&mut self) {
        for name in &self.order {
            if let Err(e) = self.intervals.rollover_day(name) {
                log::warn!("Day roll-over failed: {}", e);
            }
        }
        log::info!("Day rolled over");
    }

    /// Drop records older than the retention period from every sink.
    ///
    /// Returns how many were removed; a zero retention keeps everything.
    pub fn apply_retention(&mut self, now: f64) -> usize {
        if self.retention_days == 0 {
            return 0;
        }

        let cutoff = now - f64::from(self.retention_days) * SECS_PER_DAY;
        match self.sink.prune(cutoff) {
            Ok(removed) => {
                log::info!("Retention removed {} record(s) older than {} days", removed, self.retention_days);
                removed
            }
            Err(e) => {
                log::warn!("Retention pass failed: {}", e);
                0
            }
        }
    }

    /// Summary of yesterday's activity
    pub fn status_report(&self) -> String {
        let mut msg = String::from("Yesterday summary: \n");
        for name in &self.order {
            let day = self.intervals.buckets(name).map(|b| b.yesterday).unwrap_or_default();
            msg.push_str(&format!("{} Cycles: {:<5} \n", name, day.cycles));
            msg.push_str(&format!("MinRunTime: {}\n", hms(day.min_run_time_secs.unwrap_or(0.0))));
            msg.push_str(&format!("MaxRunTime: {}\n", hms(day.max_run_time_secs.unwrap_or(0.0))));
            msg.push_str(&format!("TotalRunTime: {}\n", hms(day.run_time_secs)));
            msg.push_str(&format!("Power (Wh): {:<8.2} \n\n", day.energy_wh));
        }
        msg
    }

    /// Send the daily status to the operator
    pub fn publish_status(&mut self, now: f64) {
        let record = Record::text(&[Destination::Notify], &status_topic(), self.status_report(), now);
        self.publish(&record);
    }

    /// Read-only view of every channel, in configured order
    pub fn snapshot(&self) -> Vec<ChannelSnapshot> {
        self.order
            .iter()
            .map(|name| ChannelSnapshot {
                name: name.clone(),
                is_on: self.tracker.is_on(name),
                buffered_samples: self.tracker.buffered(name),
                phase: self.engine.phase(name).unwrap_or(Phase::Evaluating),
                buckets: self.intervals.buckets(name).copied().unwrap_or_default(),
            })
            .collect()
    }
}
