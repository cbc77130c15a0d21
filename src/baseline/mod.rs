//! Learned power/runtime baseline per channel
//!
//! The first `learning_window` completed cycles of a channel establish the
//! mean and population standard deviation of its runtime and power. Once the
//! window is full the baseline is frozen and later cycles are tested against
//! it. The nameplate envelope check runs on every cycle, learning or not.

mod stats;
mod store;

pub use stats::{exceeds_sigma, population_summary, Summary};
pub use store::{overlay, BaselineDocument, BaselineStore, InMemoryBaselineStore, JsonBaselineStore};

use crate::alerts::{Alert, EnvelopeBreach, SigmaBreach};
use crate::core::{BaselineConfig, ChannelBaseline, ClosedCycle, Error, Result};
use std::collections::HashMap;

/// Where a channel stands after a cycle was folded in or evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Still establishing the baseline
    Learning { seen: usize, window: usize },
    /// Baseline frozen, cycles are tested against it
    Evaluating,
}

/// Outcome of handing one closed cycle to the engine
#[derive(Debug)]
pub struct Evaluation {
    pub phase: Phase,
    /// Alerts in fixed order: power sigma, runtime sigma, envelope
    pub alerts: Vec<Alert>,
    /// Set when the learning update could not be persisted.
    /// The in-memory baseline keeps the update regardless.
    pub persist_error: Option<Error>,
}

/// Owns the baseline of every channel and the store it is persisted to
pub struct BaselineEngine {
    order: Vec<String>,
    channels: HashMap<String, ChannelBaseline>,
    store: Box<dyn BaselineStore>,
}

impl BaselineEngine {
    /// Load every channel from the store, falling back to the given defaults
    pub fn load(defaults: &[(String, BaselineConfig)], store: Box<dyn BaselineStore>) -> Self {
        let loaded = store.load(defaults);
        let order = loaded.iter().map(|(name, _)| name.clone()).collect();
        let channels = loaded.into_iter().collect();

        Self {
            order,
            channels,
            store,
        }
    }

    /// Baseline of one channel
    pub fn channel(&self, name: &str) -> Option<&ChannelBaseline> {
        self.channels.get(name)
    }

    /// Channel names in configured order
    pub fn channel_names(&self) -> &[String] {
        &self.order
    }

    /// Current phase of one channel
    pub fn phase(&self, name: &str) -> Option<Phase> {
        self.channels.get(name).map(phase_of)
    }

    /// Fold a closed cycle into the baseline or test it against the frozen one.
    ///
    /// Only an unknown channel is an error; persistence failures are
    /// reported through [`Evaluation::persist_error`].
    pub fn evaluate(&mut self, cycle: &ClosedCycle) -> Result<Evaluation> {
        let baseline = self
            .channels
            .get_mut(&cycle.channel)
            .ok_or_else(|| Error::UnknownChannel(cycle.channel.clone()))?;

        let mut alerts = Vec::new();
        let mut persist_error = None;

        if !baseline.stats.is_frozen(baseline.config.learning_window) {
            learn(baseline, cycle);
            let seen = baseline.stats.cycles_seen();
            log::info!(
                "{}: baseline learning {}/{} (power {:.1}±{:.1} W, runtime {:.1}±{:.1} s)",
                cycle.channel,
                seen,
                baseline.config.learning_window,
                baseline.stats.mean_power,
                baseline.stats.stdev_power,
                baseline.stats.mean_runtime,
                baseline.stats.stdev_runtime
            );

            if let Err(e) = self.store.save(&self.document()) {
                log::warn!("Failed to persist baseline for {}: {}", cycle.channel, e);
                persist_error = Some(e);
            }
        } else {
            alerts.extend(sigma_alerts(baseline, cycle));
        }

        // Re-borrow: the save above needed the whole map
        let baseline = &self.channels[&cycle.channel];
        if let Some(alert) = envelope_alert(&baseline.config, cycle) {
            alerts.push(alert);
        }

        Ok(Evaluation {
            phase: phase_of(baseline),
            alerts,
            persist_error,
        })
    }

    /// Snapshot of every channel in the shape written to storage
    pub fn document(&self) -> BaselineDocument {
        self.channels
            .iter()
            .map(|(name, baseline)| (name.clone(), baseline.clone()))
            .collect()
    }

    /// Write the current state of every channel
    pub fn save(&self) -> Result<()> {
        self.store.save(&self.document())
    }
}

fn phase_of(baseline: &ChannelBaseline) -> Phase {
    let window = baseline.config.learning_window;
    if baseline.stats.is_frozen(window) {
        Phase::Evaluating
    } else {
        Phase::Learning {
            seen: baseline.stats.cycles_seen(),
            window,
        }
    }
}

/// Append the cycle and recompute both summaries from the retained sequences
fn learn(baseline: &mut ChannelBaseline, cycle: &ClosedCycle) {
    let stats = &mut baseline.stats;

    stats.runtimes.push(cycle.run_time);
    if let Some(summary) = population_summary(&stats.runtimes) {
        stats.mean_runtime = summary.mean;
        stats.stdev_runtime = summary.stdev;
    }

    stats.powers.push(cycle.mean_power);
    if let Some(summary) = population_summary(&stats.powers) {
        stats.mean_power = summary.mean;
        stats.stdev_power = summary.stdev;
    }
}

fn sigma_alerts(baseline: &ChannelBaseline, cycle: &ClosedCycle) -> Vec<Alert> {
    let config = &baseline.config;
    let stats = &baseline.stats;
    let mut alerts = Vec::new();

    // A zero-length window never learned anything to compare against
    if stats.cycles_seen() == 0 {
        return alerts;
    }

    if config.power_sigma_enabled
        && exceeds_sigma(cycle.mean_power, stats.mean_power, stats.stdev_power, config.power_sigma_bound)
    {
        alerts.push(Alert::PowerSigma(SigmaBreach {
            channel: cycle.channel.clone(),
            observed: cycle.mean_power,
            bound: config.power_sigma_bound,
            mean: stats.mean_power,
            stdev: stats.stdev_power,
        }));
    }

    if config.runtime_sigma_enabled
        && exceeds_sigma(cycle.run_time, stats.mean_runtime, stats.stdev_runtime, config.runtime_sigma_bound)
    {
        alerts.push(Alert::RuntimeSigma(SigmaBreach {
            channel: cycle.channel.clone(),
            observed: cycle.run_time,
            bound: config.runtime_sigma_bound,
            mean: stats.mean_runtime,
            stdev: stats.stdev_runtime,
        }));
    }

    alerts
}

/// Check the cycle's mean power against the admissible fraction of the rating.
///
/// Bounds are inclusive; the comparison happens in watts so a reading exactly
/// at a bound stays admissible.
fn envelope_alert(config: &BaselineConfig, cycle: &ClosedCycle) -> Option<Alert> {
    if !config.envelope_enabled {
        return None;
    }

    let per_unit = config.rating_unit.watts_per_unit();
    let low = config.low_fraction * config.rated_power;
    let high = config.high_fraction * config.rated_power;

    if cycle.mean_power < low * per_unit || cycle.mean_power > high * per_unit {
        Some(Alert::Envelope(EnvelopeBreach {
            channel: cycle.channel.clone(),
            observed: cycle.mean_power / per_unit,
            low,
            high,
            unit: config.rating_unit,
        }))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertFormatter, AlertKind, LegacyTextFormatter};
    use crate::core::{BaselineStats, HP_TO_WATTS};
    use std::sync::Arc;

    fn cycle(power: f64, run_time: f64) -> ClosedCycle {
        ClosedCycle {
            channel: "Sump".to_string(),
            mean_power: power,
            stdev_power: 1.0,
            run_time,
        }
    }

    fn sigma_config(window: usize) -> BaselineConfig {
        BaselineConfig {
            learning_window: window,
            power_sigma_enabled: true,
            power_sigma_bound: 1.0,
            runtime_sigma_enabled: true,
            runtime_sigma_bound: 1.0,
            ..BaselineConfig::default()
        }
    }

    fn engine_with(config: BaselineConfig) -> BaselineEngine {
        BaselineEngine::load(
            &[("Sump".to_string(), config)],
            Box::new(InMemoryBaselineStore::new()),
        )
    }

    /// Store that shares its document with the test and can refuse writes
    struct SharedStore {
        inner: Arc<InMemoryBaselineStore>,
        fail: bool,
    }

    impl BaselineStore for SharedStore {
        fn read(&self) -> Result<Option<serde_json::Value>> {
            self.inner.read()
        }

        fn save(&self, document: &BaselineDocument) -> Result<()> {
            if self.fail {
                return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")));
            }
            self.inner.save(document)
        }
    }

    #[test]
    fn test_learning_then_power_alert() {
        let mut engine = engine_with(sigma_config(5));

        for power in [100.0, 102.0, 98.0, 101.0, 99.0] {
            let eval = engine.evaluate(&cycle(power, 60.0)).unwrap();
            assert!(eval.alerts.is_empty());
            assert!(eval.persist_error.is_none());
        }

        let stats = &engine.channel("Sump").unwrap().stats;
        assert_eq!(stats.mean_power, 100.0);
        assert!((stats.stdev_power - 1.414).abs() < 1e-3);
        assert_eq!(engine.phase("Sump"), Some(Phase::Evaluating));

        let eval = engine.evaluate(&cycle(150.0, 60.0)).unwrap();
        assert_eq!(eval.alerts.len(), 1);
        assert_eq!(eval.alerts[0].kind(), AlertKind::PowerSigma);

        let text = LegacyTextFormatter.format_all(&eval.alerts);
        assert!(text.contains("from mean of 100.0"));
        assert!(text.starts_with("Power: 150.0 Exceeded 1.0 stdev's of 1.4"));
    }

    #[test]
    fn test_window_overflow_does_not_mutate_sequences() {
        let mut engine = engine_with(sigma_config(3));
        for run_time in [10.0, 11.0, 12.0] {
            engine.evaluate(&cycle(100.0, run_time)).unwrap();
        }
        let frozen = engine.channel("Sump").unwrap().stats.clone();

        engine.evaluate(&cycle(500.0, 99.0)).unwrap();
        engine.evaluate(&cycle(100.0, 11.0)).unwrap();

        let after = &engine.channel("Sump").unwrap().stats;
        assert_eq!(after, &frozen);
        assert_eq!(after.runtimes.len(), 3);
    }

    #[test]
    fn test_learning_phase_reports_progress() {
        let mut engine = engine_with(sigma_config(4));
        let eval = engine.evaluate(&cycle(100.0, 10.0)).unwrap();
        assert_eq!(eval.phase, Phase::Learning { seen: 1, window: 4 });
    }

    #[test]
    fn test_runtime_alert_only_when_enabled() {
        let mut config = sigma_config(2);
        config.power_sigma_enabled = false;
        let mut engine = engine_with(config);
        engine.evaluate(&cycle(100.0, 10.0)).unwrap();
        engine.evaluate(&cycle(100.0, 12.0)).unwrap();

        let eval = engine.evaluate(&cycle(400.0, 30.0)).unwrap();
        assert_eq!(eval.alerts.len(), 1);
        assert_eq!(eval.alerts[0].kind(), AlertKind::RuntimeSigma);
    }

    #[test]
    fn test_zero_stdev_alerts_on_any_deviation() {
        let mut engine = engine_with(sigma_config(2));
        engine.evaluate(&cycle(100.0, 10.0)).unwrap();
        engine.evaluate(&cycle(100.0, 10.0)).unwrap();

        let same = engine.evaluate(&cycle(100.0, 10.0)).unwrap();
        assert!(same.alerts.is_empty());

        let off = engine.evaluate(&cycle(100.5, 10.0)).unwrap();
        assert_eq!(off.alerts.len(), 1);
        assert_eq!(off.alerts[0].kind(), AlertKind::PowerSigma);
    }

    #[test]
    fn test_envelope_bounds_are_inclusive() {
        let config = BaselineConfig {
            envelope_enabled: true,
            rated_power: 0.5,
            low_fraction: 0.5,
            high_fraction: 1.15,
            ..BaselineConfig::default()
        };
        let mut engine = engine_with(config);

        let at_low = engine.evaluate(&cycle(0.25 * HP_TO_WATTS, 10.0)).unwrap();
        assert!(at_low.alerts.is_empty());

        let below = engine.evaluate(&cycle(0.24 * HP_TO_WATTS, 10.0)).unwrap();
        assert_eq!(below.alerts.len(), 1);
        assert_eq!(below.alerts[0].kind(), AlertKind::Envelope);
        assert_eq!(
            LegacyTextFormatter.format(&below.alerts[0]),
            " HP: 0.240 Exceeded limits of 0.250 to 0.575 HP\n"
        );

        let above = engine.evaluate(&cycle(0.6 * HP_TO_WATTS, 10.0)).unwrap();
        assert_eq!(above.alerts.len(), 1);
    }

    #[test]
    fn test_envelope_runs_during_learning_after_sigma() {
        let config = BaselineConfig {
            envelope_enabled: true,
            ..sigma_config(1)
        };
        let mut engine = engine_with(config);

        // Learning cycle: envelope only
        let first = engine.evaluate(&cycle(10.0, 10.0)).unwrap();
        assert_eq!(first.alerts.len(), 1);
        assert_eq!(first.alerts[0].kind(), AlertKind::Envelope);

        // Evaluating: power sigma, runtime sigma, then envelope
        let second = engine.evaluate(&cycle(20.0, 30.0)).unwrap();
        let kinds: Vec<_> = second.alerts.iter().map(|a| a.kind()).collect();
        assert_eq!(kinds, vec![AlertKind::PowerSigma, AlertKind::RuntimeSigma, AlertKind::Envelope]);
    }

    #[test]
    fn test_learning_update_is_persisted() {
        let shared = Arc::new(InMemoryBaselineStore::new());
        let mut engine = BaselineEngine::load(
            &[("Sump".to_string(), sigma_config(5))],
            Box::new(SharedStore { inner: shared.clone(), fail: false }),
        );

        engine.evaluate(&cycle(100.0, 60.0)).unwrap();

        let doc = shared.document().unwrap();
        assert_eq!(doc["Sump"]["powers"], serde_json::json!([100.0]));
        assert_eq!(doc["Sump"]["learning_window"], serde_json::json!(5));
    }

    #[test]
    fn test_failed_save_keeps_learning_update() {
        let shared = Arc::new(InMemoryBaselineStore::new());
        let mut engine = BaselineEngine::load(
            &[("Sump".to_string(), sigma_config(5))],
            Box::new(SharedStore { inner: shared.clone(), fail: true }),
        );

        let eval = engine.evaluate(&cycle(100.0, 60.0)).unwrap();
        assert!(matches!(eval.persist_error, Some(Error::Io(_))));
        assert_eq!(engine.channel("Sump").unwrap().stats.powers, vec![100.0]);
        assert!(shared.document().is_none());
    }

    #[test]
    fn test_unknown_channel_is_error() {
        let mut engine = engine_with(sigma_config(5));
        let mut stray = cycle(100.0, 10.0);
        stray.channel = "Attic".into();
        assert!(matches!(engine.evaluate(&stray), Err(Error::UnknownChannel(_))));
    }

    #[test]
    fn test_zero_window_skips_sigma_checks() {
        let mut engine = engine_with(sigma_config(0));
        let eval = engine.evaluate(&cycle(100.0, 10.0)).unwrap();
        assert!(eval.alerts.is_empty());
        assert_eq!(eval.phase, Phase::Evaluating);
        assert_eq!(engine.channel("Sump").unwrap().stats, BaselineStats::default());
    }

    #[test]
    fn test_reload_resumes_frozen_baseline() {
        let shared = Arc::new(InMemoryBaselineStore::new());
        let defaults = [("Sump".to_string(), sigma_config(2))];
        {
            let mut engine = BaselineEngine::load(
                &defaults,
                Box::new(SharedStore { inner: shared.clone(), fail: false }),
            );
            engine.evaluate(&cycle(100.0, 10.0)).unwrap();
            engine.evaluate(&cycle(104.0, 14.0)).unwrap();
        }

        let reloaded = BaselineEngine::load(
            &defaults,
            Box::new(SharedStore { inner: shared, fail: false }),
        );
        let stats = &reloaded.channel("Sump").unwrap().stats;
        assert_eq!(stats.mean_power, 102.0);
        assert_eq!(stats.stdev_runtime, 2.0);
        assert_eq!(reloaded.phase("Sump"), Some(Phase::Evaluating));
    }

    #[test]
    fn test_partial_document_never_grows_past_window() {
        let store = InMemoryBaselineStore::with_document(serde_json::json!({
            "Sump": { "runtimes": [10.0, 11.0, 12.0, 13.0, 14.0] }
        }));
        let mut engine = BaselineEngine::load(&[("Sump".to_string(), sigma_config(5))], Box::new(store));

        for run_time in [60.0, 61.0, 62.0] {
            engine.evaluate(&cycle(100.0, run_time)).unwrap();
        }

        let stats = &engine.channel("Sump").unwrap().stats;
        assert_eq!(stats.runtimes, vec![60.0, 61.0, 62.0]);
        assert_eq!(stats.powers.len(), 3);
        assert_eq!(stats.mean_runtime, 61.0);
        assert_eq!(engine.phase("Sump"), Some(Phase::Learning { seen: 3, window: 5 }));
    }
}
