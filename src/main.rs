//! cyclewatch - monitoring daemon
//!
//! Samples every configured channel at a fixed interval, detects on/off
//! cycles, learns a per-channel baseline and raises alerts when a cycle
//! falls outside it.

use anyhow::Context;
use chrono::Local;
use cyclewatch_lib::baseline::JsonBaselineStore;
use cyclewatch_lib::core::{parse_hhmm, Config};
use cyclewatch_lib::db::Database;
use cyclewatch_lib::hardware::{SampleMonitor, ScriptedSource};
use cyclewatch_lib::monitor::Monitor;
use cyclewatch_lib::schedule::Schedule;
use cyclewatch_lib::sink::{CompositeSink, CsvSink, LogNotifier};
use std::path::Path;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting cyclewatch v{}", env!("CARGO_PKG_VERSION"));

    // An explicit config path wins over the per-user location
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from(Path::new(&path))
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => Config::load().context("Failed to load config")?,
    };

    let data_dir = config.data_dir().context("Failed to prepare data directory")?;
    let sink = build_sink(&config, &data_dir)?;

    let baseline_path = config.baseline_path().context("Failed to resolve baseline path")?;
    log::info!("Baseline document at {}", baseline_path.display());
    let store = JsonBaselineStore::new(baseline_path);

    let monitor = Monitor::new(&config, Box::new(store), Box::new(sink))
        .context("Failed to initialize monitor")?;

    let source = SampleMonitor::new(
        Box::new(ScriptedSource::from_channels(&config.channels)),
        config.channel_names(),
    );

    let status_time = if config.alerts.status_enabled {
        Some(parse_hhmm(&config.alerts.status_time)?)
    } else {
        None
    };
    let schedule = Schedule::new(config.general.log_interval_minutes, status_time);

    monitoring_loop(monitor, source, schedule, config.general.sample_interval_secs).await;
    Ok(())
}

/// Sinks enabled in the configuration, plus the log notifier
fn build_sink(config: &Config, data_dir: &Path) -> anyhow::Result<CompositeSink> {
    let mut sink = CompositeSink::default();

    if config.sinks.csv_enabled {
        let csv = CsvSink::new(data_dir).context("Failed to prepare CSV directory")?;
        log::info!("Writing CSV logs to {}", csv.dir().display());
        sink.push(Box::new(csv));
    }

    if config.sinks.database_enabled {
        let db = Database::open(&data_dir.join("records.db")).context("Failed to open database")?;
        let total = db.get_records_count().context("Failed to read database")?;
        log::info!("Record database holds {} record(s)", total);
        for count in db.topic_counts().context("Failed to read database")? {
            log::info!("  {}: {} record(s)", count.topic, count.count);
        }
        sink.push(Box::new(db));
    }

    sink.push(Box::new(LogNotifier::new()));
    Ok(sink)
}

/// Sample, account and publish until Ctrl-C
async fn monitoring_loop(mut monitor: Monitor, mut source: SampleMonitor, mut schedule: Schedule, sample_interval_secs: f64) {
    log::info!(
        "Monitoring {} channel(s) every {}s",
        monitor.channel_names().len(),
        sample_interval_secs
    );

    let mut interval = tokio::time::interval(Duration::from_secs_f64(sample_interval_secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => {
                log::info!("Shutdown requested");
                break;
            }
        }

        let now = Local::now();
        let unix = now.timestamp_millis() as f64 / 1000.0;

        let crossed = schedule.poll(now.naive_local());
        if crossed.day {
            monitor.rollover_day();
            monitor.apply_retention(unix);
        }
        if crossed.status {
            monitor.publish_status(unix);
        }
        if crossed.interval {
            monitor.rollover_interval(unix);
        }

        let readings = source.read_all(unix);
        monitor.process_tick(unix, &readings);
    }

    if let Err(e) = monitor.engine().save() {
        log::warn!("Failed to save baseline on shutdown: {}", e);
    }
    log::info!("Stopped");
}
