//! cyclewatch - Demo CLI
//!
//! Replays a short sump-pump history through the monitor: five learning
//! cycles, then one cycle drawing far more power than the baseline allows.
//! Everything stays in memory; records are stored in an in-memory database.

use cyclewatch_lib::baseline::{InMemoryBaselineStore, Phase};
use cyclewatch_lib::core::{ChannelConfig, ChannelReading, Config, DutyProfile};
use cyclewatch_lib::db::Database;
use cyclewatch_lib::hardware::{SampleMonitor, ScriptedSource};
use cyclewatch_lib::monitor::Monitor;
use cyclewatch_lib::sink::{CompositeSink, MemorySink, Payload};
use std::process::ExitCode;

const SAMPLE_INTERVAL: f64 = 0.5;
const ON_SAMPLES: usize = 30;
const OFF_SAMPLES: usize = 60;

fn demo_config() -> Config {
    let mut sump = ChannelConfig::new("Sump", 20.0);
    sump.runtime_alert_secs = 0.0;
    sump.baseline.learning_window = 5;
    sump.baseline.power_sigma_enabled = true;
    sump.baseline.power_sigma_bound = 1.0;

    let mut config = Config::default();
    config.general.sample_interval_secs = SAMPLE_INTERVAL;
    config.alerts.min_interval_between_alerts_secs = 0.0;
    config.channels = vec![sump];
    config
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("==============================================");
    println!("   cyclewatch - Demo CLI (baseline replay)");
    println!("==============================================\n");

    let config = demo_config();
    let records = MemorySink::new();

    // 1. Sinks
    println!("[1/3] Initializing sinks...");
    let mut sink = CompositeSink::default();
    sink.push(Box::new(records.clone()));
    match Database::open_in_memory() {
        Ok(db) => {
            println!("      In-memory SQLite record store ready");
            sink.push(Box::new(db));
        }
        Err(e) => println!("      Warning: no database ({}), continuing", e),
    }
    println!();

    // 2. Monitor
    println!("[2/3] Initializing monitor...");
    let mut monitor = match Monitor::new(&config, Box::new(InMemoryBaselineStore::new()), Box::new(sink)) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("      Failed to build monitor: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let channel = &config.channels[0];
    println!(
        "      Channel: {} (on above {:.0} W, window {} cycles, bound {:.1} sigma)\n",
        channel.name,
        channel.on_threshold_watts,
        channel.baseline.learning_window,
        channel.baseline.power_sigma_bound
    );

    // 3. Replay
    println!("[3/3] Replaying cycles...\n");
    println!("----------------------------------------------");
    println!("  Cycle |  Power  |  Phase");
    println!("        |  (W)    |");
    println!("----------------------------------------------");

    let mut now = 1_700_000_000.0;
    for (i, watts) in [100.0, 102.0, 98.0, 101.0, 99.0, 150.0].into_iter().enumerate() {
        // A flat load: every sample of the cycle draws the same power
        let mut source = SampleMonitor::new(
            Box::new(ScriptedSource::new().with_profile(
                &channel.name,
                DutyProfile {
                    on_watts: watts,
                    on_secs: ON_SAMPLES as f64 * SAMPLE_INTERVAL,
                    off_secs: OFF_SAMPLES as f64 * SAMPLE_INTERVAL,
                    phase_secs: -now,
                    ..DutyProfile::default()
                },
            )),
            config.channel_names(),
        );

        let mut alerts = Vec::new();
        for _ in 0..ON_SAMPLES + OFF_SAMPLES {
            let readings: Vec<ChannelReading> = source.read_all(now);
            let report = monitor.process_tick(now, &readings);
            alerts.extend(report.notifications);
            now += SAMPLE_INTERVAL;
        }

        let phase = match monitor.engine().phase(&channel.name) {
            Some(Phase::Learning { seen, window }) => format!("learning {}/{}", seen, window),
            Some(Phase::Evaluating) => "evaluating".to_string(),
            None => "unknown".to_string(),
        };
        println!("  {:>5} | {:>7.1} | {}", i + 1, watts, phase);
        for alert in alerts {
            println!("        ALERT: {}", alert.trim_end());
        }
    }

    println!("----------------------------------------------\n");

    println!("=== Statistics Records ===\n");
    for record in records.on_topic(&format!("cyclewatch/logStats_{}", channel.name)) {
        if let Payload::Text(row) = &record.payload {
            println!("  {}", row);
        }
    }

    if let Some(baseline) = monitor.engine().channel(&channel.name) {
        println!("\n=== Learned Baseline ===\n");
        println!("  Mean power:    {:.1} W", baseline.stats.mean_power);
        println!("  Power stdev:   {:.3} W", baseline.stats.stdev_power);
        println!("  Mean runtime:  {:.1} s", baseline.stats.mean_runtime);
    }

    println!("\n==============================================\n");
    ExitCode::SUCCESS
}
