//! Append-only CSV logs, one file per topic

use super::{Destination, Record, RecordSink};
use crate::core::Result;
use chrono::{Local, TimeZone};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes records to `<dir>/<topic with / replaced by _>.csv`
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// File a topic is written to
    pub fn file_for(&self, topic: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", topic.replace('/', "_")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rewrite one log without the rows stamped before `cutoff`.
    ///
    /// The header and rows whose time column does not parse are kept.
    fn prune_file(path: &Path, cutoff: f64) -> Result<usize> {
        let content = fs::read_to_string(path)?;
        let mut lines = content.lines();
        let mut kept = String::with_capacity(content.len());
        if let Some(header) = lines.next() {
            kept.push_str(header);
            kept.push('\n');
        }

        let mut removed = 0;
        for line in lines {
            let stamp = line.split(',').next().and_then(|t| t.trim().parse::<f64>().ok());
            if stamp.map_or(false, |t| t < cutoff) {
                removed += 1;
                continue;
            }
            kept.push_str(line);
            kept.push('\n');
        }

        if removed > 0 {
            let tmp = path.with_extension("csv.tmp");
            fs::write(&tmp, kept)?;
            fs::rename(&tmp, path)?;
        }
        Ok(removed)
    }
}

/// Unix seconds and local date-time columns that start every row
fn time_columns(timestamp: f64) -> String {
    let secs = timestamp.round() as i64;
    let local = Local
        .timestamp_opt(secs, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    format!("{},{}", secs, local)
}

impl RecordSink for CsvSink {
    fn accepts(&self, destination: Destination) -> bool {
        destination == Destination::CsvFile
    }

    fn publish(&mut self, record: &Record) -> Result<()> {
        let path = self.file_for(&record.topic);
        let is_new = !path.exists();

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        if is_new {
            let header = record
                .header
                .clone()
                .or_else(|| record.payload.field_header())
                .unwrap_or_default();
            writeln!(file, "UNIX time (s),DateTime,{}", header)?;
            log::info!("Started CSV log {}", path.display());
        }

        writeln!(file, "{},{}", time_columns(record.timestamp), record.payload.to_row())?;
        Ok(())
    }

    fn name(&self) -> &str {
        "csv"
    }

    fn prune(&mut self, cutoff: f64) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "csv") {
                removed += Self::prune_file(&path, cutoff)?;
            }
        }
        Ok(removed)
    }
}
