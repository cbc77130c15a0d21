//! Record and alert delivery
//!
//! The monitor hands every outbound record to a [`RecordSink`]. A record names
//! the destinations it is meant for; sinks only take the ones they serve.
//! Delivery is best effort: failures are reported to the caller, who logs them
//! and carries on.

mod csv;
mod notify;

pub use self::csv::CsvSink;
pub use notify::LogNotifier;

use crate::core::Result;
use serde_json::{Map, Value};

/// Where a record should end up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Append-only CSV log per topic
    CsvFile,
    /// SQLite record table
    Database,
    /// Operator notification (email/SMS stand-in)
    Notify,
}

/// Record body: preformatted text or named fields.
///
/// Fields keep their insertion order, which is also the column order.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Fields(Map<String, Value>),
}

impl Payload {
    /// Flat single-line rendering used by CSV and the database
    pub fn to_row(&self) -> String {
        match self {
            Payload::Text(text) => text.clone(),
            Payload::Fields(fields) => fields
                .values()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Header derived from field names, if any
    pub fn field_header(&self) -> Option<String> {
        match self {
            Payload::Text(_) => None,
            Payload::Fields(fields) => Some(fields.keys().cloned().collect::<Vec<_>>().join(",")),
        }
    }
}

/// One outbound record
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub destinations: Vec<Destination>,
    /// Topic such as `cyclewatch/logStats_Sump`
    pub topic: String,
    pub payload: Payload,
    /// Column header for tabular destinations
    pub header: Option<String>,
    /// Unix seconds the record refers to
    pub timestamp: f64,
}

impl Record {
    pub fn text(destinations: &[Destination], topic: &str, text: String, timestamp: f64) -> Self {
        Self {
            destinations: destinations.to_vec(),
            topic: topic.to_string(),
            payload: Payload::Text(text),
            header: None,
            timestamp,
        }
    }

    pub fn fields(destinations: &[Destination], topic: &str, fields: Map<String, Value>, timestamp: f64) -> Self {
        Self {
            destinations: destinations.to_vec(),
            topic: topic.to_string(),
            payload: Payload::Fields(fields),
            header: None,
            timestamp,
        }
    }

    pub fn with_header(mut self, header: &str) -> Self {
        self.header = Some(header.to_string());
        self
    }

    pub fn is_for(&self, destination: Destination) -> bool {
        self.destinations.contains(&destination)
    }
}

/// Something that delivers records
pub trait RecordSink: Send {
    /// Whether this sink serves the destination
    fn accepts(&self, destination: Destination) -> bool;

    /// Deliver a record
    fn publish(&mut self, record: &Record) -> Result<()>;

    /// Short name for log messages
    fn name(&self) -> &str;

    /// Remove stored records older than `cutoff` (unix seconds), returning
    /// how many went. Sinks that keep nothing have nothing to prune.
    fn prune(&mut self, _cutoff: f64) -> Result<usize> {
        Ok(0)
    }
}

/// Forwards records to every sink serving one of their destinations.
///
/// All matching sinks are tried; the first error is returned.
#[derive(Default)]
pub struct CompositeSink {
    sinks: Vec<Box<dyn RecordSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Box<dyn RecordSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Box<dyn RecordSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl RecordSink for CompositeSink {
    fn accepts(&self, destination: Destination) -> bool {
        self.sinks.iter().any(|s| s.accepts(destination))
    }

    fn publish(&mut self, record: &Record) -> Result<()> {
        let mut first_error = None;
        for sink in &mut self.sinks {
            if !record.destinations.iter().any(|d| sink.accepts(*d)) {
                continue;
            }
            if let Err(e) = sink.publish(record) {
                log::warn!("{} failed to deliver {}: {}", sink.name(), record.topic, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn name(&self) -> &str {
        "composite"
    }

    fn prune(&mut self, cutoff: f64) -> Result<usize> {
        let mut removed = 0;
        let mut first_error = None;
        for sink in &mut self.sinks {
            match sink.prune(cutoff) {
                Ok(n) => removed += n,
                Err(e) => {
                    log::warn!("{} failed to prune: {}", sink.name(), e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        first_error.map_or(Ok(removed), Err)
    }
}

/// Keeps every record in memory; handy for tests and the demo
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: std::sync::Arc<std::sync::Mutex<Vec<Record>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record published so far
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Records published on a topic
    pub fn on_topic(&self, topic: &str) -> Vec<Record> {
        self.records()
            .into_iter()
            .filter(|r| r.topic == topic)
            .collect()
    }
}

impl RecordSink for MemorySink {
    fn accepts(&self, _destination: Destination) -> bool {
        true
    }

    fn publish(&mut self, record: &Record) -> Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }

    fn prune(&mut self, cutoff: f64) -> Result<usize> {
        let Ok(mut records) = self.records.lock() else {
            return Ok(0);
        };
        let before = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        Ok(before - records.len())
    }
}
