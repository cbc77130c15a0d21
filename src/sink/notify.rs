//! Operator notifications routed through the log
//!
//! Stands in for mail/SMS delivery. Alert topics are logged as warnings,
//! status topics as info; anything else is ignored.

use super::{Destination, Record, RecordSink};
use crate::core::Result;

#[derive(Debug, Default)]
pub struct LogNotifier {
    sent: usize,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications delivered so far
    pub fn sent(&self) -> usize {
        self.sent
    }
}

impl RecordSink for LogNotifier {
    fn accepts(&self, destination: Destination) -> bool {
        destination == Destination::Notify
    }

    fn publish(&mut self, record: &Record) -> Result<()> {
        let topic = record.topic.to_uppercase();
        let body = record.payload.to_row();

        if topic.contains("ALERT") {
            log::warn!("[{}] {}", record.topic, body.trim_end());
        } else if topic.contains("STATUS") {
            log::info!("[{}] {}", record.topic, body.trim_end());
        } else {
            log::debug!("No notification route for {}", record.topic);
            return Ok(());
        }

        self.sent += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "notifier"
    }
}
