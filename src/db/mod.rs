//! SQLite record store
//!
//! Every record routed to the database destination lands in one `records`
//! table: statistics rows, energy log rows and alert texts alike. Rows older
//! than the retention period are deleted on the daily roll-over.

use crate::core::Result;
use crate::sink::{Destination, Record, RecordSink};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Database manager
pub struct Database {
    conn: Connection,
}

/// Row count per topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: i64,
}

impl Database {
    /// Open (or create) the database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;

        let db = Self { conn };
        db.init_schema()?;
        log::info!("Record database at {}", path.display());

        Ok(db)
    }

    /// Database that lives only as long as the value
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp REAL NOT NULL,
                topic TEXT NOT NULL,
                header TEXT,
                payload TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_timestamp ON records(timestamp);
            CREATE INDEX IF NOT EXISTS idx_records_topic ON records(topic);
            "#,
        )?;

        Ok(())
    }

    /// Insert a record, returning its row id
    pub fn insert_record(&self, record: &Record) -> Result<i64> {
        let header = record.header.clone().or_else(|| record.payload.field_header());

        self.conn.execute(
            "INSERT INTO records (timestamp, topic, header, payload) VALUES (?1, ?2, ?3, ?4)",
            params![record.timestamp, record.topic, header, record.payload.to_row()],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// How many records each topic holds
    pub fn topic_counts(&self) -> Result<Vec<TopicCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT topic, COUNT(*) FROM records GROUP BY topic ORDER BY topic ASC",
        )?;

        let counts = stmt
            .query_map([], |row| {
                Ok(TopicCount {
                    topic: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(counts)
    }

    /// Delete records stamped before `cutoff` (unix seconds)
    pub fn delete_before(&self, cutoff: f64) -> Result<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM records WHERE timestamp < ?1", params![cutoff])?;

        Ok(deleted)
    }

    pub fn get_records_count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl RecordSink for Database {
    fn accepts(&self, destination: Destination) -> bool {
        destination == Destination::Database
    }

    fn publish(&mut self, record: &Record) -> Result<()> {
        self.insert_record(record)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "database"
    }

    fn prune(&mut self, cutoff: f64) -> Result<usize> {
        self.delete_before(cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CYCLE_STATS_HEADER;

    fn stats_record(timestamp: f64, row: &str) -> Record {
        Record::text(
            &[Destination::CsvFile, Destination::Database],
            "cyclewatch/logStats_Sump",
            row.to_string(),
            timestamp,
        )
        .with_header(CYCLE_STATS_HEADER)
    }

    #[test]
    fn test_insert_and_count_by_topic() {
        let mut db = Database::open_in_memory().unwrap();

        for i in 0..5 {
            db.publish(&stats_record(i as f64, &format!("{}.0,100.0,1.0", i))).unwrap();
        }
        db.publish(&Record::text(
            &[Destination::Database],
            "cyclewatch/Alert",
            "Sump on time exceeded!".into(),
            10.0,
        ))
        .unwrap();

        assert_eq!(db.get_records_count().unwrap(), 6);
        let counts = db.topic_counts().unwrap();
        assert_eq!(
            counts,
            vec![
                TopicCount { topic: "cyclewatch/Alert".into(), count: 1 },
                TopicCount { topic: "cyclewatch/logStats_Sump".into(), count: 5 },
            ]
        );
    }

    #[test]
    fn test_header_falls_back_to_field_names() {
        let db = Database::open_in_memory().unwrap();
        let mut fields = serde_json::Map::new();
        fields.insert("Watts".into(), serde_json::json!(400.0));
        fields.insert("State".into(), serde_json::json!("on"));
        db.insert_record(&Record::fields(&[Destination::Database], "cyclewatch/logDetails_Sump", fields, 1.0))
            .unwrap();

        let (header, payload): (Option<String>, String) = db
            .conn
            .query_row("SELECT header, payload FROM records", [], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap();
        assert_eq!(header.as_deref(), Some("Watts,State"));
        assert_eq!(payload, "400.0,on");
    }

    #[test]
    fn test_prune_deletes_older_rows() {
        let mut db = Database::open_in_memory().unwrap();
        let now = 30.0 * 86_400.0;

        db.insert_record(&stats_record(now - 10.0 * 86_400.0, "a")).unwrap();
        db.insert_record(&stats_record(now - 1.0 * 86_400.0, "b")).unwrap();

        let deleted = db.prune(now - 7.0 * 86_400.0).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(db.get_records_count().unwrap(), 1);
        assert_eq!(db.delete_before(now - 7.0 * 86_400.0).unwrap(), 0);
    }

    #[test]
    fn test_only_accepts_database() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.accepts(Destination::Database));
        assert!(!db.accepts(Destination::CsvFile));
    }
}
