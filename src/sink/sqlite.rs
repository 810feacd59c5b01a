//! SQLite persistence: batched modulation inserts and the last-processed
//! marker.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, params};

use crate::core::config::RetentionConfig;
use crate::core::errors::{Result, ScanError};
use crate::scan::{ModulationRecord, RecordSink};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS modulation (
    id        INTEGER PRIMARY KEY,
    cmts      TEXT NOT NULL,
    upstream  TEXT NOT NULL,
    modulation TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_modulation_timestamp ON modulation(timestamp);
CREATE TABLE IF NOT EXISTS lastupdate (
    id    INTEGER PRIMARY KEY CHECK (id = 1),
    stamp INTEGER NOT NULL
);
";

/// Shared-connection sink. Workers store concurrently; the mutex serializes
/// access to the single connection.
pub struct SqliteSink {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) retention: RetentionConfig,
}

impl SqliteSink {
    /// Open (creating directories and schema as needed).
    pub fn open(path: &Path, retention: RetentionConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ScanError::io(parent, source))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retention,
        })
    }

    /// In-memory database, for tests and dry runs.
    pub fn open_in_memory(retention: RetentionConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retention,
        })
    }

    /// Total modulation rows.
    pub fn row_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM modulation", [], |row| row.get(0))?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count as u64)
    }

    /// The last-processed marker, if one was ever written.
    pub fn last_processed(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let stamp: Option<i64> = conn
            .query_row("SELECT stamp FROM lastupdate WHERE id = 1", [], |row| {
                row.get(0)
            })
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(stamp.and_then(|s| DateTime::from_timestamp(s, 0)))
    }
}

impl RecordSink for SqliteSink {
    fn store(&self, device: &str, records: &[ModulationRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let now = Utc::now().timestamp();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO modulation (cmts, upstream, modulation, timestamp) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for record in records {
                stmt.execute(params![
                    device,
                    record.upstream,
                    record.modulation.as_str(),
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn mark_processed(&self, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO lastupdate (id, stamp) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET stamp = excluded.stamp",
            params![at.timestamp()],
        )?;
        Ok(())
    }
}
