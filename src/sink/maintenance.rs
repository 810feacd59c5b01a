//! Retention maintenance: caps modulation-table growth.
//!
//! Two prune passes, mirroring the retention policy of the database this
//! replaces: a retention-days cap plus a shorter detail window that keeps
//! the hot table small. Invoked as a non-blocking check at cycle start;
//! the daemon treats failures as warnings.

use chrono::Utc;
use rusqlite::params;

use crate::core::errors::Result;
use crate::scan::{MaintenanceHook, MaintenanceSummary};
use crate::sink::sqlite::SqliteSink;

impl SqliteSink {
    fn prune_older_than(&self, cutoff_epoch: i64) -> Result<u64> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM modulation WHERE timestamp < ?1",
            params![cutoff_epoch],
        )?;
        Ok(changed as u64)
    }
}

impl MaintenanceHook for SqliteSink {
    fn run_check(&self) -> Result<MaintenanceSummary> {
        let rows_before = self.row_count()?;
        let now = Utc::now().timestamp();

        let retention_cutoff = now - i64::from(self.retention.retention_days) * 86_400;
        let detail_cutoff = now - i64::from(self.retention.detail_window_hours) * 3_600;

        let mut rows_pruned = self.prune_older_than(retention_cutoff)?;
        // The detail window is the tighter bound in the default config; the
        // retention-days pass stays as a backstop when operators widen it.
        rows_pruned += self.prune_older_than(detail_cutoff)?;

        Ok(MaintenanceSummary {
            rows_before,
            rows_pruned,
            degraded: rows_before > self.retention.row_warn_threshold,
        })
    }
}
