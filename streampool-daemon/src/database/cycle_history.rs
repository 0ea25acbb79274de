//! Coordinator cycle history.

use rusqlite::params;
use streampool_protocol::CycleKind;

use super::{CycleCounts, CycleHistoryRecord, Database, Result};

impl Database {
    /// Record the start of a cycle. Returns the history row id.
    pub fn insert_cycle_start(&self, kind: CycleKind, started_at: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO cycle_history (kind, started_at) VALUES (?1, ?2)",
            params![kind.as_str(), started_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Record how a cycle ended.
    pub fn finish_cycle(
        &self,
        id: i64,
        finished_at: i64,
        counts: &CycleCounts,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE cycle_history SET
                finished_at = ?2, probed = ?3, succeeded = ?4, failed = ?5,
                quarantined = ?6, purged = ?7, success = ?8, error_message = ?9
             WHERE id = ?1",
            params![
                id,
                finished_at,
                counts.probed as i64,
                counts.succeeded as i64,
                counts.failed as i64,
                counts.quarantined as i64,
                counts.purged as i64,
                success as i32,
                error_message,
            ],
        )?;
        Ok(())
    }

    /// Get recent cycle history, newest first.
    pub fn get_cycle_history(&self, limit: i64) -> Result<Vec<CycleHistoryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, started_at, finished_at, probed, succeeded, failed,
                    quarantined, purged, success, error_message
             FROM cycle_history ORDER BY id DESC LIMIT ?1",
        )?;

        let records = stmt
            .query_map([limit], |row| {
                Ok(CycleHistoryRecord {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    started_at: row.get(2)?,
                    finished_at: row.get(3)?,
                    probed: row.get(4)?,
                    succeeded: row.get(5)?,
                    failed: row.get(6)?,
                    quarantined: row.get(7)?,
                    purged: row.get(8)?,
                    success: row.get::<_, Option<i32>>(9)?.map(|v| v != 0),
                    error_message: row.get(10)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_history() {
        let db = Database::open_in_memory().unwrap();
        let first = db.insert_cycle_start(CycleKind::Health, 100).unwrap();
        let counts = CycleCounts {
            probed: 5,
            succeeded: 3,
            failed: 2,
            quarantined: 1,
            purged: 0,
        };
        db.finish_cycle(first, 160, &counts, true, None).unwrap();

        let second = db.insert_cycle_start(CycleKind::QuarantinePurge, 200).unwrap();
        db.finish_cycle(second, 201, &CycleCounts::default(), false, Some("disk full"))
            .unwrap();

        let history = db.get_cycle_history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, "purge");
        assert_eq!(history[0].success, Some(false));
        assert_eq!(history[0].error_message.as_deref(), Some("disk full"));
        assert_eq!(history[1].probed, 5);
        assert_eq!(history[1].quarantined, 1);
        assert_eq!(history[1].finished_at, Some(160));
    }

    #[test]
    fn test_unfinished_cycle_has_no_outcome() {
        let db = Database::open_in_memory().unwrap();
        db.insert_cycle_start(CycleKind::MediaRecheck, 100).unwrap();

        let history = db.get_cycle_history(1).unwrap();
        assert_eq!(history[0].success, None);
        assert_eq!(history[0].finished_at, None);
    }
}
