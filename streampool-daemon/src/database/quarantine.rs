//! Quarantine store operations.

use rusqlite::{params, Transaction};

use super::{Database, QuarantineRecord, Result};

impl Database {
    /// Move an endpoint from the active pool into quarantine.
    ///
    /// Returns `false` when the endpoint is no longer in the pool.
    pub fn move_to_quarantine(&mut self, endpoint_id: i64, now: i64) -> Result<bool> {
        let tx = self.conn.transaction()?;
        let moved = Self::quarantine_in(&tx, endpoint_id, now)?;
        tx.commit()?;
        Ok(moved)
    }

    /// Copy the endpoint row into quarantine and delete it from the pool,
    /// inside the caller's transaction.
    pub(super) fn quarantine_in(tx: &Transaction, endpoint_id: i64, now: i64) -> Result<bool> {
        let copied = tx.execute(
            "INSERT OR REPLACE INTO quarantine (
                channel_key, url, priority, stability, success_rate, score,
                failure_count, last_failed_at, quarantined_at
             )
             SELECT channel_key, url, priority, stability, success_rate, score,
                    failure_count, last_failed_at, ?2
             FROM endpoints WHERE id = ?1",
            params![endpoint_id, now],
        )?;
        if copied == 0 {
            return Ok(false);
        }

        tx.execute("DELETE FROM endpoints WHERE id = ?1", [endpoint_id])?;
        Ok(true)
    }

    pub(super) fn is_quarantined_in(tx: &Transaction, url: &str) -> Result<bool> {
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM quarantine WHERE url = ?1",
            [url],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Check whether a URL is in quarantine.
    pub fn is_quarantined(&self, url: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM quarantine WHERE url = ?1",
            [url],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get quarantine records, most recent first.
    pub fn get_quarantine(&self, limit: i64) -> Result<Vec<QuarantineRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, channel_key, url, priority, stability, success_rate, score,
                    failure_count, last_failed_at, quarantined_at
             FROM quarantine ORDER BY quarantined_at DESC, id DESC LIMIT ?1",
        )?;

        let records = stmt
            .query_map([limit], |row| {
                Ok(QuarantineRecord {
                    id: row.get(0)?,
                    channel_key: row.get(1)?,
                    url: row.get(2)?,
                    priority: row.get(3)?,
                    stability: row.get(4)?,
                    success_rate: row.get(5)?,
                    score: row.get(6)?,
                    failure_count: row.get(7)?,
                    last_failed_at: row.get(8)?,
                    quarantined_at: row.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Count quarantine records.
    pub fn count_quarantine(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM quarantine", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Delete quarantine records older than `cutoff`. Returns the number removed.
    pub fn purge_quarantine_before(&self, cutoff: i64) -> Result<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM quarantine WHERE quarantined_at < ?1", [cutoff])?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streampool_protocol::IngestRecord;

    fn pool_with(urls: &[&str]) -> Database {
        let mut db = Database::open_in_memory().unwrap();
        let records: Vec<_> = urls
            .iter()
            .map(|url| IngestRecord::new("cctv1", *url, 0))
            .collect();
        db.ingest_records(&records).unwrap();
        db
    }

    #[test]
    fn test_move_to_quarantine() {
        let mut db = pool_with(&["http://a/1", "http://a/2"]);
        let endpoint = db.get_endpoint_by_url("http://a/1").unwrap().unwrap();

        assert!(db.move_to_quarantine(endpoint.id, 1_000).unwrap());
        assert!(db.get_endpoint(endpoint.id).unwrap().is_none());
        assert!(db.is_quarantined("http://a/1").unwrap());
        assert_eq!(db.count_endpoints().unwrap(), 1);

        let records = db.get_quarantine(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url, "http://a/1");
        assert_eq!(records[0].quarantined_at, 1_000);
        assert_eq!(records[0].stability, Some(0.9));

        // A second move is a no-op.
        assert!(!db.move_to_quarantine(endpoint.id, 2_000).unwrap());
        assert_eq!(db.count_quarantine().unwrap(), 1);
    }

    #[test]
    fn test_reingest_of_quarantined_url_is_skipped() {
        let mut db = pool_with(&["http://a/1"]);
        let endpoint = db.get_endpoint_by_url("http://a/1").unwrap().unwrap();
        db.move_to_quarantine(endpoint.id, 1_000).unwrap();

        let summary = db
            .ingest_records(&[IngestRecord::new("cctv1", "http://a/1", 0)])
            .unwrap();
        assert_eq!(summary.quarantined, 1);
        assert_eq!(summary.inserted, 0);
        assert!(db.get_endpoint_by_url("http://a/1").unwrap().is_none());
    }

    #[test]
    fn test_purge_quarantine_before() {
        let mut db = pool_with(&["http://a/1", "http://a/2"]);
        let first = db.get_endpoint_by_url("http://a/1").unwrap().unwrap();
        let second = db.get_endpoint_by_url("http://a/2").unwrap().unwrap();
        db.move_to_quarantine(first.id, 100).unwrap();
        db.move_to_quarantine(second.id, 500).unwrap();

        assert_eq!(db.purge_quarantine_before(100).unwrap(), 0);
        assert_eq!(db.purge_quarantine_before(101).unwrap(), 1);
        assert!(!db.is_quarantined("http://a/1").unwrap());
        assert!(db.is_quarantined("http://a/2").unwrap());
    }
}
