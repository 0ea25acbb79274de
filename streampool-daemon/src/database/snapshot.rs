//! Versioned snapshot storage.
//!
//! Each publication writes a complete new version and moves the single
//! pointer row to it in the same transaction. Only the current version and
//! the one it replaced are kept.

use rusqlite::{params, OptionalExtension};
use streampool_protocol::{Codec, CycleKind, Resolution, SnapshotEntry};

use super::{Database, Result, StoredSnapshot, StoredSnapshotEntry};

impl Database {
    /// Persist a snapshot and make it current.
    pub fn commit_snapshot(&mut self, snapshot: &StoredSnapshot) -> Result<()> {
        let tx = self.conn.transaction()?;
        let version = snapshot.version as i64;

        let previous: Option<i64> = tx
            .query_row(
                "SELECT current_version FROM snapshot_pointer WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        // A restarted publisher may reuse a number that was never made current.
        tx.execute("DELETE FROM snapshot_entries WHERE version = ?1", [version])?;
        tx.execute("DELETE FROM snapshots WHERE version = ?1", [version])?;

        tx.execute(
            "INSERT INTO snapshots (version, created_at, cycle_kind, entry_count)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                version,
                snapshot.created_at,
                snapshot.kind.map(|k| k.as_str()),
                snapshot.entries.len() as i64,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO snapshot_entries (
                    version, channel_key, display_order, url, title, group_title, priority,
                    latency_ms, throughput_kbps, resolution_height, codec, score
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for stored in &snapshot.entries {
                let entry = &stored.entry;
                stmt.execute(params![
                    version,
                    entry.channel_key,
                    stored.display_order,
                    entry.url,
                    entry.title,
                    entry.group_title,
                    entry.priority,
                    entry.latency_ms as i64,
                    entry.throughput_kbps,
                    entry.resolution.height(),
                    entry.codec.name(),
                    entry.score,
                ])?;
            }
        }

        tx.execute(
            "INSERT INTO snapshot_pointer (id, current_version) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET
                current_version = excluded.current_version,
                updated_at = strftime('%s', 'now')",
            [version],
        )?;

        let keep_previous = previous.unwrap_or(version);
        tx.execute(
            "DELETE FROM snapshot_entries WHERE version NOT IN (?1, ?2)",
            params![version, keep_previous],
        )?;
        tx.execute(
            "DELETE FROM snapshots WHERE version NOT IN (?1, ?2)",
            params![version, keep_previous],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Get the version the pointer row names, if any snapshot was committed.
    pub fn get_current_snapshot_version(&self) -> Result<Option<u64>> {
        let version: Option<i64> = self
            .conn
            .query_row(
                "SELECT current_version FROM snapshot_pointer WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.map(|v| v as u64))
    }

    /// Load the current snapshot.
    pub fn load_current_snapshot(&self) -> Result<Option<StoredSnapshot>> {
        match self.get_current_snapshot_version()? {
            Some(version) => self.load_snapshot(version),
            None => Ok(None),
        }
    }

    /// Load a retained snapshot version.
    pub fn load_snapshot(&self, version: u64) -> Result<Option<StoredSnapshot>> {
        let header: Option<(i64, Option<String>)> = self
            .conn
            .query_row(
                "SELECT created_at, cycle_kind FROM snapshots WHERE version = ?1",
                [version as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((created_at, kind)) = header else {
            return Ok(None);
        };
        let kind = kind.map(|k| k.parse::<CycleKind>()).transpose()?;

        let mut stmt = self.conn.prepare(
            "SELECT channel_key, display_order, url, title, group_title, priority,
                    latency_ms, throughput_kbps, resolution_height, codec, score
             FROM snapshot_entries WHERE version = ?1
             ORDER BY display_order, channel_key, id",
        )?;
        let entries = stmt
            .query_map([version as i64], |row| {
                Ok(StoredSnapshotEntry {
                    display_order: row.get(1)?,
                    entry: SnapshotEntry {
                        channel_key: row.get(0)?,
                        url: row.get(2)?,
                        title: row.get(3)?,
                        group_title: row.get(4)?,
                        priority: row.get(5)?,
                        latency_ms: row.get::<_, i64>(6)?.max(0) as u64,
                        throughput_kbps: row.get(7)?,
                        resolution: Resolution::from(
                            row.get::<_, Option<i64>>(8)?.map(|v| v.max(0) as u32),
                        ),
                        codec: Codec::from(row.get::<_, Option<String>>(9)?),
                        score: row.get(10)?,
                    },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Some(StoredSnapshot {
            version,
            created_at,
            kind,
            entries,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retained_versions(db: &Database) -> Vec<u64> {
        let mut stmt = db
            .connection()
            .prepare("SELECT version FROM snapshots ORDER BY version DESC")
            .unwrap();
        let versions = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .unwrap()
            .map(|v| v.unwrap() as u64)
            .collect();
        versions
    }

    fn entry(channel: &str, url: &str, score: f64) -> StoredSnapshotEntry {
        StoredSnapshotEntry {
            display_order: 1,
            entry: SnapshotEntry {
                channel_key: channel.to_string(),
                url: url.to_string(),
                title: Some("CCTV-1".to_string()),
                group_title: None,
                priority: 0,
                latency_ms: 40,
                throughput_kbps: 900.0,
                resolution: Resolution::Height(1080),
                codec: Codec::Hevc,
                score,
            },
        }
    }

    fn snapshot(version: u64, entries: Vec<StoredSnapshotEntry>) -> StoredSnapshot {
        StoredSnapshot {
            version,
            created_at: 1_700_000_000 + version as i64,
            kind: Some(CycleKind::Health),
            entries,
        }
    }

    #[test]
    fn test_empty_database_has_no_snapshot() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.load_current_snapshot().unwrap().is_none());
    }

    #[test]
    fn test_commit_and_load() {
        let mut db = Database::open_in_memory().unwrap();
        let snap = snapshot(1, vec![entry("cctv1", "http://a/1", 0.8)]);
        db.commit_snapshot(&snap).unwrap();

        let loaded = db.load_current_snapshot().unwrap().unwrap();
        assert_eq!(loaded, snap);
    }

    #[test]
    fn test_only_current_and_previous_are_retained() {
        let mut db = Database::open_in_memory().unwrap();
        for version in 1..=4 {
            let snap = snapshot(version, vec![entry("cctv1", "http://a/1", version as f64)]);
            db.commit_snapshot(&snap).unwrap();
        }

        assert_eq!(retained_versions(&db), vec![4, 3]);
        assert_eq!(db.get_current_snapshot_version().unwrap(), Some(4));
        assert!(db.load_snapshot(2).unwrap().is_none());

        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM snapshot_entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_recommit_same_version_replaces_entries() {
        let mut db = Database::open_in_memory().unwrap();
        db.commit_snapshot(&snapshot(1, vec![entry("cctv1", "http://a/1", 0.1)]))
            .unwrap();
        db.commit_snapshot(&snapshot(1, vec![entry("cctv2", "http://b/1", 0.2)]))
            .unwrap();

        let loaded = db.load_current_snapshot().unwrap().unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].entry.channel_key, "cctv2");
    }
}
