//! Endpoint pool and channel operations.

use std::collections::HashSet;

use rusqlite::{params, types::Type, OptionalExtension, Row, Transaction};
use streampool_protocol::{Codec, EndpointState, IngestRecord, Reputation, Resolution};

use super::{
    ApplySummary, Database, EndpointRecord, EndpointUpdate, EndpointWithChannel,
    IngestSummary, Result,
};

const ENDPOINT_COLUMNS: &str = "e.id, e.channel_key, e.url, e.priority, e.latency_ms, e.throughput_kbps,
     e.resolution_height, e.codec, e.stability, e.success_rate, e.score, e.failure_count,
     e.last_failed_at, e.last_checked_at, e.state, e.created_at, e.updated_at";

impl Database {
    /// Merge an ingestion batch into the pool.
    ///
    /// New URLs enter as `untested` with the initial reputation. Known URLs
    /// get their channel and priority refreshed but keep their history.
    /// URLs currently in quarantine are ignored.
    pub fn ingest_records(&mut self, records: &[IngestRecord]) -> Result<IngestSummary> {
        let tx = self.conn.transaction()?;
        let mut summary = IngestSummary::default();
        let mut seen = HashSet::new();

        for record in records {
            if let Err(e) = record.validate() {
                log::warn!("Ingest: rejected {}: {}", record.url, e);
                summary.rejected += 1;
                continue;
            }
            let url = record.url.trim();
            if !seen.insert(url.to_string()) {
                log::debug!("Ingest: duplicate URL in batch ignored: {}", url);
                continue;
            }
            if Self::is_quarantined_in(&tx, url)? {
                log::info!("Ingest: {} is quarantined, skipping", url);
                summary.quarantined += 1;
                continue;
            }

            Self::upsert_channel_in(&tx, record)?;

            let existing: Option<i64> = tx
                .query_row("SELECT id FROM endpoints WHERE url = ?1", [url], |row| {
                    row.get(0)
                })
                .optional()?;

            match existing {
                Some(id) => {
                    tx.execute(
                        "UPDATE endpoints SET channel_key = ?1, priority = ?2 WHERE id = ?3",
                        params![record.channel_key, record.priority, id],
                    )?;
                    summary.updated += 1;
                }
                None => {
                    let initial = Reputation::INITIAL;
                    tx.execute(
                        "INSERT INTO endpoints (channel_key, url, priority, stability, success_rate, state)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            record.channel_key,
                            url,
                            record.priority,
                            initial.stability,
                            initial.success_rate,
                            EndpointState::Untested.as_str(),
                        ],
                    )?;
                    summary.inserted += 1;
                }
            }
        }

        tx.commit()?;
        Ok(summary)
    }

    fn upsert_channel_in(tx: &Transaction, record: &IngestRecord) -> Result<()> {
        tx.execute(
            "INSERT INTO channels (channel_key, title, group_title, tvg_id, logo_url, display_order)
             VALUES (?1, ?2, ?3, ?4, ?5, (SELECT COALESCE(MAX(display_order), 0) + 1 FROM channels))
             ON CONFLICT(channel_key) DO UPDATE SET
                title = COALESCE(excluded.title, channels.title),
                group_title = COALESCE(excluded.group_title, channels.group_title),
                tvg_id = COALESCE(excluded.tvg_id, channels.tvg_id),
                logo_url = COALESCE(excluded.logo_url, channels.logo_url)",
            params![
                record.channel_key,
                record.title,
                record.group_title,
                record.tvg_id,
                record.logo_url,
            ],
        )?;
        Ok(())
    }

    /// Get every endpoint in the active pool.
    pub fn get_active_endpoints(&self) -> Result<Vec<EndpointRecord>> {
        let sql = format!(
            "SELECT {} FROM endpoints e ORDER BY e.channel_key, e.priority, e.id",
            ENDPOINT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([], Self::row_to_endpoint_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Get a single endpoint by id.
    pub fn get_endpoint(&self, id: i64) -> Result<Option<EndpointRecord>> {
        let sql = format!("SELECT {} FROM endpoints e WHERE e.id = ?1", ENDPOINT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map([id], Self::row_to_endpoint_record)?;
        Ok(rows.next().transpose()?)
    }

    /// Get a single endpoint by URL.
    pub fn get_endpoint_by_url(&self, url: &str) -> Result<Option<EndpointRecord>> {
        let sql = format!("SELECT {} FROM endpoints e WHERE e.url = ?1", ENDPOINT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map([url], Self::row_to_endpoint_record)?;
        Ok(rows.next().transpose()?)
    }

    /// Get the active pool joined with channel display metadata.
    pub fn get_endpoints_with_channels(&self) -> Result<Vec<EndpointWithChannel>> {
        let sql = format!(
            "SELECT {}, c.title, c.group_title, COALESCE(c.display_order, 0) AS display_order
             FROM endpoints e
             LEFT JOIN channels c ON c.channel_key = e.channel_key
             ORDER BY display_order, e.channel_key, e.priority, e.id",
            ENDPOINT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([], |row| {
                Ok(EndpointWithChannel {
                    endpoint: Self::row_to_endpoint_record(row)?,
                    title: row.get("title")?,
                    group_title: row.get("group_title")?,
                    display_order: row.get("display_order")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Count endpoints in the active pool.
    pub fn count_endpoints(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM endpoints", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Apply a finished cycle's updates in one transaction.
    ///
    /// Updates in the `Quarantined` state move their endpoint out of the
    /// pool within the same transaction.
    pub fn apply_updates(&mut self, updates: &[EndpointUpdate], now: i64) -> Result<ApplySummary> {
        let tx = self.conn.transaction()?;
        let mut summary = ApplySummary::default();

        for update in updates {
            let changed = tx.execute(
                "UPDATE endpoints SET
                    latency_ms = ?1, throughput_kbps = ?2, resolution_height = ?3, codec = ?4,
                    stability = ?5, success_rate = ?6, score = ?7,
                    state = ?8, failure_count = ?9, last_failed_at = ?10, last_checked_at = ?11
                 WHERE id = ?12",
                params![
                    update.latency_ms.map(|v| v as i64),
                    update.throughput_kbps,
                    update.resolution.height(),
                    update.codec.name(),
                    update.reputation.stability,
                    update.reputation.success_rate,
                    update.score,
                    update.state.as_str(),
                    update.failure_count,
                    update.last_failed_at,
                    update.checked_at,
                    update.id,
                ],
            )?;

            if changed == 0 {
                log::warn!("Endpoint {} vanished from the pool during the cycle", update.id);
                summary.missing += 1;
                continue;
            }

            if update.state == EndpointState::Quarantined {
                if Self::quarantine_in(&tx, update.id, now)? {
                    summary.quarantined += 1;
                }
            } else {
                summary.updated += 1;
            }
        }

        tx.commit()?;
        Ok(summary)
    }

    /// Write re-inspected resolution and codec values.
    pub fn update_media(&mut self, updates: &[(i64, Resolution, Codec)]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut updated = 0;
        for (id, resolution, codec) in updates {
            updated += tx.execute(
                "UPDATE endpoints SET resolution_height = ?1, codec = ?2 WHERE id = ?3",
                params![resolution.height(), codec.name(), id],
            )?;
        }
        tx.commit()?;
        Ok(updated)
    }

    /// Helper: Convert a row to EndpointRecord.
    fn row_to_endpoint_record(row: &Row) -> rusqlite::Result<EndpointRecord> {
        let failure_count: u32 = row.get("failure_count")?;
        let state_name: String = row.get("state")?;
        let state = EndpointState::from_parts(&state_name, failure_count).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(14, Type::Text, Box::new(e))
        })?;

        Ok(EndpointRecord {
            id: row.get("id")?,
            channel_key: row.get("channel_key")?,
            url: row.get("url")?,
            priority: row.get("priority")?,
            latency_ms: row.get::<_, Option<i64>>("latency_ms")?.map(|v| v.max(0) as u64),
            throughput_kbps: row.get("throughput_kbps")?,
            resolution: Resolution::from(
                row.get::<_, Option<i64>>("resolution_height")?
                    .map(|v| v.max(0) as u32),
            ),
            codec: Codec::from(row.get::<_, Option<String>>("codec")?),
            reputation: Reputation {
                stability: row.get("stability")?,
                success_rate: row.get("success_rate")?,
            },
            score: row.get("score")?,
            state,
            last_failed_at: row.get("last_failed_at")?,
            last_checked_at: row.get("last_checked_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}
