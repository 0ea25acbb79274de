//! Atomic snapshot publication.
//!
//! A [`Snapshot`] is an immutable view of the pool as one completed cycle
//! left it. The [`SnapshotPublisher`] builds the next snapshot completely and
//! then swaps its `Arc` pointer, so a reader holding a handle keeps one
//! consistent view while newer cycles publish.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use streampool_protocol::{ChannelView, CycleKind, RouteError, SnapshotEntry};
use tokio::sync::RwLock;

use crate::database::{Database, EndpointWithChannel, StoredSnapshot, StoredSnapshotEntry};

/// Publication-only filters. They never affect reputation or quarantine.
#[derive(Debug, Clone, Default)]
pub struct PublishFilter {
    /// Hide endpoints below this height. Any value also hides endpoints of
    /// unknown height; `Some(0)` hides only those.
    pub min_height: Option<u32>,
    /// Codec names to hide, lowercase.
    pub codec_exclude: Vec<String>,
}

impl PublishFilter {
    pub fn allows(&self, entry: &SnapshotEntry) -> bool {
        match (self.min_height, entry.resolution.height()) {
            (Some(_), None) => return false,
            (Some(min), Some(h)) if h < min.max(1) => return false,
            _ => {}
        }
        match entry.codec.name() {
            Some(name) => !self
                .codec_exclude
                .iter()
                .any(|c| c.eq_ignore_ascii_case(name)),
            None => true,
        }
    }
}

/// Immutable published view of the pool.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    version: u64,
    created_at: DateTime<Utc>,
    kind: Option<CycleKind>,
    channels: Vec<ChannelView>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    #[serde(skip)]
    display_orders: Vec<i64>,
}

impl Snapshot {
    /// Version 0: nothing published yet.
    pub fn empty(created_at: DateTime<Utc>) -> Self {
        Self::empty_at(0, created_at)
    }

    /// No channels, numbered `version` so the next publish continues after it.
    pub fn empty_at(version: u64, created_at: DateTime<Utc>) -> Self {
        Self {
            version,
            created_at,
            kind: None,
            channels: Vec::new(),
            index: HashMap::new(),
            display_orders: Vec::new(),
        }
    }

    /// Build a snapshot from the pool as a cycle left it.
    ///
    /// `pool` must be in channel display order. Only endpoints with positive
    /// throughput and a measured latency are routable; channels left with no
    /// routable endpoint are omitted.
    pub fn build(
        version: u64,
        created_at: DateTime<Utc>,
        kind: Option<CycleKind>,
        pool: &[EndpointWithChannel],
        filter: &PublishFilter,
    ) -> Self {
        let mut grouped: Vec<(i64, ChannelView)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for row in pool {
            let endpoint = &row.endpoint;
            let Some(latency_ms) = endpoint.latency_ms else {
                continue;
            };
            if endpoint.throughput_kbps <= 0.0 {
                continue;
            }

            let entry = SnapshotEntry {
                channel_key: endpoint.channel_key.clone(),
                url: endpoint.url.clone(),
                title: row.title.clone(),
                group_title: row.group_title.clone(),
                priority: endpoint.priority,
                latency_ms,
                throughput_kbps: endpoint.throughput_kbps,
                resolution: endpoint.resolution,
                codec: endpoint.codec.clone(),
                score: endpoint.score,
            };
            if !filter.allows(&entry) {
                continue;
            }

            let position = *positions
                .entry(endpoint.channel_key.clone())
                .or_insert_with(|| {
                    grouped.push((
                        row.display_order,
                        ChannelView {
                            channel_key: endpoint.channel_key.clone(),
                            title: row.title.clone(),
                            group_title: row.group_title.clone(),
                            entries: Vec::new(),
                        },
                    ));
                    grouped.len() - 1
                });
            grouped[position].1.entries.push(entry);
        }

        for (_, channel) in &mut grouped {
            channel.entries.sort_by(rank);
        }

        Self::from_channels(version, created_at, kind, grouped)
    }

    fn from_channels(
        version: u64,
        created_at: DateTime<Utc>,
        kind: Option<CycleKind>,
        grouped: Vec<(i64, ChannelView)>,
    ) -> Self {
        let mut channels = Vec::with_capacity(grouped.len());
        let mut display_orders = Vec::with_capacity(grouped.len());
        let mut index = HashMap::with_capacity(grouped.len());
        for (display_order, channel) in grouped {
            index.insert(channel.channel_key.clone(), channels.len());
            display_orders.push(display_order);
            channels.push(channel);
        }
        Self {
            version,
            created_at,
            kind,
            channels,
            index,
            display_orders,
        }
    }

    /// Rebuild a snapshot loaded from the database.
    /// The last committed snapshot, served until the first cycle completes.
    ///
    /// If its entries cannot be read the snapshot starts empty but keeps the
    /// committed version number.
    pub fn restore(db: &Database, now: DateTime<Utc>) -> Self {
        match db.load_current_snapshot() {
            Ok(Some(stored)) => {
                log::info!("Snapshot: restored version {}", stored.version);
                Self::from_stored(stored)
            }
            Ok(None) => Self::empty(now),
            Err(e) => {
                let version = db.get_current_snapshot_version().ok().flatten().unwrap_or(0);
                log::warn!(
                    "Snapshot: failed to load version {}, starting empty: {}",
                    version,
                    e
                );
                Self::empty_at(version, now)
            }
        }
    }

    pub fn from_stored(stored: StoredSnapshot) -> Self {
        let created_at = DateTime::from_timestamp(stored.created_at, 0).unwrap_or_default();
        let mut grouped: Vec<(i64, ChannelView)> = Vec::new();
        for StoredSnapshotEntry {
            display_order,
            entry,
        } in stored.entries
        {
            match grouped.last_mut() {
                Some((_, channel)) if channel.channel_key == entry.channel_key => {
                    channel.entries.push(entry)
                }
                _ => grouped.push((
                    display_order,
                    ChannelView {
                        channel_key: entry.channel_key.clone(),
                        title: entry.title.clone(),
                        group_title: entry.group_title.clone(),
                        entries: vec![entry],
                    },
                )),
            }
        }
        Self::from_channels(stored.version, created_at, stored.kind, grouped)
    }

    /// Flatten into the persisted form.
    pub fn to_stored(&self) -> StoredSnapshot {
        let entries = self
            .channels
            .iter()
            .zip(&self.display_orders)
            .flat_map(|(channel, display_order)| {
                channel.entries.iter().map(move |entry| StoredSnapshotEntry {
                    display_order: *display_order,
                    entry: entry.clone(),
                })
            })
            .collect();
        StoredSnapshot {
            version: self.version,
            created_at: self.created_at.timestamp(),
            kind: self.kind,
            entries,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Channels with at least one routable endpoint, in display order.
    pub fn channels(&self) -> &[ChannelView] {
        &self.channels
    }

    pub fn channel(&self, channel_key: &str) -> Option<&ChannelView> {
        self.index.get(channel_key).map(|&i| &self.channels[i])
    }

    /// Routable endpoints of a channel, best first.
    pub fn endpoints_for(&self, channel_key: &str) -> &[SnapshotEntry] {
        self.channel(channel_key)
            .map(|c| c.entries.as_slice())
            .unwrap_or(&[])
    }

    /// Best routable endpoint of a channel.
    pub fn best(&self, channel_key: &str) -> Result<&SnapshotEntry, RouteError> {
        self.endpoints_for(channel_key)
            .first()
            .ok_or_else(|| RouteError::NoSourceAvailable(channel_key.to_string()))
    }

    pub fn entry_count(&self) -> usize {
        self.channels.iter().map(|c| c.entries.len()).sum()
    }
}

/// Score descending, then priority ascending, then URL.
fn rank(a: &SnapshotEntry, b: &SnapshotEntry) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.priority.cmp(&b.priority))
        .then_with(|| a.url.cmp(&b.url))
}

/// Holds the current snapshot.
pub struct SnapshotPublisher {
    current: RwLock<Arc<Snapshot>>,
    filter: PublishFilter,
}

impl SnapshotPublisher {
    pub fn new(initial: Snapshot, filter: PublishFilter) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            filter,
        }
    }

    /// Current snapshot handle.
    pub async fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.current.read().await)
    }

    /// Build the snapshot that would follow the current one.
    pub async fn prepare(
        &self,
        pool: &[EndpointWithChannel],
        kind: CycleKind,
        now: DateTime<Utc>,
    ) -> Snapshot {
        let next_version = self.current.read().await.version + 1;
        Snapshot::build(next_version, now, Some(kind), pool, &self.filter)
    }

    /// Make a fully built snapshot current.
    pub async fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        let mut current = self.current.write().await;
        if snapshot.version <= current.version {
            log::warn!(
                "Snapshot: publishing version {} over version {}",
                snapshot.version,
                current.version
            );
        }
        *current = Arc::clone(&snapshot);
        drop(current);

        log::info!(
            "Snapshot: published version {} ({} channels, {} endpoints)",
            snapshot.version,
            snapshot.channels.len(),
            snapshot.entry_count()
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::EndpointRecord;
    use streampool_protocol::{Codec, EndpointState, Reputation, Resolution};

    fn row(
        channel: &str,
        url: &str,
        score: f64,
        priority: i64,
        latency_ms: Option<u64>,
        throughput_kbps: f64,
    ) -> EndpointWithChannel {
        EndpointWithChannel {
            endpoint: EndpointRecord {
                id: 0,
                channel_key: channel.to_string(),
                url: url.to_string(),
                priority,
                latency_ms,
                throughput_kbps,
                resolution: Resolution::Height(1080),
                codec: Codec::H264,
                reputation: Reputation::INITIAL,
                score,
                state: EndpointState::Healthy,
                last_failed_at: None,
                last_checked_at: None,
                created_at: 0,
                updated_at: 0,
            },
            title: Some(channel.to_uppercase()),
            group_title: None,
            display_order: 0,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_build_orders_and_filters() {
        let pool = vec![
            row("cctv1", "http://c", 0.5, 1, Some(10), 100.0),
            row("cctv1", "http://b", 0.9, 2, Some(10), 100.0),
            row("cctv1", "http://a", 0.5, 1, Some(10), 100.0),
            row("cctv1", "http://dead", 5.0, 0, None, 0.0),
            row("cctv1", "http://zero", 5.0, 0, Some(10), 0.0),
        ];
        let snapshot = Snapshot::build(1, now(), Some(CycleKind::Health), &pool, &PublishFilter::default());

        let urls: Vec<_> = snapshot
            .endpoints_for("cctv1")
            .iter()
            .map(|e| e.url.as_str())
            .collect();
        assert_eq!(urls, vec!["http://b", "http://a", "http://c"]);
        assert_eq!(snapshot.best("cctv1").unwrap().url, "http://b");
    }

    #[test]
    fn test_channel_without_routable_endpoint() {
        let pool = vec![row("cctv1", "http://dead", 1.0, 0, None, 0.0)];
        let snapshot = Snapshot::build(1, now(), None, &pool, &PublishFilter::default());

        assert!(snapshot.channels().is_empty());
        assert_eq!(
            snapshot.best("cctv1").unwrap_err(),
            RouteError::NoSourceAvailable("cctv1".to_string())
        );
        assert!(snapshot.best("unknown").is_err());
    }

    #[test]
    fn test_publish_filter() {
        let mut low = row("cctv1", "http://low", 1.0, 0, Some(10), 10.0);
        low.endpoint.resolution = Resolution::Height(576);
        let mut unknown = row("cctv1", "http://unknown", 1.0, 0, Some(10), 10.0);
        unknown.endpoint.resolution = Resolution::Unknown;
        let mut avs = row("cctv1", "http://avs", 1.0, 0, Some(10), 10.0);
        avs.endpoint.codec = Codec::Avs2;
        let hd = row("cctv1", "http://hd", 1.0, 0, Some(10), 10.0);
        let pool = vec![low, unknown, avs, hd];

        let filter = PublishFilter {
            min_height: Some(720),
            codec_exclude: vec!["avs2".to_string()],
        };
        let snapshot = Snapshot::build(1, now(), None, &pool, &filter);
        let urls: Vec<_> = snapshot
            .endpoints_for("cctv1")
            .iter()
            .map(|e| e.url.as_str())
            .collect();
        assert_eq!(urls, vec!["http://hd"]);

        let known_only = PublishFilter {
            min_height: Some(0),
            codec_exclude: Vec::new(),
        };
        let snapshot = Snapshot::build(1, now(), None, &pool, &known_only);
        let urls: Vec<_> = snapshot
            .endpoints_for("cctv1")
            .iter()
            .map(|e| e.url.as_str())
            .collect();
        assert_eq!(urls, vec!["http://avs", "http://hd", "http://low"]);

        let unfiltered = Snapshot::build(1, now(), None, &pool, &PublishFilter::default());
        assert_eq!(unfiltered.endpoints_for("cctv1").len(), 4);
    }

    #[test]
    fn test_stored_round_trip_keeps_order() {
        let mut second = row("b", "http://b/1", 0.3, 0, Some(10), 10.0);
        second.display_order = 2;
        let mut first = row("a", "http://a/1", 0.1, 0, Some(10), 10.0);
        first.display_order = 1;
        let mut first_best = row("a", "http://a/2", 0.9, 0, Some(10), 10.0);
        first_best.display_order = 1;
        let pool = vec![first, first_best, second];

        let snapshot = Snapshot::build(7, now(), Some(CycleKind::Health), &pool, &PublishFilter::default());
        let restored = Snapshot::from_stored(snapshot.to_stored());

        assert_eq!(restored.version(), 7);
        assert_eq!(restored.created_at, now());
        assert_eq!(restored.channels(), snapshot.channels());
        assert_eq!(restored.best("a").unwrap().url, "http://a/2");
    }

    #[tokio::test]
    async fn test_reader_keeps_its_view() {
        let publisher = SnapshotPublisher::new(Snapshot::empty(now()), PublishFilter::default());
        let before = publisher.current().await;
        assert_eq!(before.version(), 0);

        let pool = vec![row("cctv1", "http://a", 1.0, 0, Some(10), 10.0)];
        let next = publisher.prepare(&pool, CycleKind::Health, now()).await;
        assert_eq!(next.version(), 1);
        publisher.publish(next).await;

        assert!(before.best("cctv1").is_err());
        let after = publisher.current().await;
        assert_eq!(after.version(), 1);
        assert_eq!(after.best("cctv1").unwrap().url, "http://a");
    }

    #[tokio::test]
    async fn test_restore_keeps_version_when_entries_unreadable() {
        let mut db = Database::open_in_memory().unwrap();
        assert_eq!(Snapshot::restore(&db, now()).version(), 0);

        let pool = vec![row("cctv1", "http://a", 1.0, 0, Some(10), 10.0)];
        let snapshot = Snapshot::build(5, now(), Some(CycleKind::Health), &pool, &PublishFilter::default());
        db.commit_snapshot(&snapshot.to_stored()).unwrap();
        let restored = Snapshot::restore(&db, now());
        assert_eq!(restored.version(), 5);
        assert_eq!(restored.best("cctv1").unwrap().url, "http://a");

        db.connection()
            .execute_batch("DROP TABLE snapshot_entries;")
            .unwrap();
        let restored = Snapshot::restore(&db, now());
        assert_eq!(restored.version(), 5);
        assert!(restored.channels().is_empty());

        let publisher = SnapshotPublisher::new(restored, PublishFilter::default());
        let next = publisher.prepare(&pool, CycleKind::Health, now()).await;
        assert_eq!(next.version(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_see_whole_snapshots() {
        const VERSIONS: u64 = 50;
        let publisher = Arc::new(SnapshotPublisher::new(
            Snapshot::empty(now()),
            PublishFilter::default(),
        ));

        let mut readers = Vec::new();
        for _ in 0..3 {
            let publisher = publisher.clone();
            readers.push(tokio::spawn(async move {
                let mut last = 0;
                while last < VERSIONS {
                    let snapshot = publisher.current().await;
                    let version = snapshot.version();
                    assert!(version >= last, "version went back from {} to {}", last, version);
                    for channel in snapshot.channels() {
                        for entry in &channel.entries {
                            assert!(
                                entry.url.ends_with(&format!("/v{}", version)),
                                "{} in version {}",
                                entry.url,
                                version
                            );
                        }
                    }
                    if version > 0 {
                        assert_eq!(snapshot.entry_count(), 3);
                    }
                    last = version;
                    tokio::task::yield_now().await;
                }
            }));
        }

        for version in 1..=VERSIONS {
            let pool: Vec<_> = ["a", "b", "c"]
                .iter()
                .map(|ch| row(ch, &format!("http://{}/v{}", ch, version), 1.0, 0, Some(10), 10.0))
                .collect();
            let next = publisher.prepare(&pool, CycleKind::Health, now()).await;
            assert_eq!(next.version(), version);
            publisher.publish(next).await;
            tokio::task::yield_now().await;
        }

        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(publisher.current().await.version(), VERSIONS);
    }
}
