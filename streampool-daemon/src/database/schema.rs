//! Database schema definitions.

/// SQL schema for the endpoint pool database.
pub const SCHEMA_SQL: &str = r#"
-- Channel display metadata (publication only, never ranking)
CREATE TABLE IF NOT EXISTS channels (
    channel_key TEXT PRIMARY KEY,
    title TEXT,
    group_title TEXT,
    tvg_id TEXT,
    logo_url TEXT,
    display_order INTEGER DEFAULT 0,
    created_at INTEGER DEFAULT (strftime('%s', 'now')),
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Active endpoint pool
CREATE TABLE IF NOT EXISTS endpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_key TEXT NOT NULL,
    url TEXT UNIQUE NOT NULL,
    priority INTEGER DEFAULT 0,            -- Display order within the channel
    -- Last measurements
    latency_ms INTEGER,                    -- NULL when the last cycle failed
    throughput_kbps REAL DEFAULT 0.0,
    resolution_height INTEGER,             -- NULL = unknown
    codec TEXT,                            -- NULL = unknown
    -- Reputation
    stability REAL DEFAULT 0.9,
    success_rate REAL DEFAULT 0.95,
    score REAL DEFAULT 0.0,
    -- Failure tracking
    failure_count INTEGER DEFAULT 0,       -- Consecutive failed cycles
    last_failed_at INTEGER,
    last_checked_at INTEGER,
    state TEXT DEFAULT 'untested',         -- untested/healthy/failing
    -- Metadata
    created_at INTEGER DEFAULT (strftime('%s', 'now')),
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Endpoints evicted after reaching the failure threshold
CREATE TABLE IF NOT EXISTS quarantine (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_key TEXT NOT NULL,
    url TEXT UNIQUE NOT NULL,
    priority INTEGER DEFAULT 0,
    stability REAL,
    success_rate REAL,
    score REAL,
    failure_count INTEGER NOT NULL,
    last_failed_at INTEGER,
    quarantined_at INTEGER NOT NULL
);

-- Published snapshot versions
CREATE TABLE IF NOT EXISTS snapshots (
    version INTEGER PRIMARY KEY,
    created_at INTEGER NOT NULL,
    cycle_kind TEXT,
    entry_count INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS snapshot_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version INTEGER NOT NULL,
    channel_key TEXT NOT NULL,
    display_order INTEGER DEFAULT 0,
    url TEXT NOT NULL,
    title TEXT,
    group_title TEXT,
    priority INTEGER DEFAULT 0,
    latency_ms INTEGER NOT NULL,
    throughput_kbps REAL NOT NULL,
    resolution_height INTEGER,
    codec TEXT,
    score REAL NOT NULL,
    FOREIGN KEY(version) REFERENCES snapshots(version) ON DELETE CASCADE
);

-- Pointer to the current snapshot version
CREATE TABLE IF NOT EXISTS snapshot_pointer (
    id INTEGER PRIMARY KEY CHECK (id = 1),  -- Only one pointer row allowed
    current_version INTEGER NOT NULL,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Coordinator task history
CREATE TABLE IF NOT EXISTS cycle_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    probed INTEGER DEFAULT 0,
    succeeded INTEGER DEFAULT 0,
    failed INTEGER DEFAULT 0,
    quarantined INTEGER DEFAULT 0,
    purged INTEGER DEFAULT 0,
    success INTEGER,
    error_message TEXT
);

-- Indexes for efficient queries
CREATE INDEX IF NOT EXISTS idx_endpoints_channel ON endpoints(channel_key);
CREATE INDEX IF NOT EXISTS idx_endpoints_score ON endpoints(channel_key, score DESC);
CREATE INDEX IF NOT EXISTS idx_quarantine_quarantined_at ON quarantine(quarantined_at);
CREATE INDEX IF NOT EXISTS idx_snapshot_entries_version ON snapshot_entries(version, channel_key);
CREATE INDEX IF NOT EXISTS idx_cycle_history_started_at ON cycle_history(started_at);

-- Trigger to update updated_at on endpoints
CREATE TRIGGER IF NOT EXISTS endpoints_updated_at
AFTER UPDATE ON endpoints
BEGIN
    UPDATE endpoints SET updated_at = strftime('%s', 'now') WHERE id = NEW.id;
END;

-- Trigger to update updated_at on channels
CREATE TRIGGER IF NOT EXISTS channels_updated_at
AFTER UPDATE ON channels
BEGIN
    UPDATE channels SET updated_at = strftime('%s', 'now') WHERE channel_key = NEW.channel_key;
END;
"#;
