//! Database schema definitions for the distance ledger.

/// SQL schema for creating all database tables.
pub const SCHEMA: &str = r#"
-- Organizational groups (school, class, ...)
CREATE TABLE IF NOT EXISTS groups (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    parent_id TEXT REFERENCES groups(id) ON DELETE SET NULL,
    distance_total REAL NOT NULL DEFAULT 0,
    coins_total INTEGER NOT NULL DEFAULT 0,
    is_visible INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_groups_parent_id ON groups(parent_id);

-- Riders
CREATE TABLE IF NOT EXISTS riders (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    km_collection_enabled INTEGER NOT NULL DEFAULT 1,
    distance_total REAL NOT NULL DEFAULT 0,
    last_active TEXT,
    created_at TEXT NOT NULL
);

-- Rider membership (a rider may belong to several groups)
CREATE TABLE IF NOT EXISTS group_memberships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rider_id TEXT NOT NULL REFERENCES riders(id) ON DELETE CASCADE,
    group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    joined_at TEXT NOT NULL,
    UNIQUE(rider_id, group_id)
);

CREATE INDEX IF NOT EXISTS idx_group_memberships_group_id ON group_memberships(group_id);

-- Reporting devices
CREATE TABLE IF NOT EXISTS devices (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    distance_total REAL NOT NULL DEFAULT 0,
    last_active TEXT,
    created_at TEXT NOT NULL
);

-- Hour-bucketed distance ledger
CREATE TABLE IF NOT EXISTS ledger_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hour TEXT NOT NULL,
    distance_km REAL NOT NULL,
    rider_id TEXT REFERENCES riders(id) ON DELETE SET NULL,
    device_id TEXT NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    group_at_time TEXT REFERENCES groups(id) ON DELETE SET NULL,
    finalized INTEGER NOT NULL DEFAULT 0
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_ledger_entries_slot
    ON ledger_entries(IFNULL(rider_id, ''), device_id, hour);
CREATE INDEX IF NOT EXISTS idx_ledger_entries_group_hour ON ledger_entries(group_at_time, hour);
CREATE INDEX IF NOT EXISTS idx_ledger_entries_rider_hour ON ledger_entries(rider_id, hour);

-- Per-top-group period reset markers
CREATE TABLE IF NOT EXISTS snapshots (
    id TEXT PRIMARY KEY,
    top_group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    snapshot_date TEXT NOT NULL,
    is_undone INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    undone_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_snapshots_top_group ON snapshots(top_group_id, snapshot_date);

-- Travel tracks
CREATE TABLE IF NOT EXISTS travel_tracks (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    total_length_km REAL NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    auto_start INTEGER NOT NULL DEFAULT 0,
    start_time TEXT,
    end_time TEXT,
    created_at TEXT NOT NULL
);

-- Distance events
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    target_km REAL,
    is_active INTEGER NOT NULL DEFAULT 1,
    start_time TEXT,
    end_time TEXT,
    created_at TEXT NOT NULL
);

-- Capped per-group progress (travel and event contexts)
CREATE TABLE IF NOT EXISTS goal_status (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    context_kind TEXT NOT NULL,
    context_id TEXT NOT NULL,
    current_distance REAL NOT NULL DEFAULT 0,
    goal_reached_at TEXT,
    best_leaf_id TEXT REFERENCES groups(id) ON DELETE SET NULL,
    joined_at TEXT NOT NULL,
    UNIQUE(group_id, context_kind, context_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_goal_status_one_travel
    ON goal_status(group_id) WHERE context_kind = 'travel';
CREATE INDEX IF NOT EXISTS idx_goal_status_context ON goal_status(context_kind, context_id);

-- Leaf group share of a parent's progress
CREATE TABLE IF NOT EXISTS leaf_contributions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    leaf_group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    context_kind TEXT NOT NULL,
    context_id TEXT NOT NULL,
    current_distance REAL NOT NULL DEFAULT 0,
    goal_reached_at TEXT,
    updated_at TEXT NOT NULL,
    UNIQUE(leaf_group_id, context_kind, context_id)
);

CREATE INDEX IF NOT EXISTS idx_leaf_contributions_context
    ON leaf_contributions(context_kind, context_id, current_distance DESC);

-- Ordered milestones on a travel track
CREATE TABLE IF NOT EXISTS milestones (
    id TEXT PRIMARY KEY,
    track_id TEXT NOT NULL REFERENCES travel_tracks(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    distance_km REAL NOT NULL,
    reward_text TEXT,
    winner_group_id TEXT REFERENCES groups(id) ON DELETE SET NULL,
    reached_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_milestones_track_distance ON milestones(track_id, distance_km);

-- Persistent milestone achievements (survive track restarts)
CREATE TABLE IF NOT EXISTS milestone_achievements (
    id TEXT PRIMARY KEY,
    group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    milestone_id TEXT NOT NULL REFERENCES milestones(id) ON DELETE CASCADE,
    track_id TEXT NOT NULL REFERENCES travel_tracks(id) ON DELETE CASCADE,
    reached_at TEXT NOT NULL,
    reached_distance REAL,
    reward_text TEXT,
    is_redeemed INTEGER NOT NULL DEFAULT 0,
    redeemed_at TEXT,
    UNIQUE(group_id, milestone_id)
);

CREATE INDEX IF NOT EXISTS idx_milestone_achievements_group ON milestone_achievements(group_id, reached_at);
CREATE INDEX IF NOT EXISTS idx_milestone_achievements_track ON milestone_achievements(track_id, reached_at);

-- Goal history (assignments, completions, restarts)
CREATE TABLE IF NOT EXISTS goal_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    context_kind TEXT NOT NULL,
    context_id TEXT NOT NULL,
    group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    action TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT NOT NULL,
    distance_km REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_goal_history_group ON goal_history(group_id, end_time);
"#;

/// SQL for schema version tracking.
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;
