//! Database schema definitions.

/// SQL schema for creating all database tables.
pub const SCHEMA: &str = r#"
-- Activities table
CREATE TABLE IF NOT EXISTS activities (
    id TEXT PRIMARY KEY,
    plan_name TEXT,
    started_at TEXT NOT NULL,
    duration_seconds REAL NOT NULL,
    distance_meters REAL NOT NULL,
    normalized_power REAL,
    intensity_factor REAL,
    tss REAL,
    summary_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_activities_started_at ON activities(started_at);

-- Compressed streams, one row per stream type
CREATE TABLE IF NOT EXISTS activity_streams (
    activity_id TEXT NOT NULL REFERENCES activities(id) ON DELETE CASCADE,
    stream_type TEXT NOT NULL,
    data_kind TEXT NOT NULL,
    compressed_values BLOB NOT NULL,
    compressed_timestamps BLOB NOT NULL,
    sample_count INTEGER NOT NULL,
    PRIMARY KEY (activity_id, stream_type)
);
"#;

/// SQL for schema version tracking (migrations)
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Current schema version
pub const CURRENT_VERSION: i32 = 1;
