//! Activity store using rusqlite.
//!
//! One `activities` row holds the scalar summary; each compressed stream is
//! an `activity_streams` row keyed by `(activity_id, stream_type)`.

use crate::metrics::analytics::{fill_gaps, TrainingLoadPoint};
use crate::recording::types::{ActivityPayload, ActivitySummary};
use crate::storage::schema::{CURRENT_VERSION, SCHEMA, SCHEMA_VERSION_TABLE};
use crate::streams::{decode_all, CompressedStream, DataKind, DecodedStreams, StreamType};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result as SqliteResult};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// A loaded activity. Streams that failed to decode are listed in
/// `streams.failures`; the summary is always present.
#[derive(Debug)]
pub struct StoredActivity {
    pub summary: ActivitySummary,
    pub streams: DecodedStreams,
}

/// SQLite-backed store for finished activities.
pub struct ActivityStore {
    conn: Connection,
}

impl ActivityStore {
    /// Open or create a store at the given path.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::IoError(e.to_string()))?;
        }

        let conn =
            Connection::open(path).map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let store = Self { conn };
        store.initialize()?;

        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let store = Self { conn };
        store.initialize()?;

        Ok(store)
    }

    /// Initialize the database schema.
    fn initialize(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        self.conn
            .execute_batch(SCHEMA_VERSION_TABLE)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        let current_version = self.get_schema_version()?;

        if current_version < CURRENT_VERSION {
            self.migrate(current_version)?;
        }

        Ok(())
    }

    /// Get the current schema version.
    fn get_schema_version(&self) -> Result<i32, DatabaseError> {
        let result: SqliteResult<i32> = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(version) => Ok(version),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    /// Run database migrations.
    fn migrate(&self, from_version: i32) -> Result<(), DatabaseError> {
        if from_version < 1 {
            self.conn
                .execute_batch(SCHEMA)
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            self.conn
                .execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
                    [CURRENT_VERSION],
                )
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            tracing::info!("Database migrated to version {}", CURRENT_VERSION);
        }

        Ok(())
    }

    /// Save a finalized activity and its streams in one transaction.
    pub fn save_activity(&mut self, payload: &ActivityPayload) -> Result<(), DatabaseError> {
        let summary = &payload.summary;
        let summary_json = serde_json::to_string(summary)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        let tx = self
            .conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        tx.execute(
            "INSERT INTO activities (id, plan_name, started_at, duration_seconds,
             distance_meters, normalized_power, intensity_factor, tss, summary_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                summary.session_id.to_string(),
                summary.plan_name,
                summary.started_at.to_rfc3339(),
                summary.duration_seconds,
                summary.distance_meters,
                summary.normalized_power,
                summary.intensity_factor,
                summary.tss,
                summary_json,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DatabaseError::ConstraintViolation(format!("Activity {}", summary.session_id))
            }
            e => DatabaseError::QueryFailed(e.to_string()),
        })?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO activity_streams (activity_id, stream_type, data_kind,
                     compressed_values, compressed_timestamps, sample_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

            for stream in &payload.streams {
                stmt.execute(params![
                    summary.session_id.to_string(),
                    stream.stream_type.as_str(),
                    stream.data_kind.as_str(),
                    stream.compressed_values,
                    stream.compressed_timestamps,
                    stream.sample_count as i64,
                ])
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            }
        }

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        tracing::info!(
            "Saved activity {} with {} streams",
            summary.session_id,
            payload.streams.len()
        );
        Ok(())
    }

    /// Get an activity summary by ID.
    pub fn get_summary(&self, id: &Uuid) -> Result<Option<ActivitySummary>, DatabaseError> {
        let result: SqliteResult<String> = self.conn.query_row(
            "SELECT summary_json FROM activities WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        );

        match result {
            Ok(json) => Ok(Some(parse_summary(&json)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    /// Get the compressed streams of an activity.
    pub fn get_streams(&self, id: &Uuid) -> Result<Vec<CompressedStream>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT stream_type, data_kind, compressed_values, compressed_timestamps,
                 sample_count FROM activity_streams WHERE activity_id = ?1 ORDER BY stream_type",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut streams = Vec::new();
        for row in rows {
            let (stream_type, data_kind, values, timestamps, count) =
                row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

            let (stream_type, data_kind) = match (
                stream_type.parse::<StreamType>(),
                data_kind.parse::<DataKind>(),
            ) {
                (Ok(t), Ok(k)) => (t, k),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!("Skipping stream row of activity {}: {}", id, e);
                    continue;
                }
            };

            streams.push(CompressedStream {
                stream_type,
                data_kind,
                compressed_values: values,
                compressed_timestamps: timestamps,
                sample_count: count.max(0) as usize,
            });
        }

        Ok(streams)
    }

    /// Load an activity with every stream that decodes.
    pub fn load_activity(&self, id: &Uuid) -> Result<Option<StoredActivity>, DatabaseError> {
        let Some(summary) = self.get_summary(id)? else {
            return Ok(None);
        };
        let streams = decode_all(&self.get_streams(id)?);

        Ok(Some(StoredActivity { summary, streams }))
    }

    /// List activity summaries, newest first.
    pub fn list_activities(&self, limit: Option<u32>) -> Result<Vec<ActivitySummary>, DatabaseError> {
        let limit = limit.unwrap_or(100);

        let mut stmt = self
            .conn
            .prepare("SELECT summary_json FROM activities ORDER BY started_at DESC LIMIT ?1")
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![limit], |row| row.get::<_, String>(0))
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut summaries = Vec::new();
        for row in rows {
            let json = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            summaries.push(parse_summary(&json)?);
        }

        Ok(summaries)
    }

    /// Delete an activity by ID (cascades to streams).
    pub fn delete_activity(&self, id: &Uuid) -> Result<(), DatabaseError> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM activities WHERE id = ?1", params![id.to_string()])
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if rows_affected == 0 {
            return Err(DatabaseError::NotFound(format!("Activity {}", id)));
        }

        Ok(())
    }

    /// Count stored activities.
    pub fn count_activities(&self) -> Result<usize, DatabaseError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM activities", [], |row| row.get(0))
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(count as usize)
    }

    /// Daily stress series for training load, one entry per day from the
    /// first activity with a stress score to the last.
    pub fn daily_stress(&self) -> Result<Vec<TrainingLoadPoint>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT started_at, tss FROM activities WHERE tss IS NOT NULL")
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut points = Vec::new();
        for row in rows {
            let (started_at, tss) = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            let started_at = DateTime::parse_from_rfc3339(&started_at)
                .map_err(|e| DatabaseError::DeserializationError(e.to_string()))?;
            points.push(TrainingLoadPoint::new(
                started_at.with_timezone(&Utc).date_naive(),
                tss,
            ));
        }

        Ok(fill_gaps(&points))
    }
}

fn parse_summary(json: &str) -> Result<ActivitySummary, DatabaseError> {
    serde_json::from_str(json).map_err(|e| DatabaseError::DeserializationError(e.to_string()))
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
