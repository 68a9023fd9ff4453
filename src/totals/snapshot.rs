//! Per-top-group period reset markers.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TrackingError;
use crate::hierarchy::GroupHierarchy;
use crate::storage::database::{opt_time_at, time_at, to_db_time, uuid_at};

/// A reset marker. Everything at or before `snapshot_date` belongs to
/// earlier periods for every group under `top_group_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub top_group_id: Uuid,
    pub snapshot_date: DateTime<Utc>,
    pub is_undone: bool,
    pub created_at: DateTime<Utc>,
    pub undone_at: Option<DateTime<Utc>>,
}

/// Snapshot storage.
pub struct SnapshotIndex<'a> {
    conn: &'a Connection,
}

impl<'a> SnapshotIndex<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a snapshot for a top group.
    pub fn create(
        &self,
        top_group_id: Uuid,
        snapshot_date: DateTime<Utc>,
    ) -> Result<Snapshot, TrackingError> {
        let group = GroupHierarchy::new(self.conn).require_group(top_group_id)?;
        if !group.is_top() {
            return Err(TrackingError::Validation(format!(
                "snapshots belong to top groups, {} has a parent",
                top_group_id
            )));
        }

        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            top_group_id,
            snapshot_date,
            is_undone: false,
            created_at: Utc::now(),
            undone_at: None,
        };

        self.conn.execute(
            "INSERT INTO snapshots (id, top_group_id, snapshot_date, is_undone, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![
                snapshot.id.to_string(),
                top_group_id.to_string(),
                to_db_time(&snapshot_date),
                to_db_time(&snapshot.created_at),
            ],
        )?;

        tracing::info!(
            "Created snapshot {} for group {} at {}",
            snapshot.id,
            top_group_id,
            snapshot_date
        );
        Ok(snapshot)
    }

    /// Undo a snapshot. Undoing twice is rejected.
    pub fn undo(&self, snapshot_id: Uuid, now: DateTime<Utc>) -> Result<Snapshot, TrackingError> {
        let mut snapshot = self.get(snapshot_id)?.ok_or(TrackingError::UnknownEntity {
            kind: "snapshot",
            id: snapshot_id,
        })?;

        if snapshot.is_undone {
            return Err(TrackingError::Validation(format!(
                "snapshot {} is already undone",
                snapshot_id
            )));
        }

        self.conn.execute(
            "UPDATE snapshots SET is_undone = 1, undone_at = ?1 WHERE id = ?2",
            params![to_db_time(&now), snapshot_id.to_string()],
        )?;

        snapshot.is_undone = true;
        snapshot.undone_at = Some(now);
        tracing::info!("Undid snapshot {} for group {}", snapshot_id, snapshot.top_group_id);
        Ok(snapshot)
    }

    /// Get a snapshot by ID.
    pub fn get(&self, snapshot_id: Uuid) -> Result<Option<Snapshot>, TrackingError> {
        self.conn
            .query_row(
                "SELECT id, top_group_id, snapshot_date, is_undone, created_at, undone_at
                 FROM snapshots WHERE id = ?1",
                params![snapshot_id.to_string()],
                parse_snapshot_row,
            )
            .optional()
            .map_err(TrackingError::from)
    }

    /// Latest non-undone snapshot dated at or before `as_of`.
    pub fn latest_active(
        &self,
        top_group_id: Uuid,
        as_of: DateTime<Utc>,
    ) -> Result<Option<Snapshot>, TrackingError> {
        self.conn
            .query_row(
                "SELECT id, top_group_id, snapshot_date, is_undone, created_at, undone_at
                 FROM snapshots
                 WHERE top_group_id = ?1 AND is_undone = 0 AND snapshot_date <= ?2
                 ORDER BY snapshot_date DESC, created_at DESC
                 LIMIT 1",
                params![top_group_id.to_string(), to_db_time(&as_of)],
                parse_snapshot_row,
            )
            .optional()
            .map_err(TrackingError::from)
    }

    /// All snapshots of a top group, oldest first, undone ones included.
    pub fn list(&self, top_group_id: Uuid) -> Result<Vec<Snapshot>, TrackingError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, top_group_id, snapshot_date, is_undone, created_at, undone_at
             FROM snapshots WHERE top_group_id = ?1 ORDER BY snapshot_date, created_at",
        )?;
        let rows = stmt.query_map(params![top_group_id.to_string()], parse_snapshot_row)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(TrackingError::from)
    }
}

fn parse_snapshot_row(row: &rusqlite::Row) -> rusqlite::Result<Snapshot> {
    Ok(Snapshot {
        id: uuid_at(row, 0)?,
        top_group_id: uuid_at(row, 1)?,
        snapshot_date: time_at(row, 2)?,
        is_undone: row.get(3)?,
        created_at: time_at(row, 4)?,
        undone_at: opt_time_at(row, 5)?,
    })
}
