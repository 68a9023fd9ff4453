//! Milestone persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::types::Milestone;
use crate::error::TrackingError;
use crate::storage::database::{opt_time_at, opt_uuid_at, to_db_time, uuid_at};

const MILESTONE_COLUMNS: &str =
    "id, track_id, name, distance_km, reward_text, winner_group_id, reached_at";

/// Reads milestones and records winners.
pub struct MilestoneStore<'a> {
    conn: &'a Connection,
}

impl<'a> MilestoneStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Get a milestone by ID.
    pub fn get(&self, id: Uuid) -> Result<Option<Milestone>, TrackingError> {
        let sql = format!("SELECT {} FROM milestones WHERE id = ?1", MILESTONE_COLUMNS);
        self.conn
            .query_row(&sql, params![id.to_string()], parse_milestone_row)
            .optional()
            .map_err(TrackingError::from)
    }

    /// All milestones of a track in ascending distance.
    pub fn for_track(&self, track_id: Uuid) -> Result<Vec<Milestone>, TrackingError> {
        let sql = format!(
            "SELECT {} FROM milestones WHERE track_id = ?1 ORDER BY distance_km, id",
            MILESTONE_COLUMNS
        );
        self.query(&sql, params![track_id.to_string()])
    }

    /// Milestones without a winner at or below `distance_km`, ascending.
    pub fn unreached_up_to(
        &self,
        track_id: Uuid,
        distance_km: f64,
    ) -> Result<Vec<Milestone>, TrackingError> {
        let sql = format!(
            "SELECT {} FROM milestones
             WHERE track_id = ?1 AND winner_group_id IS NULL AND distance_km <= ?2
             ORDER BY distance_km, id",
            MILESTONE_COLUMNS
        );
        self.query(&sql, params![track_id.to_string(), distance_km])
    }

    /// Set the winner if none is set yet. Returns whether this call set it.
    pub fn set_winner(
        &self,
        milestone_id: Uuid,
        winner_group_id: Uuid,
        reached_at: DateTime<Utc>,
    ) -> Result<bool, TrackingError> {
        let changed = self.conn.execute(
            "UPDATE milestones SET winner_group_id = ?1, reached_at = ?2
             WHERE id = ?3 AND winner_group_id IS NULL",
            params![
                winner_group_id.to_string(),
                to_db_time(&reached_at),
                milestone_id.to_string()
            ],
        )?;
        Ok(changed > 0)
    }

    fn query(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<Milestone>, TrackingError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, parse_milestone_row)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(TrackingError::from)
    }
}

fn parse_milestone_row(row: &rusqlite::Row) -> rusqlite::Result<Milestone> {
    Ok(Milestone {
        id: uuid_at(row, 0)?,
        track_id: uuid_at(row, 1)?,
        name: row.get(2)?,
        distance_km: row.get(3)?,
        reward_text: row.get(4)?,
        winner_group_id: opt_uuid_at(row, 5)?,
        reached_at: opt_time_at(row, 6)?,
    })
}
