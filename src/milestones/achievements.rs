//! Persistent milestone achievements and reward redemption.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::types::Achievement;
use crate::error::TrackingError;
use crate::storage::database::{opt_time_at, time_at, to_db_time, uuid_at};

const ACHIEVEMENT_COLUMNS: &str = "id, group_id, milestone_id, track_id, reached_at, \
     reached_distance, reward_text, is_redeemed, redeemed_at";

/// Achievement storage. Nothing here is touched by track restarts.
pub struct AchievementStore<'a> {
    conn: &'a Connection,
}

impl<'a> AchievementStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create the achievement for (group, milestone) unless it exists.
    ///
    /// Returns the stored record and whether this call created it.
    pub fn get_or_create(
        &self,
        group_id: Uuid,
        milestone_id: Uuid,
        track_id: Uuid,
        reached_at: DateTime<Utc>,
        reached_distance: Option<f64>,
        reward_text: Option<&str>,
    ) -> Result<(Achievement, bool), TrackingError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO milestone_achievements
             (id, group_id, milestone_id, track_id, reached_at, reached_distance, reward_text, is_redeemed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
            params![
                Uuid::new_v4().to_string(),
                group_id.to_string(),
                milestone_id.to_string(),
                track_id.to_string(),
                to_db_time(&reached_at),
                reached_distance,
                reward_text,
            ],
        )?;

        let sql = format!(
            "SELECT {} FROM milestone_achievements WHERE group_id = ?1 AND milestone_id = ?2",
            ACHIEVEMENT_COLUMNS
        );
        let achievement = self.conn.query_row(
            &sql,
            params![group_id.to_string(), milestone_id.to_string()],
            parse_achievement_row,
        )?;

        Ok((achievement, inserted > 0))
    }

    /// Get an achievement by ID.
    pub fn get(&self, id: Uuid) -> Result<Option<Achievement>, TrackingError> {
        let sql = format!(
            "SELECT {} FROM milestone_achievements WHERE id = ?1",
            ACHIEVEMENT_COLUMNS
        );
        self.conn
            .query_row(&sql, params![id.to_string()], parse_achievement_row)
            .optional()
            .map_err(TrackingError::from)
    }

    /// A group's achievements, newest first.
    pub fn for_group(&self, group_id: Uuid) -> Result<Vec<Achievement>, TrackingError> {
        let sql = format!(
            "SELECT {} FROM milestone_achievements WHERE group_id = ?1 ORDER BY reached_at DESC",
            ACHIEVEMENT_COLUMNS
        );
        self.query(&sql, group_id)
    }

    /// A track's achievements, oldest first.
    pub fn for_track(&self, track_id: Uuid) -> Result<Vec<Achievement>, TrackingError> {
        let sql = format!(
            "SELECT {} FROM milestone_achievements WHERE track_id = ?1 ORDER BY reached_at",
            ACHIEVEMENT_COLUMNS
        );
        self.query(&sql, track_id)
    }

    /// Mark a reward as handed out. Works once per achievement.
    pub fn redeem(&self, id: Uuid, now: DateTime<Utc>) -> Result<Achievement, TrackingError> {
        let changed = self.conn.execute(
            "UPDATE milestone_achievements SET is_redeemed = 1, redeemed_at = ?1
             WHERE id = ?2 AND is_redeemed = 0",
            params![to_db_time(&now), id.to_string()],
        )?;

        let achievement = self.get(id)?.ok_or(TrackingError::UnknownEntity {
            kind: "achievement",
            id,
        })?;
        if changed == 0 {
            return Err(TrackingError::AlreadyRedeemed(id));
        }

        tracing::info!("Redeemed achievement {} for group {}", id, achievement.group_id);
        Ok(achievement)
    }

    fn query(&self, sql: &str, id: Uuid) -> Result<Vec<Achievement>, TrackingError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![id.to_string()], parse_achievement_row)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(TrackingError::from)
    }
}

fn parse_achievement_row(row: &rusqlite::Row) -> rusqlite::Result<Achievement> {
    Ok(Achievement {
        id: uuid_at(row, 0)?,
        group_id: uuid_at(row, 1)?,
        milestone_id: uuid_at(row, 2)?,
        track_id: uuid_at(row, 3)?,
        reached_at: time_at(row, 4)?,
        reached_distance: row.get(5)?,
        reward_text: row.get(6)?,
        is_redeemed: row.get(7)?,
        redeemed_at: opt_time_at(row, 8)?,
    })
}
