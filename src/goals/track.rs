//! Capped per-group progress counters for travel tracks and events.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::types::{advance, ContextKind, ContextRef, GoalContext, GoalOutcome, GoalStatus, GoalWindow};
use crate::error::TrackingError;
use crate::storage::database::{opt_time_at, opt_uuid_at, time_at, to_db_time, uuid_at};

const STATUS_COLUMNS: &str =
    "group_id, context_kind, context_id, current_distance, goal_reached_at, best_leaf_id, joined_at";

/// Reads contexts and applies deltas to goal statuses.
pub struct GoalTrackStore<'a> {
    conn: &'a Connection,
}

impl<'a> GoalTrackStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Load a track or event.
    pub fn context(&self, reference: ContextRef) -> Result<Option<GoalContext>, TrackingError> {
        let sql = match reference.kind {
            ContextKind::Travel => {
                "SELECT name, total_length_km, is_active, auto_start, start_time, end_time, created_at
                 FROM travel_tracks WHERE id = ?1"
            }
            ContextKind::Event => {
                "SELECT name, target_km, is_active, 0, start_time, end_time, created_at
                 FROM events WHERE id = ?1"
            }
        };

        self.conn
            .query_row(sql, params![reference.id.to_string()], |row| {
                Ok(GoalContext {
                    reference,
                    name: row.get(0)?,
                    target_km: row.get(1)?,
                    window: GoalWindow {
                        is_active: row.get(2)?,
                        auto_start: row.get(3)?,
                        start_time: opt_time_at(row, 4)?,
                        end_time: opt_time_at(row, 5)?,
                    },
                    created_at: time_at(row, 6)?,
                })
            })
            .optional()
            .map_err(TrackingError::from)
    }

    /// All statuses of a group, its travel status first.
    pub fn statuses_for_group(&self, group_id: Uuid) -> Result<Vec<GoalStatus>, TrackingError> {
        let sql = format!(
            "SELECT {} FROM goal_status WHERE group_id = ?1
             ORDER BY CASE context_kind WHEN 'travel' THEN 0 ELSE 1 END, id",
            STATUS_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![group_id.to_string()], parse_status_row)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(TrackingError::from)
    }

    /// The group's travel status, if it is assigned to a track.
    pub fn travel_status(&self, group_id: Uuid) -> Result<Option<GoalStatus>, TrackingError> {
        let sql = format!(
            "SELECT {} FROM goal_status WHERE group_id = ?1 AND context_kind = 'travel'",
            STATUS_COLUMNS
        );
        self.conn
            .query_row(&sql, params![group_id.to_string()], parse_status_row)
            .optional()
            .map_err(TrackingError::from)
    }

    /// The group's status in one context.
    pub fn status(
        &self,
        group_id: Uuid,
        reference: ContextRef,
    ) -> Result<Option<GoalStatus>, TrackingError> {
        let sql = format!(
            "SELECT {} FROM goal_status
             WHERE group_id = ?1 AND context_kind = ?2 AND context_id = ?3",
            STATUS_COLUMNS
        );
        self.conn
            .query_row(
                &sql,
                params![
                    group_id.to_string(),
                    reference.kind.as_str(),
                    reference.id.to_string()
                ],
                parse_status_row,
            )
            .optional()
            .map_err(TrackingError::from)
    }

    /// Every status attached to a context.
    pub fn statuses_for_context(
        &self,
        reference: ContextRef,
    ) -> Result<Vec<GoalStatus>, TrackingError> {
        let sql = format!(
            "SELECT {} FROM goal_status WHERE context_kind = ?1 AND context_id = ?2 ORDER BY id",
            STATUS_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![reference.kind.as_str(), reference.id.to_string()],
            parse_status_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(TrackingError::from)
    }

    /// Apply a delta to a status.
    ///
    /// Returns `None` when the context's window is closed. Otherwise the
    /// outcome reports how much of the delta was kept after capping.
    pub fn apply(
        &self,
        status: &GoalStatus,
        context: &GoalContext,
        delta_km: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<GoalOutcome>, TrackingError> {
        if !context.window.is_open(now) {
            tracing::debug!(
                "Context {} is closed, skipping group {}",
                context.name,
                status.group_id
            );
            return Ok(None);
        }

        let auto_started = if context.reference.kind == ContextKind::Travel
            && context.window.auto_start
            && context.window.start_time.is_none()
            && delta_km > 0.0
        {
            self.auto_start(context, now)?
        } else {
            false
        };

        let mut outcome = GoalOutcome {
            group_id: status.group_id,
            context: status.context,
            previous_distance: status.current_distance,
            new_distance: status.current_distance,
            applied: 0.0,
            first_reached: false,
            auto_started,
        };

        let Some(step) = advance(status.current_distance, delta_km, context.target()) else {
            return Ok(Some(outcome));
        };

        let reached_at = if step.first_reached && status.goal_reached_at.is_none() {
            Some(to_db_time(&now))
        } else {
            None
        };

        self.conn.execute(
            "UPDATE goal_status
             SET current_distance = ?1,
                 goal_reached_at = COALESCE(goal_reached_at, ?2)
             WHERE group_id = ?3 AND context_kind = ?4 AND context_id = ?5",
            params![
                step.new_distance,
                reached_at,
                status.group_id.to_string(),
                status.context.kind.as_str(),
                status.context.id.to_string(),
            ],
        )?;

        outcome.new_distance = step.new_distance;
        outcome.applied = step.applied;
        outcome.first_reached = reached_at.is_some();

        if outcome.first_reached {
            tracing::info!(
                "Group {} reached the goal of {} ({:.3} km)",
                status.group_id,
                context.name,
                step.new_distance
            );
        }

        Ok(Some(outcome))
    }

    /// Record the leaf currently ahead for a status.
    pub fn set_best_leaf(
        &self,
        group_id: Uuid,
        reference: ContextRef,
        leaf_id: Option<Uuid>,
    ) -> Result<(), TrackingError> {
        self.conn.execute(
            "UPDATE goal_status SET best_leaf_id = ?1
             WHERE group_id = ?2 AND context_kind = ?3 AND context_id = ?4",
            params![
                leaf_id.map(|l| l.to_string()),
                group_id.to_string(),
                reference.kind.as_str(),
                reference.id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Set a track's start time on its first kilometre. Returns whether this call set it.
    fn auto_start(&self, context: &GoalContext, now: DateTime<Utc>) -> Result<bool, TrackingError> {
        let changed = self.conn.execute(
            "UPDATE travel_tracks SET start_time = ?1 WHERE id = ?2 AND start_time IS NULL",
            params![to_db_time(&now), context.reference.id.to_string()],
        )?;
        if changed > 0 {
            tracing::info!("Auto-started track {} at {}", context.name, now);
        }
        Ok(changed > 0)
    }
}

/// Parse a database row into a GoalStatus.
pub(crate) fn parse_status_row(row: &rusqlite::Row) -> rusqlite::Result<GoalStatus> {
    let kind: String = row.get(1)?;
    let kind = ContextKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown context kind '{}'", kind).into(),
        )
    })?;

    Ok(GoalStatus {
        group_id: uuid_at(row, 0)?,
        context: ContextRef {
            kind,
            id: uuid_at(row, 2)?,
        },
        current_distance: row.get(3)?,
        goal_reached_at: opt_time_at(row, 4)?,
        best_leaf_id: opt_uuid_at(row, 5)?,
        joined_at: time_at(row, 6)?,
    })
}
