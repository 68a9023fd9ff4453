//! Leaf group contributions toward a parent's shared goal.
//!
//! A leaf's contribution grows only while the parent's goal is open and
//! unreached, and is capped at the parent's target. The parent's status
//! remembers which leaf is ahead.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::track::GoalTrackStore;
use super::types::{ContextKind, ContextRef, GoalContext, GoalStatus};
use crate::error::TrackingError;
use crate::storage::database::{opt_time_at, time_at, to_db_time, uuid_at};

/// A leaf's share of its parent's progress in one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafContribution {
    pub leaf_group_id: Uuid,
    pub context: ContextRef,
    pub current_distance: f64,
    /// Set once, when the parent reached its goal with this leaf ahead
    pub goal_reached_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// What a recorded contribution changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionUpdate {
    pub leaf_group_id: Uuid,
    pub parent_group_id: Uuid,
    pub context: ContextRef,
    pub previous_distance: f64,
    pub new_distance: f64,
    /// Best leaf of the parent after this update
    pub best_leaf_id: Uuid,
    pub best_leaf_changed: bool,
}

/// Tracks leaf contributions per context.
pub struct LeafContributionTracker<'a> {
    conn: &'a Connection,
}

impl<'a> LeafContributionTracker<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Record a delta for a leaf against its parent's status.
    ///
    /// `parent_status` must be the parent's state before the same delta is
    /// applied to the parent.
    pub fn record(
        &self,
        leaf_group_id: Uuid,
        parent_status: &GoalStatus,
        context: &GoalContext,
        delta_km: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<ContributionUpdate>, TrackingError> {
        if delta_km.is_nan() || delta_km <= 0.0 || !context.window.is_open(now) {
            return Ok(None);
        }
        if context.is_reached(parent_status.current_distance) {
            tracing::debug!(
                "Parent {} already reached {}, leaf {} not tracked",
                parent_status.group_id,
                context.name,
                leaf_group_id
            );
            return Ok(None);
        }

        let reference = parent_status.context;
        let previous = self
            .contribution(leaf_group_id, reference)?
            .map(|c| c.current_distance)
            .unwrap_or(0.0);
        let mut new_distance = previous + delta_km;
        if let Some(target) = context.target() {
            new_distance = new_distance.min(target);
        }

        self.conn.execute(
            "INSERT INTO leaf_contributions
             (leaf_group_id, context_kind, context_id, current_distance, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(leaf_group_id, context_kind, context_id)
             DO UPDATE SET current_distance = excluded.current_distance,
                           updated_at = excluded.updated_at",
            params![
                leaf_group_id.to_string(),
                reference.kind.as_str(),
                reference.id.to_string(),
                new_distance,
                to_db_time(&now),
            ],
        )?;

        let best_leaf_id = self.next_best(parent_status, leaf_group_id, new_distance)?;
        let best_leaf_changed = parent_status.best_leaf_id != Some(best_leaf_id);
        if best_leaf_changed {
            GoalTrackStore::new(self.conn).set_best_leaf(
                parent_status.group_id,
                reference,
                Some(best_leaf_id),
            )?;
            tracing::debug!(
                "Leaf {} now leads {} under group {}",
                best_leaf_id,
                context.name,
                parent_status.group_id
            );
        }

        Ok(Some(ContributionUpdate {
            leaf_group_id,
            parent_group_id: parent_status.group_id,
            context: reference,
            previous_distance: previous,
            new_distance,
            best_leaf_id,
            best_leaf_changed,
        }))
    }

    /// The current best leaf wins ties; another leaf must be strictly ahead.
    fn next_best(
        &self,
        parent_status: &GoalStatus,
        updated_leaf: Uuid,
        updated_distance: f64,
    ) -> Result<Uuid, TrackingError> {
        let Some(current_best) = parent_status.best_leaf_id else {
            return Ok(updated_leaf);
        };
        if current_best == updated_leaf {
            return Ok(updated_leaf);
        }

        let best_distance = self
            .contribution(current_best, parent_status.context)?
            .map(|c| c.current_distance);

        match best_distance {
            Some(best) if updated_distance <= best => Ok(current_best),
            _ => Ok(updated_leaf),
        }
    }

    /// Set the leaf's first-reached timestamp. Returns whether this call set it.
    pub fn mark_reached(
        &self,
        leaf_group_id: Uuid,
        reference: ContextRef,
        now: DateTime<Utc>,
    ) -> Result<bool, TrackingError> {
        let changed = self.conn.execute(
            "UPDATE leaf_contributions SET goal_reached_at = ?1
             WHERE leaf_group_id = ?2 AND context_kind = ?3 AND context_id = ?4
               AND goal_reached_at IS NULL",
            params![
                to_db_time(&now),
                leaf_group_id.to_string(),
                reference.kind.as_str(),
                reference.id.to_string(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// A single leaf's contribution.
    pub fn contribution(
        &self,
        leaf_group_id: Uuid,
        reference: ContextRef,
    ) -> Result<Option<LeafContribution>, TrackingError> {
        self.conn
            .query_row(
                "SELECT leaf_group_id, context_kind, context_id, current_distance, goal_reached_at, updated_at
                 FROM leaf_contributions
                 WHERE leaf_group_id = ?1 AND context_kind = ?2 AND context_id = ?3",
                params![
                    leaf_group_id.to_string(),
                    reference.kind.as_str(),
                    reference.id.to_string()
                ],
                parse_contribution_row,
            )
            .optional()
            .map_err(TrackingError::from)
    }

    /// All contributions in a context, highest first.
    pub fn contributions_for(
        &self,
        reference: ContextRef,
    ) -> Result<Vec<LeafContribution>, TrackingError> {
        let mut stmt = self.conn.prepare(
            "SELECT leaf_group_id, context_kind, context_id, current_distance, goal_reached_at, updated_at
             FROM leaf_contributions
             WHERE context_kind = ?1 AND context_id = ?2
             ORDER BY current_distance DESC, updated_at",
        )?;
        let rows = stmt.query_map(
            params![reference.kind.as_str(), reference.id.to_string()],
            parse_contribution_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(TrackingError::from)
    }

    /// Highest positive contribution among the given leaves.
    ///
    /// Ties go to the leaf listed first.
    pub fn best_under(
        &self,
        leaves: &[Uuid],
        reference: ContextRef,
    ) -> Result<Option<LeafContribution>, TrackingError> {
        let mut best: Option<LeafContribution> = None;
        for leaf in leaves {
            if let Some(found) = self.contribution(*leaf, reference)? {
                let ahead = match &best {
                    Some(current) => found.current_distance > current.current_distance,
                    None => found.current_distance > 0.0,
                };
                if ahead {
                    best = Some(found);
                }
            }
        }
        Ok(best)
    }

    /// Drop every contribution for a context.
    pub fn clear_context(&self, reference: ContextRef) -> Result<usize, TrackingError> {
        let removed = self.conn.execute(
            "DELETE FROM leaf_contributions WHERE context_kind = ?1 AND context_id = ?2",
            params![reference.kind.as_str(), reference.id.to_string()],
        )?;
        Ok(removed)
    }
}

fn parse_contribution_row(row: &rusqlite::Row) -> rusqlite::Result<LeafContribution> {
    let kind: String = row.get(1)?;
    let kind = ContextKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown context kind '{}'", kind).into(),
        )
    })?;

    Ok(LeafContribution {
        leaf_group_id: uuid_at(row, 0)?,
        context: ContextRef {
            kind,
            id: uuid_at(row, 2)?,
        },
        current_distance: row.get(3)?,
        goal_reached_at: opt_time_at(row, 4)?,
        updated_at: time_at(row, 5)?,
    })
}
