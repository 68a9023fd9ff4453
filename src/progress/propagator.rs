//! Delta propagation up the group tree.
//!
//! One call walks the group and its ancestors, nearest first. At every
//! group the travel status advances, leaf contributions are recorded
//! against the group's pre-delta state, the all-time total grows by the
//! full delta and event statuses advance. The caller owns the transaction.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TrackingError;
use crate::goals::{
    ContextRef, ContributionUpdate, GoalContext, GoalOutcome, GoalStatus, GoalTrackStore,
    LeafContributionTracker,
};
use crate::hierarchy::GroupHierarchy;
use crate::history::{HistoryAction, HistoryEntry, HistoryRecorder};

/// Everything one propagation changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropagationReport {
    /// The group followed by its ancestors, in walk order
    pub groups_touched: Vec<Uuid>,
    pub outcomes: Vec<GoalOutcome>,
    pub contributions: Vec<ContributionUpdate>,
    /// Leaves whose first-reached timestamp was set by this delta
    pub leaves_reached: Vec<Uuid>,
}

impl PropagationReport {
    /// Statuses that reached their goal during this propagation.
    pub fn goals_reached(&self) -> impl Iterator<Item = &GoalOutcome> {
        self.outcomes.iter().filter(|o| o.first_reached)
    }
}

/// Applies measured distance to a group chain.
pub struct ProgressPropagator<'a> {
    conn: &'a Connection,
    history: &'a dyn HistoryRecorder,
}

impl<'a> ProgressPropagator<'a> {
    pub fn new(conn: &'a Connection, history: &'a dyn HistoryRecorder) -> Self {
        Self { conn, history }
    }

    /// Apply a delta to a group and every ancestor.
    ///
    /// Zero, negative and NaN deltas change nothing.
    pub fn apply_delta(
        &self,
        group_id: Uuid,
        delta_km: f64,
        now: DateTime<Utc>,
    ) -> Result<PropagationReport, TrackingError> {
        let mut report = PropagationReport::default();
        if delta_km.is_nan() || delta_km <= 0.0 {
            return Ok(report);
        }

        let tree = GroupHierarchy::new(self.conn);
        let chain = tree.chain(group_id)?;
        let is_leaf = tree.is_leaf(group_id)?;

        let store = GoalTrackStore::new(self.conn);
        let tracker = LeafContributionTracker::new(self.conn);
        // Contexts whose nearest owner above the leaf was already found
        let mut claimed: HashSet<ContextRef> = HashSet::new();

        for (depth, current) in chain.iter().copied().enumerate() {
            for status in store.statuses_for_group(current)? {
                let Some(context) = self.load_context(&store, &status)? else {
                    continue;
                };

                let tracks_leaf = is_leaf && depth > 0 && claimed.insert(status.context);
                if tracks_leaf {
                    if let Some(update) =
                        tracker.record(group_id, &status, &context, delta_km, now)?
                    {
                        report.contributions.push(update);
                    }
                }

                let Some(outcome) = store.apply(&status, &context, delta_km, now)? else {
                    continue;
                };

                if outcome.first_reached {
                    self.record_goal_reached(&status, &context, &outcome, now)?;
                    if tracks_leaf && self.leads(&store, current, status.context, group_id)? {
                        if tracker.mark_reached(group_id, status.context, now)? {
                            report.leaves_reached.push(group_id);
                        }
                    }
                }

                report.outcomes.push(outcome);
            }

            self.conn.execute(
                "UPDATE groups SET distance_total = distance_total + ?1 WHERE id = ?2",
                params![delta_km, current.to_string()],
            )?;
            report.groups_touched.push(current);
        }

        tracing::debug!(
            "Propagated {:.3} km from group {} through {} groups",
            delta_km,
            group_id,
            report.groups_touched.len()
        );

        Ok(report)
    }

    /// Add coins to a group and every ancestor.
    pub fn apply_coins(&self, group_id: Uuid, coins: i64) -> Result<Vec<Uuid>, TrackingError> {
        if coins <= 0 {
            return Ok(Vec::new());
        }

        let chain = GroupHierarchy::new(self.conn).chain(group_id)?;
        for current in &chain {
            self.conn.execute(
                "UPDATE groups SET coins_total = coins_total + ?1 WHERE id = ?2",
                params![coins, current.to_string()],
            )?;
        }
        Ok(chain)
    }

    fn load_context(
        &self,
        store: &GoalTrackStore<'_>,
        status: &GoalStatus,
    ) -> Result<Option<GoalContext>, TrackingError> {
        let context = store.context(status.context)?;
        if context.is_none() {
            tracing::warn!(
                "{}",
                TrackingError::InconsistentState(format!(
                    "group {} has a status for missing {}",
                    status.group_id, status.context
                ))
            );
        }
        Ok(context)
    }

    fn leads(
        &self,
        store: &GoalTrackStore<'_>,
        owner: Uuid,
        context: ContextRef,
        leaf: Uuid,
    ) -> Result<bool, TrackingError> {
        Ok(store
            .status(owner, context)?
            .and_then(|s| s.best_leaf_id)
            .map(|best| best == leaf)
            .unwrap_or(false))
    }

    fn record_goal_reached(
        &self,
        status: &GoalStatus,
        context: &GoalContext,
        outcome: &GoalOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), TrackingError> {
        self.history.record(
            self.conn,
            &HistoryEntry {
                context: status.context,
                group_id: status.group_id,
                action: HistoryAction::GoalReached,
                start_time: context.window.start_time.unwrap_or(status.joined_at),
                end_time: now,
                distance_km: outcome.new_distance,
            },
        )
    }
}
