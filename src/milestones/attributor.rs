//! Milestone attribution.
//!
//! A group's progress on a track can cross milestone thresholds. Each
//! milestone is won once per run, by the leaf group that contributed the
//! most toward the status that crossed it. Awards happen inside the
//! caller's transaction while the milestone's record lock is held, so two
//! concurrent passes can never both write a winner.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use super::achievements::AchievementStore;
use super::locks::RecordLocks;
use super::store::MilestoneStore;
use super::types::MilestoneAward;
use crate::error::TrackingError;
use crate::goals::{GoalStatus, GoalTrackStore, LeafContributionTracker};
use crate::hierarchy::GroupHierarchy;

/// Awards milestones crossed by a group's travel progress.
pub struct MilestoneAttributor {
    locks: Arc<RecordLocks>,
}

impl MilestoneAttributor {
    pub fn new(locks: Arc<RecordLocks>) -> Self {
        Self { locks }
    }

    pub fn locks(&self) -> &Arc<RecordLocks> {
        &self.locks
    }

    /// Award every unreached milestone the group's track progress has passed.
    ///
    /// The progress checked is the nearest travel status in the group's
    /// chain. `active_leaf_hint` names the leaf the measurement came through;
    /// it only decides the winner when no leaf has a recorded contribution.
    pub fn check(
        &self,
        conn: &Connection,
        group_id: Uuid,
        active_leaf_hint: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<MilestoneAward>, TrackingError> {
        let tree = GroupHierarchy::new(conn);
        let store = GoalTrackStore::new(conn);

        let Some(owner) = self.owning_status(&tree, &store, group_id)? else {
            return Ok(Vec::new());
        };
        if owner.current_distance <= 0.0 {
            return Ok(Vec::new());
        }

        if store.context(owner.context)?.is_none() {
            tracing::warn!(
                "{}",
                TrackingError::InconsistentState(format!(
                    "group {} is assigned to missing track {}",
                    owner.group_id, owner.context.id
                ))
            );
            return Ok(Vec::new());
        }

        let milestones = MilestoneStore::new(conn)
            .unreached_up_to(owner.context.id, owner.current_distance)?;
        if milestones.is_empty() {
            return Ok(Vec::new());
        }

        let Some(winner) = self.pick_winner(conn, &owner, group_id, active_leaf_hint)? else {
            tracing::debug!(
                "No candidate leaf for group {} on track {}",
                group_id,
                owner.context.id
            );
            return Ok(Vec::new());
        };

        let visible = tree.group(winner)?.map(|g| g.is_visible).unwrap_or(false);
        if !visible {
            tracing::warn!(
                "Milestone candidate {} is hidden or missing, skipping {} milestones",
                winner,
                milestones.len()
            );
            return Ok(Vec::new());
        }

        let milestone_store = MilestoneStore::new(conn);
        let achievements = AchievementStore::new(conn);
        let tracker = LeafContributionTracker::new(conn);
        let mut awards = Vec::new();

        for candidate in milestones {
            let _guard = self.locks.acquire(candidate.id)?;

            // Re-read under the lock; another pass may have won it already
            let Some(milestone) = milestone_store.get(candidate.id)? else {
                continue;
            };
            if milestone.is_reached() {
                tracing::debug!("Milestone {} already has a winner", milestone.name);
                continue;
            }

            let reference = store
                .status(owner.group_id, owner.context)?
                .map(|s| s.current_distance)
                .unwrap_or(0.0);
            if reference < milestone.distance_km {
                continue;
            }

            if !milestone_store.set_winner(milestone.id, winner, now)? {
                continue;
            }

            let reached_distance = tracker
                .contribution(winner, owner.context)?
                .map(|c| c.current_distance)
                .unwrap_or(reference);

            let (achievement, created) = achievements.get_or_create(
                winner,
                milestone.id,
                milestone.track_id,
                now,
                Some(reached_distance),
                milestone.reward_text.as_deref(),
            )?;

            tracing::info!(
                "Milestone {} ({:.1} km) won by group {}",
                milestone.name,
                milestone.distance_km,
                winner
            );

            awards.push(MilestoneAward {
                milestone_id: milestone.id,
                milestone_name: milestone.name,
                track_id: milestone.track_id,
                winner_group_id: winner,
                reached_at: now,
                achievement_id: achievement.id,
                achievement_created: created,
            });
        }

        Ok(awards)
    }

    /// Nearest travel status in the group's chain.
    fn owning_status(
        &self,
        tree: &GroupHierarchy<'_>,
        store: &GoalTrackStore<'_>,
        group_id: Uuid,
    ) -> Result<Option<GoalStatus>, TrackingError> {
        for candidate in tree.chain(group_id)? {
            if let Some(status) = store.travel_status(candidate)? {
                return Ok(Some(status));
            }
        }
        Ok(None)
    }

    fn pick_winner(
        &self,
        conn: &Connection,
        owner: &GoalStatus,
        group_id: Uuid,
        active_leaf_hint: Option<Uuid>,
    ) -> Result<Option<Uuid>, TrackingError> {
        let tree = GroupHierarchy::new(conn);
        let is_leaf = tree.is_leaf(group_id)?;

        if is_leaf {
            if owner.group_id == group_id {
                return Ok(Some(group_id));
            }
            let leaves = tree.leaf_groups_under(owner.group_id)?;
            let leader = self.leading_leaf(conn, owner, &leaves)?;
            return Ok(Some(leader.unwrap_or(group_id)));
        }

        // A parent without its own status defers to its leaves' checks
        if owner.group_id != group_id {
            return Ok(None);
        }

        let leaves = tree.leaf_groups_under(group_id)?;
        if let Some(leader) = self.leading_leaf(conn, owner, &leaves)? {
            return Ok(Some(leader));
        }
        Ok(active_leaf_hint.filter(|hint| leaves.contains(hint)))
    }

    /// The visible leaf with the largest contribution to the owner's status.
    ///
    /// The recorded best leaf keeps the lead on a tie.
    fn leading_leaf(
        &self,
        conn: &Connection,
        owner: &GoalStatus,
        leaves: &[Uuid],
    ) -> Result<Option<Uuid>, TrackingError> {
        let tracker = LeafContributionTracker::new(conn);
        let best = tracker.best_under(leaves, owner.context)?;

        if let Some(recorded) = owner.best_leaf_id.filter(|id| leaves.contains(id)) {
            let recorded_distance = tracker
                .contribution(recorded, owner.context)?
                .map(|c| c.current_distance)
                .unwrap_or(0.0);
            let top = best.as_ref().map(|c| c.current_distance).unwrap_or(0.0);
            if recorded_distance > 0.0 && recorded_distance >= top {
                return Ok(Some(recorded));
            }
        }

        Ok(best.map(|c| c.leaf_group_id))
    }
}
