//! Track and event administration.
//!
//! Creates contexts, opens and closes their windows, assigns groups and
//! resets runs. Every assignment change goes through the history recorder.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::contribution::LeafContributionTracker;
use super::track::GoalTrackStore;
use super::types::{ContextKind, ContextRef, GoalContext, GoalStatus, GoalWindow};
use crate::error::TrackingError;
use crate::hierarchy::GroupHierarchy;
use crate::history::{HistoryAction, HistoryEntry, HistoryRecorder};
use crate::milestones::types::Milestone;
use crate::storage::database::to_db_time;

/// Manager for travel tracks and events.
pub struct GoalManager<'a> {
    conn: &'a Connection,
    history: &'a dyn HistoryRecorder,
}

impl<'a> GoalManager<'a> {
    /// Create a new goal manager with a database connection.
    pub fn new(conn: &'a Connection, history: &'a dyn HistoryRecorder) -> Self {
        Self { conn, history }
    }

    fn store(&self) -> GoalTrackStore<'a> {
        GoalTrackStore::new(self.conn)
    }

    /// Create an active travel track.
    pub fn create_track(
        &self,
        name: &str,
        total_length_km: f64,
        auto_start: bool,
    ) -> Result<GoalContext, TrackingError> {
        if !total_length_km.is_finite() || total_length_km <= 0.0 {
            return Err(TrackingError::Validation(
                "track length must be a positive number of kilometres".to_string(),
            ));
        }

        let context = GoalContext {
            reference: ContextRef::travel(Uuid::new_v4()),
            name: name.to_string(),
            target_km: Some(total_length_km),
            window: GoalWindow {
                is_active: true,
                auto_start,
                start_time: None,
                end_time: None,
            },
            created_at: Utc::now(),
        };

        self.conn.execute(
            "INSERT INTO travel_tracks (id, name, total_length_km, is_active, auto_start, created_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5)",
            params![
                context.reference.id.to_string(),
                context.name,
                total_length_km,
                auto_start,
                to_db_time(&context.created_at),
            ],
        )?;

        tracing::info!("Created track {} ({:.1} km)", context.name, total_length_km);
        Ok(context)
    }

    /// Create an active event. `None` means no target.
    pub fn create_event(
        &self,
        name: &str,
        target_km: Option<f64>,
    ) -> Result<GoalContext, TrackingError> {
        if let Some(target) = target_km {
            if !target.is_finite() || target < 0.0 {
                return Err(TrackingError::Validation(
                    "event target must be a non-negative number of kilometres".to_string(),
                ));
            }
        }

        let context = GoalContext {
            reference: ContextRef::event(Uuid::new_v4()),
            name: name.to_string(),
            target_km,
            window: GoalWindow {
                is_active: true,
                auto_start: false,
                start_time: None,
                end_time: None,
            },
            created_at: Utc::now(),
        };

        self.conn.execute(
            "INSERT INTO events (id, name, target_km, is_active, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![
                context.reference.id.to_string(),
                context.name,
                target_km,
                to_db_time(&context.created_at),
            ],
        )?;

        Ok(context)
    }

    /// Set a context's window and active flag.
    pub fn set_window(
        &self,
        reference: ContextRef,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        is_active: bool,
    ) -> Result<(), TrackingError> {
        if let (Some(start), Some(end)) = (start_time, end_time) {
            if end < start {
                return Err(TrackingError::Validation(
                    "end_time must not precede start_time".to_string(),
                ));
            }
        }

        let table = match reference.kind {
            ContextKind::Travel => "travel_tracks",
            ContextKind::Event => "events",
        };
        let sql = format!(
            "UPDATE {} SET start_time = ?1, end_time = ?2, is_active = ?3 WHERE id = ?4",
            table
        );
        let changed = self.conn.execute(
            &sql,
            params![
                start_time.map(|t| to_db_time(&t)),
                end_time.map(|t| to_db_time(&t)),
                is_active,
                reference.id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(unknown_context(reference));
        }
        Ok(())
    }

    /// Add a milestone to a track.
    pub fn add_milestone(
        &self,
        track_id: Uuid,
        name: &str,
        distance_km: f64,
        reward_text: Option<&str>,
    ) -> Result<Milestone, TrackingError> {
        let reference = ContextRef::travel(track_id);
        let track = self
            .store()
            .context(reference)?
            .ok_or_else(|| unknown_context(reference))?;

        let in_range = distance_km.is_finite()
            && distance_km >= 0.0
            && track.target().map(|t| distance_km <= t).unwrap_or(true);
        if !in_range {
            return Err(TrackingError::Validation(format!(
                "milestone distance {} is outside track {}",
                distance_km, track.name
            )));
        }

        let milestone = Milestone {
            id: Uuid::new_v4(),
            track_id,
            name: name.to_string(),
            distance_km,
            reward_text: reward_text.map(str::to_string),
            winner_group_id: None,
            reached_at: None,
        };

        self.conn.execute(
            "INSERT INTO milestones (id, track_id, name, distance_km, reward_text)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                milestone.id.to_string(),
                track_id.to_string(),
                milestone.name,
                distance_km,
                milestone.reward_text,
            ],
        )?;

        Ok(milestone)
    }

    /// Assign a group to a track, replacing any previous assignment.
    pub fn assign_group_to_track(
        &self,
        group_id: Uuid,
        track_id: Uuid,
    ) -> Result<GoalStatus, TrackingError> {
        GroupHierarchy::new(self.conn).require_group(group_id)?;
        let reference = ContextRef::travel(track_id);
        if self.store().context(reference)?.is_none() {
            return Err(unknown_context(reference));
        }

        if let Some(existing) = self.store().travel_status(group_id)? {
            if existing.context == reference {
                return Ok(existing);
            }
            self.remove_group_from_track(group_id)?;
        }

        let now = Utc::now();
        let status = self.insert_status(group_id, reference, now)?;
        self.history.record(
            self.conn,
            &HistoryEntry {
                context: reference,
                group_id,
                action: HistoryAction::Assigned,
                start_time: now,
                end_time: now,
                distance_km: 0.0,
            },
        )?;

        tracing::info!("Assigned group {} to track {}", group_id, track_id);
        Ok(status)
    }

    /// Remove a group's track assignment. Returns the removed status.
    pub fn remove_group_from_track(
        &self,
        group_id: Uuid,
    ) -> Result<Option<GoalStatus>, TrackingError> {
        let Some(status) = self.store().travel_status(group_id)? else {
            return Ok(None);
        };

        let action = if status.current_distance > 0.0 {
            HistoryAction::Aborted
        } else {
            HistoryAction::Removed
        };

        self.conn.execute(
            "DELETE FROM goal_status WHERE group_id = ?1 AND context_kind = 'travel'",
            params![group_id.to_string()],
        )?;
        self.history.record(
            self.conn,
            &HistoryEntry {
                context: status.context,
                group_id,
                action,
                start_time: status.joined_at,
                end_time: Utc::now(),
                distance_km: status.current_distance,
            },
        )?;

        Ok(Some(status))
    }

    /// Let a group take part in an event.
    pub fn join_event(&self, group_id: Uuid, event_id: Uuid) -> Result<GoalStatus, TrackingError> {
        GroupHierarchy::new(self.conn).require_group(group_id)?;
        let reference = ContextRef::event(event_id);
        if self.store().context(reference)?.is_none() {
            return Err(unknown_context(reference));
        }
        if self.store().status(group_id, reference)?.is_some() {
            return Err(TrackingError::Validation(format!(
                "group {} already takes part in event {}",
                group_id, event_id
            )));
        }

        self.insert_status(group_id, reference, Utc::now())
    }

    /// Start a track over.
    ///
    /// Distances, reached timestamps, best leaves, leaf contributions and
    /// milestone winners are cleared. Achievements are kept. Returns the
    /// number of statuses reset.
    pub fn restart_track(&self, track_id: Uuid, now: DateTime<Utc>) -> Result<usize, TrackingError> {
        let reference = ContextRef::travel(track_id);
        let track = self
            .store()
            .context(reference)?
            .ok_or_else(|| unknown_context(reference))?;

        let statuses = self.store().statuses_for_context(reference)?;
        for status in &statuses {
            self.history.record(
                self.conn,
                &HistoryEntry {
                    context: reference,
                    group_id: status.group_id,
                    action: HistoryAction::Restarted,
                    start_time: track.window.start_time.unwrap_or(status.joined_at),
                    end_time: now,
                    distance_km: status.current_distance,
                },
            )?;
        }

        self.reset_statuses(reference)?;
        LeafContributionTracker::new(self.conn).clear_context(reference)?;
        self.conn.execute(
            "UPDATE milestones SET winner_group_id = NULL, reached_at = NULL WHERE track_id = ?1",
            params![track_id.to_string()],
        )?;

        if track.window.auto_start {
            self.conn.execute(
                "UPDATE travel_tracks SET start_time = NULL WHERE id = ?1",
                params![track_id.to_string()],
            )?;
        }

        tracing::info!("Restarted track {} ({} groups)", track.name, statuses.len());
        Ok(statuses.len())
    }

    /// Record current track progress as completed without resetting it.
    pub fn save_trip_to_history(
        &self,
        track_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<usize, TrackingError> {
        let reference = ContextRef::travel(track_id);
        let track = self
            .store()
            .context(reference)?
            .ok_or_else(|| unknown_context(reference))?;

        let mut saved = 0;
        for status in self.store().statuses_for_context(reference)? {
            if status.current_distance <= 0.0 {
                continue;
            }
            self.history.record(
                self.conn,
                &HistoryEntry {
                    context: reference,
                    group_id: status.group_id,
                    action: HistoryAction::Completed,
                    start_time: track.window.start_time.unwrap_or(status.joined_at),
                    end_time: now,
                    distance_km: status.current_distance,
                },
            )?;
            saved += 1;
        }
        Ok(saved)
    }

    /// Archive an event's results and zero its participants.
    pub fn save_event_to_history(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<usize, TrackingError> {
        let reference = ContextRef::event(event_id);
        let event = self
            .store()
            .context(reference)?
            .ok_or_else(|| unknown_context(reference))?;

        let statuses = self.store().statuses_for_context(reference)?;
        for status in &statuses {
            self.history.record(
                self.conn,
                &HistoryEntry {
                    context: reference,
                    group_id: status.group_id,
                    action: HistoryAction::Completed,
                    start_time: event.window.start_time.unwrap_or(now),
                    end_time: event.window.end_time.unwrap_or(now),
                    distance_km: status.current_distance,
                },
            )?;
        }

        self.reset_statuses(reference)?;
        LeafContributionTracker::new(self.conn).clear_context(reference)?;

        tracing::info!("Archived event {} ({} groups)", event.name, statuses.len());
        Ok(statuses.len())
    }

    fn insert_status(
        &self,
        group_id: Uuid,
        reference: ContextRef,
        now: DateTime<Utc>,
    ) -> Result<GoalStatus, TrackingError> {
        self.conn.execute(
            "INSERT INTO goal_status (group_id, context_kind, context_id, current_distance, joined_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![
                group_id.to_string(),
                reference.kind.as_str(),
                reference.id.to_string(),
                to_db_time(&now),
            ],
        )?;

        Ok(GoalStatus {
            group_id,
            context: reference,
            current_distance: 0.0,
            goal_reached_at: None,
            best_leaf_id: None,
            joined_at: now,
        })
    }

    fn reset_statuses(&self, reference: ContextRef) -> Result<usize, TrackingError> {
        let changed = self.conn.execute(
            "UPDATE goal_status
             SET current_distance = 0, goal_reached_at = NULL, best_leaf_id = NULL
             WHERE context_kind = ?1 AND context_id = ?2",
            params![reference.kind.as_str(), reference.id.to_string()],
        )?;
        Ok(changed)
    }
}

fn unknown_context(reference: ContextRef) -> TrackingError {
    let kind = match reference.kind {
        ContextKind::Travel => "track",
        ContextKind::Event => "event",
    };
    TrackingError::UnknownEntity {
        kind,
        id: reference.id,
    }
}
