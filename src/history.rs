//! Goal history.
//!
//! Assignments, removals, completions, restarts and reached goals are
//! written through an explicit recorder inside the caller's transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TrackingError;
use crate::goals::types::{ContextKind, ContextRef};
use crate::storage::database::{time_at, to_db_time, uuid_at};

/// What happened to a group in a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Assigned,
    /// Left a track before collecting anything
    Removed,
    /// Left a track with kilometres collected
    Aborted,
    Completed,
    Restarted,
    GoalReached,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Assigned => "assigned",
            HistoryAction::Removed => "removed",
            HistoryAction::Aborted => "aborted",
            HistoryAction::Completed => "completed",
            HistoryAction::Restarted => "restarted",
            HistoryAction::GoalReached => "goal_reached",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "assigned" => Some(HistoryAction::Assigned),
            "removed" => Some(HistoryAction::Removed),
            "aborted" => Some(HistoryAction::Aborted),
            "completed" => Some(HistoryAction::Completed),
            "restarted" => Some(HistoryAction::Restarted),
            "goal_reached" => Some(HistoryAction::GoalReached),
            _ => None,
        }
    }
}

/// One history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub context: ContextRef,
    pub group_id: Uuid,
    pub action: HistoryAction,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Kilometres collected in the run being recorded
    pub distance_km: f64,
}

/// Receives history side effects.
pub trait HistoryRecorder: Send + Sync {
    /// Record an entry using the caller's connection or transaction.
    fn record(&self, conn: &Connection, entry: &HistoryEntry) -> Result<(), TrackingError>;
}

/// Writes history into the `goal_history` table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteHistoryRecorder;

impl HistoryRecorder for SqliteHistoryRecorder {
    fn record(&self, conn: &Connection, entry: &HistoryEntry) -> Result<(), TrackingError> {
        conn.execute(
            "INSERT INTO goal_history
             (context_kind, context_id, group_id, action, start_time, end_time, distance_km, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.context.kind.as_str(),
                entry.context.id.to_string(),
                entry.group_id.to_string(),
                entry.action.as_str(),
                to_db_time(&entry.start_time),
                to_db_time(&entry.end_time),
                entry.distance_km,
                to_db_time(&Utc::now()),
            ],
        )?;
        Ok(())
    }
}

/// History of a group, most recent first.
pub fn entries_for(conn: &Connection, group_id: Uuid) -> Result<Vec<HistoryEntry>, TrackingError> {
    let mut stmt = conn.prepare(
        "SELECT context_kind, context_id, group_id, action, start_time, end_time, distance_km
         FROM goal_history WHERE group_id = ?1 ORDER BY end_time DESC, id DESC",
    )?;

    let rows = stmt.query_map(params![group_id.to_string()], |row| {
        let kind: String = row.get(0)?;
        let action: String = row.get(3)?;
        Ok((
            kind,
            uuid_at(row, 1)?,
            uuid_at(row, 2)?,
            action,
            time_at(row, 4)?,
            time_at(row, 5)?,
            row.get::<_, f64>(6)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (kind, context_id, group_id, action, start_time, end_time, distance_km) = row?;
        let kind = ContextKind::parse(&kind).ok_or_else(|| {
            TrackingError::InconsistentState(format!("unknown context kind '{}'", kind))
        })?;
        let action = HistoryAction::parse(&action).ok_or_else(|| {
            TrackingError::InconsistentState(format!("unknown history action '{}'", action))
        })?;
        entries.push(HistoryEntry {
            context: ContextRef { kind, id: context_id },
            group_id,
            action,
            start_time,
            end_time,
            distance_km,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::GroupDirectory;
    use crate::storage::Database;
    use chrono::TimeZone;

    #[test]
    fn test_record_and_read_back() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let group = GroupDirectory::new(conn).create_group("1a", None).unwrap();
        let track = ContextRef::travel(Uuid::new_v4());
        let start = Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap();

        let recorder = SqliteHistoryRecorder;
        for (action, end_hour, km) in [
            (HistoryAction::Assigned, 8, 0.0),
            (HistoryAction::GoalReached, 12, 100.0),
        ] {
            recorder
                .record(
                    conn,
                    &HistoryEntry {
                        context: track,
                        group_id: group.id,
                        action,
                        start_time: start,
                        end_time: Utc.with_ymd_and_hms(2025, 4, 1, end_hour, 0, 0).unwrap(),
                        distance_km: km,
                    },
                )
                .unwrap();
        }

        let entries = entries_for(conn, group.id).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, HistoryAction::GoalReached);
        assert_eq!(entries[0].distance_km, 100.0);
        assert_eq!(entries[1].context, track);
    }
}
