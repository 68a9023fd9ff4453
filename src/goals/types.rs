//! Goal context and progress types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which game a progress counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// A travel track with milestones
    Travel,
    /// A distance event
    Event,
}

impl ContextKind {
    /// Storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Travel => "travel",
            ContextKind::Event => "event",
        }
    }

    /// Parse a storage name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "travel" => Some(ContextKind::Travel),
            "event" => Some(ContextKind::Event),
            _ => None,
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A specific track or event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextRef {
    pub kind: ContextKind,
    pub id: Uuid,
}

impl ContextRef {
    pub fn travel(id: Uuid) -> Self {
        Self {
            kind: ContextKind::Travel,
            id,
        }
    }

    pub fn event(id: Uuid) -> Self {
        Self {
            kind: ContextKind::Event,
            id,
        }
    }
}

impl fmt::Display for ContextRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// When a context accepts distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalWindow {
    /// Administrative on/off switch
    pub is_active: bool,
    /// Travel only: the window opens with the first kilometre
    pub auto_start: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl GoalWindow {
    /// Whether distance applied at `now` counts for this context.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        if matches!(self.end_time, Some(end) if now > end) {
            return false;
        }
        if self.auto_start {
            return true;
        }
        !matches!(self.start_time, Some(start) if now < start)
    }
}

/// A track or event with its target and window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalContext {
    pub reference: ContextRef,
    pub name: String,
    /// Target kilometres. `None` or a non-positive value means uncapped.
    pub target_km: Option<f64>,
    pub window: GoalWindow,
    pub created_at: DateTime<Utc>,
}

impl GoalContext {
    /// The effective cap, if any.
    pub fn target(&self) -> Option<f64> {
        self.target_km.filter(|t| *t > 0.0)
    }

    /// Whether `distance` meets the cap.
    pub fn is_reached(&self, distance: f64) -> bool {
        self.target().map(|t| distance >= t).unwrap_or(false)
    }
}

/// A group's capped progress in one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalStatus {
    pub group_id: Uuid,
    pub context: ContextRef,
    /// Never above the context's target
    pub current_distance: f64,
    /// Set once, when the target is first reached
    pub goal_reached_at: Option<DateTime<Utc>>,
    /// Leaf with the highest contribution toward this status
    pub best_leaf_id: Option<Uuid>,
    pub joined_at: DateTime<Utc>,
}

/// Result of applying a delta to a capped counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Advance {
    pub new_distance: f64,
    /// Part of the delta that was kept
    pub applied: f64,
    /// The target was reached by this delta
    pub first_reached: bool,
}

/// Apply a delta to a capped counter.
///
/// Returns `None` when nothing changes: a non-positive delta, or a counter
/// that already sits at its target.
pub fn advance(current: f64, delta: f64, target: Option<f64>) -> Option<Advance> {
    if delta.is_nan() || delta <= 0.0 {
        return None;
    }

    match target.filter(|t| *t > 0.0) {
        None => Some(Advance {
            new_distance: current + delta,
            applied: delta,
            first_reached: false,
        }),
        Some(target) if current >= target => None,
        Some(target) => {
            let new_distance = (current + delta).min(target);
            Some(Advance {
                new_distance,
                applied: new_distance - current,
                first_reached: new_distance >= target,
            })
        }
    }
}

/// What a single status update did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalOutcome {
    pub group_id: Uuid,
    pub context: ContextRef,
    pub previous_distance: f64,
    pub new_distance: f64,
    /// Delta actually added after capping
    pub applied: f64,
    pub first_reached: bool,
    /// The track's start time was set by this delta
    pub auto_started: bool,
}
