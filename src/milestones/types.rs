//! Milestone and achievement records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An ordered distance threshold on a travel track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: Uuid,
    pub track_id: Uuid,
    pub name: String,
    /// Threshold along the track in kilometres
    pub distance_km: f64,
    pub reward_text: Option<String>,
    /// Set once per run of the track
    pub winner_group_id: Option<Uuid>,
    pub reached_at: Option<DateTime<Utc>>,
}

impl Milestone {
    pub fn is_reached(&self) -> bool {
        self.winner_group_id.is_some()
    }
}

/// A milestone won by a leaf group. Survives track restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: Uuid,
    pub group_id: Uuid,
    pub milestone_id: Uuid,
    pub track_id: Uuid,
    pub reached_at: DateTime<Utc>,
    /// The winner's contribution when the milestone was awarded
    pub reached_distance: Option<f64>,
    /// Reward as it read at award time
    pub reward_text: Option<String>,
    pub is_redeemed: bool,
    pub redeemed_at: Option<DateTime<Utc>>,
}

/// A milestone awarded by one attribution pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneAward {
    pub milestone_id: Uuid,
    pub milestone_name: String,
    pub track_id: Uuid,
    pub winner_group_id: Uuid,
    pub reached_at: DateTime<Utc>,
    pub achievement_id: Uuid,
    /// False when a concurrent pass had already created the achievement
    pub achievement_created: bool,
}
