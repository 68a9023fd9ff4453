//! Group, rider and device records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An organizational unit in the hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Unique identifier
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Parent group, `None` for a top group
    pub parent_id: Option<Uuid>,
    /// All-time kilometres, only ever increased by propagation
    pub distance_total: f64,
    /// All-time coins
    pub coins_total: i64,
    /// Hidden groups never win milestones
    pub is_visible: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Group {
    /// Whether this group sits at the root of its tree.
    pub fn is_top(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A person whose distance is collected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rider {
    /// Unique identifier
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// When false, increments are not recorded at all
    pub km_collection_enabled: bool,
    /// All-time kilometres
    pub distance_total: f64,
    /// Last time a measurement was accepted
    pub last_active: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// A reporting device (bike counter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub name: String,
    pub distance_total: f64,
    pub last_active: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
