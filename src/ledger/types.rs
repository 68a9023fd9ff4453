//! Ledger entry types.

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One (rider, device, hour) slot of recorded distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Row id
    pub id: i64,
    /// Start of the hour this entry covers
    pub hour: DateTime<Utc>,
    /// Kilometres recorded in the hour, never decreased
    pub distance_km: f64,
    /// `None` for devices without an attributed rider
    pub rider_id: Option<Uuid>,
    pub device_id: Uuid,
    /// The rider's group when the entry was produced
    pub group_at_time: Option<Uuid>,
    /// Finalized entries are immutable
    pub finalized: bool,
}

/// Truncate a timestamp to the start of its hour.
pub fn hour_bucket(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::hours(1)).unwrap_or_else(|_| {
        ts.with_nanosecond(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_minute(0))
            .unwrap_or(ts)
    })
}
