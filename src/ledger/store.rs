//! Ledger persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::types::{hour_bucket, LedgerEntry};
use crate::error::TrackingError;
use crate::storage::database::{opt_uuid_at, time_at, to_db_time, uuid_at};

const SLOT_FILTER: &str = "IFNULL(rider_id, '') = ?1 AND device_id = ?2 AND hour = ?3";

/// Hour-bucketed distance ledger.
pub struct DistanceLedger<'a> {
    conn: &'a Connection,
}

impl<'a> DistanceLedger<'a> {
    /// Create a ledger view on a connection or transaction.
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Add a delta to the open entry for the measurement's hour.
    ///
    /// Returns the kilometres actually recorded. A zero delta records nothing.
    pub fn record_delta(
        &self,
        rider_id: Option<Uuid>,
        device_id: Uuid,
        timestamp: DateTime<Utc>,
        delta_km: f64,
        group_at_time: Option<Uuid>,
    ) -> Result<f64, TrackingError> {
        if !delta_km.is_finite() || delta_km < 0.0 {
            return Err(TrackingError::Validation(format!(
                "delta must be a non-negative number of kilometres, got {}",
                delta_km
            )));
        }
        if delta_km == 0.0 {
            return Ok(0.0);
        }

        let hour = hour_bucket(timestamp);
        match self.slot(rider_id, device_id, hour)? {
            Some((_, _, true)) => Err(finalized_error(device_id, hour)),
            Some((id, _, false)) => {
                self.conn.execute(
                    "UPDATE ledger_entries SET distance_km = distance_km + ?1 WHERE id = ?2",
                    params![delta_km, id],
                )?;
                Ok(delta_km)
            }
            None => {
                self.insert(rider_id, device_id, hour, delta_km, group_at_time)?;
                Ok(delta_km)
            }
        }
    }

    /// Store a device-reported running total for an hour.
    ///
    /// The entry becomes `max(existing, total_km)`; the return value is the
    /// increase, so replaying the same total yields zero.
    pub fn record_hour_total(
        &self,
        rider_id: Option<Uuid>,
        device_id: Uuid,
        hour: DateTime<Utc>,
        total_km: f64,
        group_at_time: Option<Uuid>,
    ) -> Result<f64, TrackingError> {
        if !total_km.is_finite() || total_km < 0.0 {
            return Err(TrackingError::Validation(format!(
                "hour total must be a non-negative number of kilometres, got {}",
                total_km
            )));
        }

        let hour = hour_bucket(hour);
        match self.slot(rider_id, device_id, hour)? {
            Some((id, existing, finalized)) => {
                let delta = (total_km - existing).max(0.0);
                if delta == 0.0 {
                    return Ok(0.0);
                }
                if finalized {
                    return Err(finalized_error(device_id, hour));
                }
                self.conn.execute(
                    "UPDATE ledger_entries SET distance_km = ?1 WHERE id = ?2",
                    params![total_km, id],
                )?;
                Ok(delta)
            }
            None => {
                if total_km > 0.0 {
                    self.insert(rider_id, device_id, hour, total_km, group_at_time)?;
                }
                Ok(total_km)
            }
        }
    }

    /// Freeze every entry whose hour ended before the cutoff's hour.
    pub fn finalize_before(&self, cutoff: DateTime<Utc>) -> Result<usize, TrackingError> {
        let changed = self.conn.execute(
            "UPDATE ledger_entries SET finalized = 1 WHERE hour < ?1 AND finalized = 0",
            params![to_db_time(&hour_bucket(cutoff))],
        )?;
        if changed > 0 {
            tracing::debug!("Finalized {} ledger entries", changed);
        }
        Ok(changed)
    }

    /// All entries of a rider, oldest first.
    pub fn entries_for_rider(&self, rider_id: Uuid) -> Result<Vec<LedgerEntry>, TrackingError> {
        self.entries_where("rider_id = ?1", rider_id)
    }

    /// All entries of a device, oldest first.
    pub fn entries_for_device(&self, device_id: Uuid) -> Result<Vec<LedgerEntry>, TrackingError> {
        self.entries_where("device_id = ?1", device_id)
    }

    fn entries_where(&self, filter: &str, id: Uuid) -> Result<Vec<LedgerEntry>, TrackingError> {
        let sql = format!(
            "SELECT id, hour, distance_km, rider_id, device_id, group_at_time, finalized
             FROM ledger_entries WHERE {} ORDER BY hour, id",
            filter
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![id.to_string()], parse_entry_row)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(TrackingError::from)
    }

    fn slot(
        &self,
        rider_id: Option<Uuid>,
        device_id: Uuid,
        hour: DateTime<Utc>,
    ) -> Result<Option<(i64, f64, bool)>, TrackingError> {
        let sql = format!(
            "SELECT id, distance_km, finalized FROM ledger_entries WHERE {}",
            SLOT_FILTER
        );
        self.conn
            .query_row(
                &sql,
                params![
                    rider_id.map(|r| r.to_string()).unwrap_or_default(),
                    device_id.to_string(),
                    to_db_time(&hour)
                ],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(TrackingError::from)
    }

    fn insert(
        &self,
        rider_id: Option<Uuid>,
        device_id: Uuid,
        hour: DateTime<Utc>,
        distance_km: f64,
        group_at_time: Option<Uuid>,
    ) -> Result<(), TrackingError> {
        self.conn.execute(
            "INSERT INTO ledger_entries (hour, distance_km, rider_id, device_id, group_at_time, finalized)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                to_db_time(&hour),
                distance_km,
                rider_id.map(|r| r.to_string()),
                device_id.to_string(),
                group_at_time.map(|g| g.to_string()),
            ],
        )?;
        Ok(())
    }
}

fn finalized_error(device_id: Uuid, hour: DateTime<Utc>) -> TrackingError {
    TrackingError::Validation(format!(
        "ledger entry for device {} at {} is finalized",
        device_id,
        to_db_time(&hour)
    ))
}

fn parse_entry_row(row: &rusqlite::Row) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        hour: time_at(row, 1)?,
        distance_km: row.get(2)?,
        rider_id: opt_uuid_at(row, 3)?,
        device_id: uuid_at(row, 4)?,
        group_at_time: opt_uuid_at(row, 5)?,
        finalized: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::GroupDirectory;
    use crate::storage::Database;
    use chrono::TimeZone;

    fn setup() -> (Database, Uuid, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let (rider, device) = {
            let dir = GroupDirectory::new(db.connection());
            (
                dir.create_rider("Lena").unwrap().id,
                dir.create_device("Counter 7").unwrap().id,
            )
        };
        (db, rider, device)
    }

    #[test]
    fn test_deltas_accumulate_per_hour() {
        let (db, rider, device) = setup();
        let ledger = DistanceLedger::new(db.connection());
        let t = Utc.with_ymd_and_hms(2025, 4, 2, 7, 10, 0).unwrap();

        ledger.record_delta(Some(rider), device, t, 1.5, None).unwrap();
        ledger
            .record_delta(Some(rider), device, t + chrono::Duration::minutes(30), 0.5, None)
            .unwrap();
        ledger
            .record_delta(Some(rider), device, t + chrono::Duration::hours(1), 2.0, None)
            .unwrap();

        let entries = ledger.entries_for_rider(rider).unwrap();
        assert_eq!(entries.len(), 2);
        assert!((entries[0].distance_km - 2.0).abs() < 1e-9);
        assert_eq!(entries[0].hour, Utc.with_ymd_and_hms(2025, 4, 2, 7, 0, 0).unwrap());
        assert!((entries[1].distance_km - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_unattributed_device_has_own_slot() {
        let (db, rider, device) = setup();
        let ledger = DistanceLedger::new(db.connection());
        let t = Utc.with_ymd_and_hms(2025, 4, 2, 7, 10, 0).unwrap();

        ledger.record_delta(None, device, t, 1.0, None).unwrap();
        ledger.record_delta(None, device, t, 1.0, None).unwrap();
        ledger.record_delta(Some(rider), device, t, 4.0, None).unwrap();

        let entries = ledger.entries_for_device(device).unwrap();
        assert_eq!(entries.len(), 2);
        let anonymous = entries.iter().find(|e| e.rider_id.is_none()).unwrap();
        assert!((anonymous.distance_km - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_hour_total_is_idempotent() {
        let (db, rider, device) = setup();
        let ledger = DistanceLedger::new(db.connection());
        let hour = Utc.with_ymd_and_hms(2025, 4, 2, 9, 0, 0).unwrap();

        assert_eq!(ledger.record_hour_total(Some(rider), device, hour, 3.0, None).unwrap(), 3.0);
        assert_eq!(ledger.record_hour_total(Some(rider), device, hour, 3.0, None).unwrap(), 0.0);
        assert!((ledger.record_hour_total(Some(rider), device, hour, 4.5, None).unwrap() - 1.5).abs() < 1e-9);
        // A lower total never shrinks the entry
        assert_eq!(ledger.record_hour_total(Some(rider), device, hour, 2.0, None).unwrap(), 0.0);

        let entries = ledger.entries_for_rider(rider).unwrap();
        assert_eq!(entries.len(), 1);
        assert!((entries[0].distance_km - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_finalized_entries_are_frozen() {
        let (db, rider, device) = setup();
        let ledger = DistanceLedger::new(db.connection());
        let t = Utc.with_ymd_and_hms(2025, 4, 2, 7, 10, 0).unwrap();
        ledger.record_delta(Some(rider), device, t, 1.0, None).unwrap();

        let finalized = ledger
            .finalize_before(t + chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(finalized, 1);

        let err = ledger.record_delta(Some(rider), device, t, 1.0, None).unwrap_err();
        assert!(err.is_validation());

        // Replaying an already-covered total is still a no-op
        let hour = hour_bucket(t);
        assert_eq!(ledger.record_hour_total(Some(rider), device, hour, 1.0, None).unwrap(), 0.0);
    }

    #[test]
    fn test_invalid_delta_rejected() {
        let (db, rider, device) = setup();
        let ledger = DistanceLedger::new(db.connection());
        let t = Utc::now();
        assert!(ledger.record_delta(Some(rider), device, t, f64::NAN, None).is_err());
        assert!(ledger.record_delta(Some(rider), device, t, -1.0, None).is_err());
        assert_eq!(ledger.record_delta(Some(rider), device, t, 0.0, None).unwrap(), 0.0);
        assert!(ledger.entries_for_rider(rider).unwrap().is_empty());
    }
}
