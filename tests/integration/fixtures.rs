//! Shared setup for integration tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rideledger::hierarchy::GroupDirectory;
use rideledger::progress::{IngestOutcome, IngestReport, Ingestor, Measurement};
use rideledger::{Database, InMemoryTotalsCache, ManualClock, RecordLocks};
use rusqlite::Connection;
use uuid::Uuid;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 5, 8, 0, 0).unwrap()
}

pub fn memory_ingestor() -> Ingestor {
    Ingestor::new(
        Database::open_in_memory().unwrap(),
        Arc::new(RecordLocks::default()),
        Arc::new(InMemoryTotalsCache::new(Duration::from_secs(55))),
    )
    .with_clock(Arc::new(ManualClock::new(start_time())))
}

/// A rider with a device, member of the given group.
pub struct RiderFixture {
    pub rider_id: Uuid,
    pub device_id: Uuid,
}

impl RiderFixture {
    pub fn create(conn: &Connection, name: &str, group_id: Uuid) -> Self {
        let dir = GroupDirectory::new(conn);
        let rider = dir.create_rider(name).unwrap();
        dir.add_membership(rider.id, group_id).unwrap();
        let device = dir.create_device(&format!("{}'s counter", name)).unwrap();
        Self {
            rider_id: rider.id,
            device_id: device.id,
        }
    }

    pub fn ride(&self, delta_km: f64, minute: u32) -> Measurement {
        Measurement {
            rider_id: Some(self.rider_id),
            device_id: self.device_id,
            delta_km,
            timestamp: start_time() + chrono::Duration::minutes(i64::from(minute)),
        }
    }
}

pub fn applied(outcome: IngestOutcome) -> IngestReport {
    match outcome {
        IngestOutcome::Applied(report) => report,
        other => panic!("expected an applied measurement, got {:?}", other),
    }
}
