//! Unit tests for ingestion validation and the ledger-only paths.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rideledger::hierarchy::{GroupDirectory, GroupHierarchy};
use rideledger::ledger::DistanceLedger;
use rideledger::progress::{HourTotal, IngestOutcome, Ingestor, Measurement};
use rideledger::{Database, InMemoryTotalsCache, ManualClock, RecordLocks, TrackingError};
use uuid::Uuid;

fn ingestor() -> Ingestor {
    let db = Database::open_in_memory().unwrap();
    let start = Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap();
    Ingestor::new(
        db,
        Arc::new(RecordLocks::default()),
        Arc::new(InMemoryTotalsCache::new(Duration::from_secs(55))),
    )
    .with_clock(Arc::new(ManualClock::new(start)))
}

#[test]
fn test_rejects_bad_deltas() {
    let mut ingestor = ingestor();
    let device = GroupDirectory::new(ingestor.connection())
        .create_device("Counter 1")
        .unwrap();

    for delta in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        let err = ingestor
            .ingest(&Measurement {
                rider_id: None,
                device_id: device.id,
                delta_km: delta,
                timestamp: Utc::now(),
            })
            .unwrap_err();
        assert!(err.is_validation(), "delta {} should be invalid", delta);
    }
}

#[test]
fn test_unknown_rider_and_device() {
    let mut ingestor = ingestor();
    let device = GroupDirectory::new(ingestor.connection())
        .create_device("Counter 1")
        .unwrap();

    let err = ingestor
        .ingest(&Measurement {
            rider_id: Some(Uuid::new_v4()),
            device_id: device.id,
            delta_km: 1.0,
            timestamp: Utc::now(),
        })
        .unwrap_err();
    assert!(matches!(err, TrackingError::UnknownEntity { kind: "rider", .. }));
    assert!(!err.is_retryable());

    let err = ingestor
        .ingest(&Measurement {
            rider_id: None,
            device_id: Uuid::new_v4(),
            delta_km: 1.0,
            timestamp: Utc::now(),
        })
        .unwrap_err();
    assert!(matches!(err, TrackingError::UnknownEntity { kind: "device", .. }));
}

#[test]
fn test_disabled_collection_records_nothing() {
    let mut ingestor = ingestor();
    let (rider, device) = {
        let dir = GroupDirectory::new(ingestor.connection());
        let rider = dir.create_rider("Mia").unwrap();
        dir.set_km_collection(rider.id, false).unwrap();
        (rider, dir.create_device("Counter 1").unwrap())
    };

    let outcome = ingestor
        .ingest(&Measurement {
            rider_id: Some(rider.id),
            device_id: device.id,
            delta_km: 3.0,
            timestamp: Utc::now(),
        })
        .unwrap();
    assert_eq!(outcome, IngestOutcome::CollectionDisabled { rider_id: rider.id });

    let ledger = DistanceLedger::new(ingestor.connection());
    assert!(ledger.entries_for_rider(rider.id).unwrap().is_empty());
}

#[test]
fn test_unattributed_device_only_counts_for_device() {
    let mut ingestor = ingestor();
    let device = GroupDirectory::new(ingestor.connection())
        .create_device("Counter 2")
        .unwrap();

    let outcome = ingestor
        .ingest(&Measurement {
            rider_id: None,
            device_id: device.id,
            delta_km: 2.0,
            timestamp: Utc.with_ymd_and_hms(2025, 3, 10, 7, 15, 0).unwrap(),
        })
        .unwrap();

    let IngestOutcome::Applied(report) = outcome else {
        panic!("expected an applied measurement");
    };
    assert!(report.groups.is_empty());
    assert_eq!(report.rider_total, None);

    let device = GroupHierarchy::new(ingestor.connection())
        .device(device.id)
        .unwrap()
        .unwrap();
    assert_eq!(device.distance_total, 2.0);
}

#[test]
fn test_hour_total_replay_is_unchanged() {
    let mut ingestor = ingestor();
    let (rider, device, class) = {
        let dir = GroupDirectory::new(ingestor.connection());
        let class = dir.create_group("1a", None).unwrap();
        let rider = dir.create_rider("Ben").unwrap();
        dir.add_membership(rider.id, class.id).unwrap();
        (rider, dir.create_device("Counter 3").unwrap(), class)
    };

    let hour = Utc.with_ymd_and_hms(2025, 3, 10, 7, 0, 0).unwrap();
    let total = HourTotal {
        rider_id: Some(rider.id),
        device_id: device.id,
        hour,
        total_km: 4.0,
    };

    assert!(matches!(
        ingestor.ingest_hour_total(&total).unwrap(),
        IngestOutcome::Applied(_)
    ));
    assert_eq!(ingestor.ingest_hour_total(&total).unwrap(), IngestOutcome::Unchanged);

    // Growth propagates only the difference
    let grown = HourTotal {
        total_km: 6.5,
        ..total.clone()
    };
    let IngestOutcome::Applied(report) = ingestor.ingest_hour_total(&grown).unwrap() else {
        panic!("expected growth to apply");
    };
    assert_eq!(report.delta_km, 2.5);

    let class = GroupHierarchy::new(ingestor.connection())
        .group(class.id)
        .unwrap()
        .unwrap();
    assert_eq!(class.distance_total, 6.5);
}

#[test]
fn test_finalized_hour_rejects_late_deltas() {
    let mut ingestor = ingestor();
    let (rider, device) = {
        let dir = GroupDirectory::new(ingestor.connection());
        let rider = dir.create_rider("Lea").unwrap();
        (rider, dir.create_device("Counter 4").unwrap())
    };

    let early = Utc.with_ymd_and_hms(2025, 3, 10, 6, 20, 0).unwrap();
    let measurement = Measurement {
        rider_id: Some(rider.id),
        device_id: device.id,
        delta_km: 1.0,
        timestamp: early,
    };
    ingestor.ingest(&measurement).unwrap();
    assert_eq!(
        ingestor
            .finalize_before(Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap())
            .unwrap(),
        1
    );

    let err = ingestor.ingest(&measurement).unwrap_err();
    assert!(err.is_validation());

    let rider = GroupHierarchy::new(ingestor.connection())
        .rider(rider.id)
        .unwrap()
        .unwrap();
    assert_eq!(rider.distance_total, 1.0);
}
