//! Unit tests for cached totals around ingestion and snapshots.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rideledger::hierarchy::GroupDirectory;
use rideledger::progress::{Ingestor, Measurement};
use rideledger::totals::TotalsQuery;
use rideledger::{Database, InMemoryTotalsCache, RecordLocks, SnapshotIndex, TotalsEntity, TotalsReader};

#[test]
fn test_ingestion_invalidates_cached_totals() {
    let cache = Arc::new(InMemoryTotalsCache::new(Duration::from_secs(55)));
    let mut ingestor = Ingestor::new(
        Database::open_in_memory().unwrap(),
        Arc::new(RecordLocks::default()),
        cache.clone(),
    );
    let reader = TotalsReader::new(cache.clone());

    let (school, class, rider, device) = {
        let dir = GroupDirectory::new(ingestor.connection());
        let school = dir.create_group("School", None).unwrap();
        let class = dir.create_group("2b", Some(school.id)).unwrap();
        let rider = dir.create_rider("Noah").unwrap();
        dir.add_membership(rider.id, class.id).unwrap();
        (school, class, rider, dir.create_device("Counter").unwrap())
    };

    let now = Utc.with_ymd_and_hms(2025, 9, 17, 12, 0, 0).unwrap();
    let entities = [TotalsEntity::Group(school.id), TotalsEntity::Rider(rider.id)];

    ingestor
        .ingest(&Measurement {
            rider_id: Some(rider.id),
            device_id: device.id,
            delta_km: 3.0,
            timestamp: Utc.with_ymd_and_hms(2025, 9, 17, 9, 10, 0).unwrap(),
        })
        .unwrap();

    let first = reader.totals(ingestor.connection(), &entities, now).unwrap();
    assert_eq!(first[&TotalsEntity::Group(school.id)].daily, 3.0);
    assert_eq!(cache.len(), 1);

    ingestor
        .ingest(&Measurement {
            rider_id: Some(rider.id),
            device_id: device.id,
            delta_km: 2.0,
            timestamp: Utc.with_ymd_and_hms(2025, 9, 17, 10, 5, 0).unwrap(),
        })
        .unwrap();
    assert!(cache.is_empty());

    let second = reader.totals(ingestor.connection(), &entities, now).unwrap();
    assert_eq!(second[&TotalsEntity::Group(school.id)].total, 5.0);
    assert_eq!(second[&TotalsEntity::Rider(rider.id)].total, 5.0);

    // The class alone resolves to the same subtree sum
    let class_total = TotalsQuery::new(ingestor.connection())
        .effective_total(TotalsEntity::Group(class.id), now)
        .unwrap();
    assert_eq!(class_total, 5.0);
}

#[test]
fn test_snapshot_then_undo_restores_all_time_total() {
    let mut ingestor = Ingestor::new(
        Database::open_in_memory().unwrap(),
        Arc::new(RecordLocks::default()),
        Arc::new(InMemoryTotalsCache::new(Duration::from_secs(55))),
    );
    let (school, rider, device) = {
        let dir = GroupDirectory::new(ingestor.connection());
        let school = dir.create_group("School", None).unwrap();
        let rider = dir.create_rider("Ella").unwrap();
        dir.add_membership(rider.id, school.id).unwrap();
        (school, rider, dir.create_device("Counter").unwrap())
    };

    for (hour, km) in [(8, 4.0), (11, 1.5)] {
        ingestor
            .ingest(&Measurement {
                rider_id: Some(rider.id),
                device_id: device.id,
                delta_km: km,
                timestamp: Utc.with_ymd_and_hms(2025, 9, 18, hour, 30, 0).unwrap(),
            })
            .unwrap();
    }

    let now = Utc.with_ymd_and_hms(2025, 9, 18, 15, 0, 0).unwrap();
    let conn = ingestor.connection();
    let query = TotalsQuery::new(conn);
    let index = SnapshotIndex::new(conn);

    let snapshot = index
        .create(school.id, Utc.with_ymd_and_hms(2025, 9, 18, 10, 0, 0).unwrap())
        .unwrap();
    assert_eq!(query.effective_total(TotalsEntity::Group(school.id), now).unwrap(), 1.5);
    assert_eq!(query.effective_total(TotalsEntity::Rider(rider.id), now).unwrap(), 1.5);

    index.undo(snapshot.id, now).unwrap();
    assert_eq!(query.effective_total(TotalsEntity::Group(school.id), now).unwrap(), 5.5);
    assert!(index.undo(snapshot.id, now).unwrap_err().is_validation());
}
