//! Concurrent writers crossing the same milestones.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rideledger::goals::{GoalManager, GoalTrackStore};
use rideledger::hierarchy::GroupDirectory;
use rideledger::history::SqliteHistoryRecorder;
use rideledger::milestones::{AchievementStore, LockPolicy, MilestoneAward, MilestoneStore};
use rideledger::progress::{IngestOutcome, Ingestor, RetryPolicy};
use rideledger::{Database, InMemoryTotalsCache, RecordLocks};
use tempfile::TempDir;

use super::fixtures::RiderFixture;

#[test]
fn test_each_milestone_has_exactly_one_winner() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("race.db");

    let (track_id, grade_id, riders) = {
        let db = Database::open(&path).unwrap();
        let conn = db.connection();
        let groups = GroupDirectory::new(conn);
        let grade = groups.create_group("Grade 6", None).unwrap();
        let manager = GoalManager::new(conn, &SqliteHistoryRecorder);
        let track = manager.create_track("Tour", 1_000.0, false).unwrap();
        manager.assign_group_to_track(grade.id, track.reference.id).unwrap();
        for km in [10.0, 20.0, 30.0, 40.0] {
            manager
                .add_milestone(track.reference.id, &format!("KM {}", km), km, None)
                .unwrap();
        }

        let mut riders = Vec::new();
        for name in ["6a", "6b", "6c"] {
            let leaf = groups.create_group(name, Some(grade.id)).unwrap();
            riders.push(RiderFixture::create(conn, name, leaf.id));
        }
        (track.reference.id, grade.id, riders)
    };

    let locks = Arc::new(RecordLocks::new(LockPolicy {
        max_attempts: 50,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(20),
    }));
    let cache = Arc::new(InMemoryTotalsCache::new(Duration::from_secs(55)));
    let retry = RetryPolicy {
        max_attempts: 20,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(100),
    };

    let handles: Vec<_> = riders
        .into_iter()
        .map(|rider| {
            let path = path.clone();
            let locks = Arc::clone(&locks);
            let cache = cache.clone();
            thread::spawn(move || {
                let db = Database::open(&path).unwrap();
                let mut ingestor = Ingestor::new(db, locks, cache).with_retry_policy(retry);
                let mut awards: Vec<MilestoneAward> = Vec::new();
                for minute in 0..15 {
                    match ingestor.ingest(&rider.ride(1.0, minute)).unwrap() {
                        IngestOutcome::Applied(report) => awards.extend(report.awards),
                        other => panic!("unexpected outcome {:?}", other),
                    }
                }
                awards
            })
        })
        .collect();

    let awards: Vec<MilestoneAward> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    let db = Database::open(&path).unwrap();
    let conn = db.connection();

    let status = GoalTrackStore::new(conn).travel_status(grade_id).unwrap().unwrap();
    assert_eq!(status.current_distance, 45.0);

    let milestones = MilestoneStore::new(conn).for_track(track_id).unwrap();
    assert_eq!(milestones.len(), 4);
    for milestone in &milestones {
        assert!(milestone.is_reached(), "{} has no winner", milestone.name);
        let won: Vec<_> = awards
            .iter()
            .filter(|a| a.milestone_id == milestone.id)
            .collect();
        assert_eq!(won.len(), 1, "{} awarded {} times", milestone.name, won.len());
        assert_eq!(Some(won[0].winner_group_id), milestone.winner_group_id);
    }

    let achievements = AchievementStore::new(conn).for_track(track_id).unwrap();
    assert_eq!(achievements.len(), 4);
    assert!(!locks.is_held(milestones[0].id));
}
