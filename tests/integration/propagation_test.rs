//! Integration tests for the ingestion and propagation path.

use std::sync::Arc;

use rideledger::goals::{GoalManager, GoalTrackStore, LeafContributionTracker};
use rideledger::hierarchy::{GroupDirectory, GroupHierarchy};
use rideledger::history::{entries_for, HistoryAction, SqliteHistoryRecorder};
use rideledger::ChannelListener;

use super::fixtures::{applied, memory_ingestor, RiderFixture};

#[test]
fn test_capped_track_and_uncapped_totals() {
    let mut ingestor = memory_ingestor();
    let (school, class, mia) = {
        let conn = ingestor.connection();
        let dir = GroupDirectory::new(conn);
        let school = dir.create_group("School", None).unwrap();
        let class = dir.create_group("3c", Some(school.id)).unwrap();
        let manager = GoalManager::new(conn, &SqliteHistoryRecorder);
        let track = manager.create_track("Alps", 100.0, false).unwrap();
        manager.assign_group_to_track(class.id, track.reference.id).unwrap();
        let mia = RiderFixture::create(conn, "Mia", class.id);
        (school, class, mia)
    };

    applied(ingestor.ingest(&mia.ride(95.0, 5)).unwrap());
    let report = applied(ingestor.ingest(&mia.ride(10.0, 20)).unwrap());
    assert_eq!(report.groups, vec![class.id, school.id]);
    assert_eq!(report.goals_reached.len(), 1);
    assert_eq!(report.goals_reached[0].applied, 5.0);
    assert_eq!(report.rider_total, Some(105.0));

    let conn = ingestor.connection();
    let status = GoalTrackStore::new(conn).travel_status(class.id).unwrap().unwrap();
    assert_eq!(status.current_distance, 100.0);
    assert!(status.goal_reached_at.is_some());

    let tree = GroupHierarchy::new(conn);
    assert_eq!(tree.group(class.id).unwrap().unwrap().distance_total, 105.0);
    assert_eq!(tree.group(school.id).unwrap().unwrap().distance_total, 105.0);

    let history = entries_for(conn, class.id).unwrap();
    let reached = history
        .iter()
        .find(|e| e.action == HistoryAction::GoalReached)
        .unwrap();
    assert_eq!(reached.distance_km, 100.0);
}

#[test]
fn test_rider_in_two_groups_counts_fully_in_both() {
    let mut ingestor = memory_ingestor();
    let (club, class, ben) = {
        let conn = ingestor.connection();
        let dir = GroupDirectory::new(conn);
        let club = dir.create_group("Cycling club", None).unwrap();
        let class = dir.create_group("4a", None).unwrap();
        let ben = RiderFixture::create(conn, "Ben", class.id);
        dir.add_membership(ben.rider_id, club.id).unwrap();
        (club, class, ben)
    };

    let report = applied(ingestor.ingest(&ben.ride(6.0, 1)).unwrap());
    assert_eq!(report.groups, vec![class.id, club.id]);

    let tree = GroupHierarchy::new(ingestor.connection());
    assert_eq!(tree.group(class.id).unwrap().unwrap().distance_total, 6.0);
    assert_eq!(tree.group(club.id).unwrap().unwrap().distance_total, 6.0);
}

#[test]
fn test_best_leaf_follows_strict_lead() {
    let mut ingestor = memory_ingestor();
    let (grade, x, y, rx, ry) = {
        let conn = ingestor.connection();
        let dir = GroupDirectory::new(conn);
        let grade = dir.create_group("Grade 5", None).unwrap();
        let x = dir.create_group("5a", Some(grade.id)).unwrap();
        let y = dir.create_group("5b", Some(grade.id)).unwrap();
        let manager = GoalManager::new(conn, &SqliteHistoryRecorder);
        let track = manager.create_track("Elbe", 1_000.0, false).unwrap();
        manager.assign_group_to_track(grade.id, track.reference.id).unwrap();
        let rx = RiderFixture::create(conn, "Ida", x.id);
        let ry = RiderFixture::create(conn, "Tom", y.id);
        (grade, x, y, rx, ry)
    };

    ingestor.ingest(&rx.ride(40.0, 1)).unwrap();
    ingestor.ingest(&ry.ride(60.0, 2)).unwrap();

    let conn = ingestor.connection();
    let status = GoalTrackStore::new(conn).travel_status(grade.id).unwrap().unwrap();
    assert_eq!(status.current_distance, 100.0);
    assert_eq!(status.best_leaf_id, Some(y.id));

    ingestor.ingest(&rx.ride(25.0, 3)).unwrap();
    let conn = ingestor.connection();
    let status = GoalTrackStore::new(conn).travel_status(grade.id).unwrap().unwrap();
    assert_eq!(status.best_leaf_id, Some(x.id));

    let contributions = LeafContributionTracker::new(conn)
        .contributions_for(status.context)
        .unwrap();
    assert_eq!(contributions[0].leaf_group_id, x.id);
    assert_eq!(contributions[0].current_distance, 65.0);
}

#[test]
fn test_listener_sees_committed_totals() {
    let (listener, rx) = ChannelListener::unbounded();
    let mut ingestor = memory_ingestor().with_listener(Arc::new(listener));
    let lea = {
        let conn = ingestor.connection();
        let class = GroupDirectory::new(conn).create_group("1b", None).unwrap();
        RiderFixture::create(conn, "Lea", class.id)
    };

    ingestor.ingest(&lea.ride(1.25, 10)).unwrap();
    ingestor.ingest(&lea.ride(0.75, 70)).unwrap();

    let first = rx.try_recv().unwrap();
    let second = rx.try_recv().unwrap();
    assert_eq!(first.distance_total, 1.25);
    assert_eq!(second.distance_total, 2.0);
    assert_eq!(second.delta_km, 0.75);
    assert_eq!(second.rider_id, lea.rider_id);
}
