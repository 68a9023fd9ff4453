//! Track restarts keep achievements and reopen milestones.

use chrono::{Duration, TimeZone, Utc};
use rideledger::goals::{GoalManager, GoalTrackStore, LeafContributionTracker};
use rideledger::hierarchy::GroupDirectory;
use rideledger::history::{entries_for, HistoryAction, SqliteHistoryRecorder};
use rideledger::milestones::{AchievementStore, MilestoneStore};
use rideledger::TrackingError;

use super::fixtures::{applied, memory_ingestor, RiderFixture};

#[test]
fn test_restart_preserves_achievements() {
    let mut ingestor = memory_ingestor();
    let (class, track_id, milestone_id, mia) = {
        let conn = ingestor.connection();
        let class = GroupDirectory::new(conn).create_group("2a", None).unwrap();
        let manager = GoalManager::new(conn, &SqliteHistoryRecorder);
        let track = manager.create_track("Lake", 50.0, true).unwrap();
        manager.assign_group_to_track(class.id, track.reference.id).unwrap();
        let milestone = manager
            .add_milestone(track.reference.id, "Island", 20.0, Some("Ice cream"))
            .unwrap();
        let mia = RiderFixture::create(conn, "Mia", class.id);
        (class, track.reference.id, milestone.id, mia)
    };

    let report = applied(ingestor.ingest(&mia.ride(25.0, 1)).unwrap());
    assert_eq!(report.awards.len(), 1);
    assert!(report.awards[0].achievement_created);
    let achievement_id = report.awards[0].achievement_id;

    {
        let conn = ingestor.connection();
        let restart_at = Utc.with_ymd_and_hms(2025, 5, 6, 8, 0, 0).unwrap();
        let manager = GoalManager::new(conn, &SqliteHistoryRecorder);
        assert_eq!(manager.restart_track(track_id, restart_at).unwrap(), 1);

        let status = GoalTrackStore::new(conn).travel_status(class.id).unwrap().unwrap();
        assert_eq!(status.current_distance, 0.0);
        assert_eq!(status.best_leaf_id, None);

        let track = GoalTrackStore::new(conn).context(status.context).unwrap().unwrap();
        assert_eq!(track.window.start_time, None);
        assert!(LeafContributionTracker::new(conn)
            .contributions_for(status.context)
            .unwrap()
            .is_empty());

        let milestone = MilestoneStore::new(conn).get(milestone_id).unwrap().unwrap();
        assert!(!milestone.is_reached());

        let achievements = AchievementStore::new(conn).for_group(class.id).unwrap();
        assert_eq!(achievements.len(), 1);
        assert_eq!(achievements[0].reward_text.as_deref(), Some("Ice cream"));

        let history = entries_for(conn, class.id).unwrap();
        let restarted = history
            .iter()
            .find(|e| e.action == HistoryAction::Restarted)
            .unwrap();
        assert_eq!(restarted.distance_km, 25.0);
        assert_eq!(restarted.end_time, restart_at);
    }

    // Winning again after the restart converges on the same achievement
    let report = applied(ingestor.ingest(&mia.ride(30.0, 90)).unwrap());
    assert_eq!(report.awards.len(), 1);
    assert!(!report.awards[0].achievement_created);
    assert_eq!(report.awards[0].achievement_id, achievement_id);

    let conn = ingestor.connection();
    let store = AchievementStore::new(conn);
    store.redeem(achievement_id, Utc::now()).unwrap();
    assert!(matches!(
        store.redeem(achievement_id, Utc::now() + Duration::minutes(1)),
        Err(TrackingError::AlreadyRedeemed(_))
    ));
}

#[test]
fn test_closed_track_takes_no_distance() {
    let mut ingestor = memory_ingestor();
    let (class, ben) = {
        let conn = ingestor.connection();
        let class = GroupDirectory::new(conn).create_group("3b", None).unwrap();
        let manager = GoalManager::new(conn, &SqliteHistoryRecorder);
        let track = manager.create_track("Coast", 80.0, false).unwrap();
        manager.assign_group_to_track(class.id, track.reference.id).unwrap();
        manager.set_window(track.reference, None, None, false).unwrap();
        let ben = RiderFixture::create(conn, "Ben", class.id);
        (class, ben)
    };

    let report = applied(ingestor.ingest(&ben.ride(12.0, 1)).unwrap());
    assert!(report.goals_reached.is_empty());

    let conn = ingestor.connection();
    let status = GoalTrackStore::new(conn).travel_status(class.id).unwrap().unwrap();
    assert_eq!(status.current_distance, 0.0);
}
