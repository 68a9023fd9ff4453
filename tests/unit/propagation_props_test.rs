//! Property tests for distance totals across a group tree.
//!
//! Totals are uncapped, match the deltas applied in each subtree and
//! never decrease.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use proptest::sample::Index;
use rideledger::goals::GoalManager;
use rideledger::hierarchy::{GroupDirectory, GroupHierarchy};
use rideledger::history::SqliteHistoryRecorder;
use rideledger::progress::ProgressPropagator;
use rideledger::Database;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn totals_equal_sum_of_subtree_deltas(
        parents in prop::collection::vec(any::<Index>(), 1..8),
        steps in prop::collection::vec((any::<Index>(), 0.01f64..40.0), 1..30),
    ) {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let dir = GroupDirectory::new(conn);
        let now = Utc.with_ymd_and_hms(2025, 5, 5, 8, 0, 0).unwrap();

        // Node 0 is the root, every later node hangs below an earlier one
        let mut ids = vec![dir.create_group("root", None).unwrap().id];
        let mut parent_of = vec![None];
        for (i, pick) in parents.iter().enumerate() {
            let parent = pick.index(ids.len());
            let group = dir
                .create_group(&format!("g{}", i + 1), Some(ids[parent]))
                .unwrap();
            ids.push(group.id);
            parent_of.push(Some(parent));
        }

        // A capped track on the root must not cap the totals
        let manager = GoalManager::new(conn, &SqliteHistoryRecorder);
        let track = manager.create_track("Loop", 50.0, false).unwrap();
        manager.assign_group_to_track(ids[0], track.reference.id).unwrap();

        let propagator = ProgressPropagator::new(conn, &SqliteHistoryRecorder);
        let tree = GroupHierarchy::new(conn);
        let mut expected = vec![0.0f64; ids.len()];
        let mut previous = vec![0.0f64; ids.len()];

        for (pick, delta) in steps {
            let target = pick.index(ids.len());
            propagator.apply_delta(ids[target], delta, now).unwrap();

            let mut node = Some(target);
            while let Some(n) = node {
                expected[n] += delta;
                node = parent_of[n];
            }

            for (n, id) in ids.iter().enumerate() {
                let total = tree.group(*id).unwrap().unwrap().distance_total;
                prop_assert!(
                    (total - expected[n]).abs() < 1e-6,
                    "group {} has {} but its subtree received {}",
                    n,
                    total,
                    expected[n]
                );
                prop_assert!(total >= previous[n]);
                previous[n] = total;
            }
        }
    }
}
