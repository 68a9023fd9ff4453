//! Property tests for capped goal counters.

use proptest::prelude::*;
use rideledger::goals::advance;

proptest! {
    #[test]
    fn counter_never_exceeds_target(
        target in 1.0f64..500.0,
        deltas in prop::collection::vec(0.0f64..80.0, 1..40),
    ) {
        let mut current = 0.0;
        let mut reached = 0;
        for delta in deltas {
            if let Some(step) = advance(current, delta, Some(target)) {
                prop_assert!(step.new_distance <= target);
                prop_assert!(step.new_distance >= current);
                prop_assert!((step.applied - (step.new_distance - current)).abs() < 1e-9);
                if step.first_reached {
                    reached += 1;
                }
                current = step.new_distance;
            }
        }
        // The target is reported as reached at most once
        prop_assert!(reached <= 1);
    }

    #[test]
    fn capped_sum_matches_min_of_total_and_target(
        target in 1.0f64..300.0,
        deltas in prop::collection::vec(0.01f64..50.0, 1..30),
    ) {
        let mut current = 0.0;
        for delta in &deltas {
            if let Some(step) = advance(current, *delta, Some(target)) {
                current = step.new_distance;
            }
        }
        let expected = deltas.iter().sum::<f64>().min(target);
        prop_assert!((current - expected).abs() < 1e-6);
    }

    #[test]
    fn non_positive_deltas_change_nothing(
        current in 0.0f64..100.0,
        delta in -100.0f64..=0.0,
    ) {
        prop_assert!(advance(current, delta, Some(100.0)).is_none());
        prop_assert!(advance(current, delta, None).is_none());
    }
}

#[test]
fn test_reached_counter_stays_put() {
    assert!(advance(100.0, 5.0, Some(100.0)).is_none());
    let step = advance(99.5, 5.0, Some(100.0)).unwrap();
    assert_eq!(step.applied, 0.5);
    assert!(step.first_reached);
}
