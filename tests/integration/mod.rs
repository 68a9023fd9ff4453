//! Integration test modules.

mod fixtures;
mod milestone_race_test;
mod propagation_test;
mod restart_test;
