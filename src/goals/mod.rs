//! Goal tracking module.
//!
//! Travel tracks and distance events share one capped-counter model:
//! - Per-group goal statuses that never exceed the target
//! - Leaf contributions toward a parent's shared goal
//! - Track and event administration (windows, assignment, restarts)

pub mod contribution;
pub mod manager;
pub mod track;
pub mod types;

// Re-exports for convenience
pub use contribution::{ContributionUpdate, LeafContribution, LeafContributionTracker};
pub use manager::GoalManager;
pub use track::GoalTrackStore;
pub use types::{
    advance, Advance, ContextKind, ContextRef, GoalContext, GoalOutcome, GoalStatus, GoalWindow,
};
