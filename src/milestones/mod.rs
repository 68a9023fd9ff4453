//! Milestones module.
//!
//! Ordered distance thresholds on travel tracks, won once per run by a
//! leaf group, plus the achievements that outlive restarts.

pub mod achievements;
pub mod attributor;
pub mod locks;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use achievements::AchievementStore;
pub use attributor::MilestoneAttributor;
pub use locks::{LockPolicy, RecordGuard, RecordLocks};
pub use store::MilestoneStore;
pub use types::{Achievement, Milestone, MilestoneAward};
