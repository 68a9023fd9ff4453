//! RideLedger - hierarchical cycling distance ledger
//!
//! Records per-rider, per-device distance increments, propagates them up a
//! tree of groups, advances capped goals on travel tracks and events,
//! attributes track milestones to the leading leaf group exactly once and
//! serves snapshot-aware totals behind a short-lived cache.

pub mod clock;
pub mod error;
pub mod goals;
pub mod hierarchy;
pub mod history;
pub mod ledger;
pub mod milestones;
pub mod notify;
pub mod progress;
pub mod storage;
pub mod totals;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::TrackingError;
pub use goals::{ContextRef, GoalManager};
pub use hierarchy::{GroupDirectory, GroupHierarchy};
pub use milestones::{AchievementStore, MilestoneAttributor, RecordLocks};
pub use notify::{ChannelListener, RiderTotals, RiderTotalsListener};
pub use progress::{IngestOutcome, Ingestor, Measurement, ProgressPropagator, RetryPolicy};
pub use storage::{AppConfig, Database};
pub use totals::{InMemoryTotalsCache, SnapshotIndex, TotalsEntity, TotalsReader};
