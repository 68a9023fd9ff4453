//! Snapshot-aware totals.
//!
//! Snapshots mark the start of a period for a whole top group; the query
//! layer sums ledger entries after the active snapshot and a short-lived
//! cache sits in front of it for readers.

pub mod aggregate;
pub mod cache;
pub mod snapshot;

pub use aggregate::{PeriodTotals, TotalsEntity, TotalsQuery};
pub use cache::{CacheKey, InMemoryTotalsCache, TotalsCache, TotalsMap, TotalsReader};
pub use snapshot::{Snapshot, SnapshotIndex};
