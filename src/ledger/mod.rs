//! Distance ledger module.
//!
//! Hour-bucketed distance entries per (rider, device, hour). Entries grow
//! while their hour is open and are frozen once finalized.

pub mod store;
pub mod types;

pub use store::DistanceLedger;
pub use types::{hour_bucket, LedgerEntry};
