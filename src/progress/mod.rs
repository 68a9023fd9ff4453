//! Progress module.
//!
//! The write path: measurements enter through the ingestor, land in the
//! ledger and are propagated up the group tree in one transaction.

pub mod ingest;
pub mod propagator;
pub mod retry;

pub use ingest::{HourTotal, IngestOutcome, IngestReport, Ingestor, Measurement};
pub use propagator::{ProgressPropagator, PropagationReport};
pub use retry::RetryPolicy;
