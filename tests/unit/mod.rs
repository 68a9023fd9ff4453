//! Unit test modules.

mod capping_test;
mod ingest_test;
mod propagation_props_test;
mod totals_reader_test;
