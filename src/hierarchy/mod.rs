//! Group hierarchy module.
//!
//! Groups form a tree (school → class); riders belong to one or more
//! groups and report through devices.

pub mod directory;
pub mod tree;
pub mod types;

// Re-exports for convenience
pub use directory::GroupDirectory;
pub use tree::GroupHierarchy;
pub use types::{Device, Group, Rider};
