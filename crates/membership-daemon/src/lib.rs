//! membership-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod replay;
pub mod report;

pub use replay::{feed, load_events, parse_events, ReplayError, ViewEvent};
pub use report::ClusterReport;
