//! Feature coordination for the memory-pressure subsystem
//!
//! The [`FeatureCoordinator`] owns the registered features and the tracked
//! targets, fans lifecycle events out to the features in priority order, routes
//! pressure alerts to mitigation features, and assembles reports and CSV exports.

mod coordinator;
mod report;

pub use coordinator::FeatureCoordinator;
pub use report::{metrics_csv, FeatureReport, MemoryReport, WebContentsEntry, CSV_HEADER};
