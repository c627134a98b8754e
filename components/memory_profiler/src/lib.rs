//! On-demand memory profiling
//!
//! A [`Profiler`] runs time-boxed sessions that sample heap statistics on an
//! interval, optionally capture heap snapshots, and finish with a set of leak
//! heuristics. Each session ends in an immutable [`MemoryProfile`].

mod leaks;
mod profiler;
mod report;

pub use leaks::{
    detect_leaks, DetectedLeak, LeakSeverity, LeakSignals, LeakThresholds, LeakType, Threshold,
    DOM_STATS_SCRIPT,
};
pub use profiler::{Profiler, ProfilingOptions};
pub use report::{
    compare_snapshots, AllocationProfile, HeapSnapshot, MemoryProfile, ProfileSummary,
    SnapshotComparison, SnapshotSummary,
};
