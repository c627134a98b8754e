//! Shared types for the memory-pressure subsystem
//!
//! Contains the error taxonomy, the capability traits the host implements
//! ([`MonitoredTarget`], [`PlatformProbe`]), feature metrics, risk levels and
//! pressure events, plus mock implementations used throughout the test suites.

mod errors;
mod metrics;
mod probe;
mod target;

pub mod mock;

pub use errors::{MemoryError, Result};
pub use metrics::{
    now_millis, AggregateMetrics, FeatureMetrics, Intervention, PressureAlert, RiskLevel,
};
pub use probe::{
    CapturedSnapshot, HeapUsage, PlatformProbe, ProcessKind, ProcessMetric, SnapshotKind,
};
pub use target::MonitoredTarget;

/// Bytes in one mebibyte
pub const MB: u64 = 1024 * 1024;

/// Bytes in one gibibyte
pub const GB: u64 = 1024 * MB;
