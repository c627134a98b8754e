//! Platform probe abstraction
//!
//! Everything platform-specific (process metrics, heap statistics, heap snapshots)
//! goes through [`PlatformProbe`], so the core logic never calls platform APIs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::Result;

/// Kind of process reported by the metrics source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    /// Host (main) process
    Browser,
    /// Content process backing one or more targets
    Renderer,
    /// GPU process
    Gpu,
    /// Utility/helper process
    Utility,
    /// Anything else
    Other,
}

impl std::fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Browser => write!(f, "browser"),
            Self::Renderer => write!(f, "renderer"),
            Self::Gpu => write!(f, "gpu"),
            Self::Utility => write!(f, "utility"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// One entry of the process-wide metrics list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMetric {
    /// Host-level process identifier
    pub process_id: u32,
    /// Process kind
    pub kind: ProcessKind,
    /// OS process id
    pub pid: u32,
    /// Resident set size in bytes
    pub resident_memory_bytes: u64,
    /// CPU usage in percent of one core
    #[serde(default)]
    pub cpu_percent: f64,
    /// Target rendered by this process, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub associated_target_id: Option<u64>,
}

/// Heap statistics of the host script environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeapUsage {
    /// Bytes currently used by the heap
    pub heap_used: u64,
    /// Bytes reserved for the heap
    pub heap_total: u64,
    /// Bytes held outside the heap (buffers, native objects)
    pub external: u64,
}

impl HeapUsage {
    /// Ratio of external memory to the reserved heap, 0 when the heap is empty
    pub fn fragmentation_ratio(&self) -> f64 {
        if self.heap_total == 0 {
            0.0
        } else {
            self.external as f64 / self.heap_total as f64
        }
    }
}

/// Process that a heap snapshot was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    /// Host process
    Main,
    /// Content process of a target
    Renderer,
}

/// Raw result of a heap snapshot capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedSnapshot {
    /// Process the snapshot was taken from
    pub process_id: u32,
    /// Main or renderer
    pub kind: SnapshotKind,
    /// Snapshot size in bytes
    pub size_bytes: u64,
    /// Number of heap objects, when the probe can count them
    pub object_count: Option<u64>,
    /// Where the probe stored the snapshot, if it was written to disk
    pub storage_path: Option<PathBuf>,
}

/// Platform binding supplied by the host at start-up
#[async_trait]
pub trait PlatformProbe: Send + Sync {
    /// Current process metrics
    fn list_processes(&self) -> Vec<ProcessMetric>;

    /// Current heap statistics of the host
    fn heap_usage(&self) -> HeapUsage;

    /// Number of active platform handles (timers, sockets)
    fn active_handles(&self) -> usize;

    /// Capture a heap snapshot of a target (or of the host when `None`)
    async fn capture_heap_snapshot(&self, target_id: Option<u64>) -> Result<CapturedSnapshot>;

    /// Evaluate a script in a target by id
    async fn evaluate(&self, target_id: u64, script: &str) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragmentation_ratio() {
        let usage = HeapUsage {
            heap_used: 50,
            heap_total: 100,
            external: 25,
        };
        assert!((usage.fragmentation_ratio() - 0.25).abs() < f64::EPSILON);
        assert_eq!(HeapUsage::default().fragmentation_ratio(), 0.0);
    }

    #[test]
    fn test_process_metric_serialization() {
        let metric = ProcessMetric {
            process_id: 7,
            kind: ProcessKind::Renderer,
            pid: 4242,
            resident_memory_bytes: 1024,
            cpu_percent: 1.5,
            associated_target_id: Some(3),
        };

        let json = serde_json::to_value(&metric).unwrap();
        assert_eq!(json["processId"], 7);
        assert_eq!(json["kind"], "renderer");
        assert_eq!(json["residentMemoryBytes"], 1024);
        assert_eq!(json["associatedTargetId"], 3);
    }
}
