//! Profiling samples, snapshots and the finished report

use crate::leaks::DetectedLeak;
use pressure_types::{CapturedSnapshot, SnapshotKind, MB};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Growth above which a session is flagged for leak review
const SESSION_GROWTH_LIMIT: i64 = 50 * MB as i64;
/// Mean fragmentation above which allocations should be optimized
const FRAGMENTATION_LIMIT: f64 = 0.3;
/// Snapshot growth worth a recommendation
const SNAPSHOT_GROWTH_LIMIT: i64 = 10 * MB as i64;
/// Object count delta worth a recommendation
const OBJECT_DELTA_LIMIT: u64 = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub object_count: u64,
}

/// A heap snapshot taken during a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeapSnapshot {
    pub timestamp: u64,
    pub process_id: u32,
    pub kind: SnapshotKind,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SnapshotSummary>,
}

impl HeapSnapshot {
    pub fn from_captured(captured: CapturedSnapshot, timestamp: u64) -> Self {
        Self {
            timestamp,
            process_id: captured.process_id,
            kind: captured.kind,
            size_bytes: captured.size_bytes,
            storage_path: captured.storage_path,
            summary: captured
                .object_count
                .map(|object_count| SnapshotSummary { object_count }),
        }
    }

    fn object_count(&self) -> u64 {
        self.summary.as_ref().map_or(0, |s| s.object_count)
    }
}

/// One allocation sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationProfile {
    pub timestamp: u64,
    pub heap_used: u64,
    pub heap_total: u64,
    /// Change in `heap_used` since the previous sample
    pub delta: i64,
    /// Bytes live on the heap at sample time
    pub net_allocations: u64,
    /// `external / heap_total`
    pub fragmentation_ratio: f64,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub initial_memory: u64,
    pub final_memory: u64,
    pub peak_memory: u64,
    pub memory_growth: i64,
    /// Mean of sampled net allocations
    pub average_memory: f64,
    /// Mean fragmentation ratio across samples
    pub fragmentation_level: f64,
    /// Samples where the heap shrank
    pub gc_collections: u64,
    pub leak_count: usize,
}

/// Immutable report of a finished profiling session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryProfile {
    pub session_id: String,
    pub start_time: u64,
    pub end_time: u64,
    pub duration_ms: u64,
    pub snapshots: Vec<HeapSnapshot>,
    pub allocation_profiles: Vec<AllocationProfile>,
    pub leaks: Vec<DetectedLeak>,
    pub summary: ProfileSummary,
    pub recommendation: String,
}

impl ProfileSummary {
    pub fn compute(
        initial_memory: u64,
        final_memory: u64,
        peak_memory: u64,
        samples: &[AllocationProfile],
        leak_count: usize,
    ) -> Self {
        Self {
            initial_memory,
            final_memory,
            peak_memory: peak_memory.max(final_memory),
            memory_growth: final_memory as i64 - initial_memory as i64,
            average_memory: mean(samples.iter().map(|s| s.net_allocations as f64)),
            fragmentation_level: mean(samples.iter().map(|s| s.fragmentation_ratio)),
            gc_collections: samples.iter().filter(|s| s.delta < 0).count() as u64,
            leak_count,
        }
    }

    /// Advice by fixed precedence: growth, then leaks, then fragmentation
    pub fn recommendation(&self) -> String {
        if self.memory_growth > SESSION_GROWTH_LIMIT {
            format!(
                "Memory grew by {:.1} MB during profiling; review for leaks",
                self.memory_growth as f64 / MB as f64
            )
        } else if self.leak_count > 0 {
            format!(
                "{} potential leak{} detected; review the leak report",
                self.leak_count,
                if self.leak_count == 1 { "" } else { "s" }
            )
        } else if self.fragmentation_level > FRAGMENTATION_LIMIT {
            "Heap fragmentation is high; optimize allocations".to_string()
        } else {
            "Memory usage looks normal".to_string()
        }
    }
}

/// Difference between two snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotComparison {
    pub growth: i64,
    pub new_objects: u64,
    pub deleted_objects: u64,
    pub recommendations: Vec<String>,
}

/// Compare `before` against `after`
pub fn compare_snapshots(before: &HeapSnapshot, after: &HeapSnapshot) -> SnapshotComparison {
    let growth = after.size_bytes as i64 - before.size_bytes as i64;
    let (old, new) = (before.object_count(), after.object_count());
    let new_objects = new.saturating_sub(old);
    let deleted_objects = old.saturating_sub(new);

    let mut recommendations = Vec::new();
    if growth > SNAPSHOT_GROWTH_LIMIT {
        recommendations.push(format!(
            "Heap grew by {:.1} MB between snapshots; check for retained objects",
            growth as f64 / MB as f64
        ));
    }
    if new_objects > OBJECT_DELTA_LIMIT {
        recommendations.push(format!(
            "{} new objects since the first snapshot; look for unbounded caches or collections",
            new_objects
        ));
    }
    if deleted_objects > OBJECT_DELTA_LIMIT {
        recommendations.push(format!(
            "{} objects released since the first snapshot; large churn can hide retained garbage",
            deleted_objects
        ));
    }

    SnapshotComparison {
        growth,
        new_objects,
        deleted_objects,
        recommendations,
    }
}
