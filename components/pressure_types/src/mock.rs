//! Mock target and probe implementations for testing
//!
//! Provide a simulated host so the coordinator, features and profiler can be
//! exercised without a real content process.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::{
    CapturedSnapshot, HeapUsage, MemoryError, MonitoredTarget, PlatformProbe, ProcessKind,
    ProcessMetric, Result, SnapshotKind,
};

/// Mock monitored target that records every command it receives
pub struct MockTarget {
    id: u64,
    label: String,
    alive: AtomicBool,
    fail_commands: AtomicBool,
    reloads: AtomicU32,
    storage_clears: AtomicU32,
    scripts: Mutex<Vec<String>>,
    /// (substring of script, canned result)
    responses: Mutex<Vec<(String, Value)>>,
}

impl MockTarget {
    /// Create a live mock target
    pub fn new(id: u64, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            alive: AtomicBool::new(true),
            fail_commands: AtomicBool::new(false),
            reloads: AtomicU32::new(0),
            storage_clears: AtomicU32::new(0),
            scripts: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
        }
    }

    /// Mark the target as destroyed
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Make every command fail with a target error
    pub fn set_failing(&self, failing: bool) {
        self.fail_commands.store(failing, Ordering::SeqCst);
    }

    /// Return `result` for any script containing `pattern`
    pub fn respond_to(&self, pattern: impl Into<String>, result: Value) {
        self.responses.lock().push((pattern.into(), result));
    }

    /// Number of reloads received
    pub fn reload_count(&self) -> u32 {
        self.reloads.load(Ordering::SeqCst)
    }

    /// Number of storage clears received
    pub fn storage_clear_count(&self) -> u32 {
        self.storage_clears.load(Ordering::SeqCst)
    }

    /// Scripts evaluated so far, oldest first
    pub fn evaluated_scripts(&self) -> Vec<String> {
        self.scripts.lock().clone()
    }

    fn check_failing(&self) -> Result<()> {
        if self.fail_commands.load(Ordering::SeqCst) {
            Err(MemoryError::Target(format!("{} rejected the command", self.label)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MonitoredTarget for MockTarget {
    fn id(&self) -> u64 {
        self.id
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn evaluate_script(&self, script: &str) -> Result<Value> {
        self.check_failing()?;
        self.scripts.lock().push(script.to_string());
        let responses = self.responses.lock();
        Ok(responses
            .iter()
            .find(|(pattern, _)| script.contains(pattern.as_str()))
            .map(|(_, value)| value.clone())
            .unwrap_or(Value::Null))
    }

    async fn reload(&self) -> Result<()> {
        self.check_failing()?;
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear_storage(&self) -> Result<()> {
        self.check_failing()?;
        self.storage_clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock platform probe with settable metrics
pub struct MockProbe {
    processes: RwLock<Vec<ProcessMetric>>,
    heap: RwLock<HeapUsage>,
    handles: AtomicUsize,
    snapshot_size: AtomicU64,
    snapshot_objects: AtomicU64,
    snapshots_taken: AtomicU32,
    fail_snapshots: AtomicBool,
    evaluations: RwLock<HashMap<u64, Value>>,
}

impl MockProbe {
    /// Create a probe reporting no processes and an empty heap
    pub fn new() -> Self {
        Self {
            processes: RwLock::new(Vec::new()),
            heap: RwLock::new(HeapUsage::default()),
            handles: AtomicUsize::new(0),
            snapshot_size: AtomicU64::new(1024 * 1024),
            snapshot_objects: AtomicU64::new(1000),
            snapshots_taken: AtomicU32::new(0),
            fail_snapshots: AtomicBool::new(false),
            evaluations: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the process list
    pub fn set_processes(&self, processes: Vec<ProcessMetric>) {
        *self.processes.write() = processes;
    }

    /// Report a renderer process for `target_id` using `bytes` of memory
    pub fn set_target_memory(&self, target_id: u64, bytes: u64) {
        let mut processes = self.processes.write();
        processes.retain(|p| p.associated_target_id != Some(target_id));
        processes.push(ProcessMetric {
            process_id: 1000 + target_id as u32,
            kind: ProcessKind::Renderer,
            pid: 20_000 + target_id as u32,
            resident_memory_bytes: bytes,
            cpu_percent: 0.0,
            associated_target_id: Some(target_id),
        });
    }

    /// Set the host heap statistics
    pub fn set_heap_usage(&self, heap: HeapUsage) {
        *self.heap.write() = heap;
    }

    /// Set the number of active platform handles
    pub fn set_active_handles(&self, handles: usize) {
        self.handles.store(handles, Ordering::SeqCst);
    }

    /// Set the size and object count of subsequent snapshots
    pub fn set_snapshot(&self, size_bytes: u64, object_count: u64) {
        self.snapshot_size.store(size_bytes, Ordering::SeqCst);
        self.snapshot_objects.store(object_count, Ordering::SeqCst);
    }

    /// Make snapshot capture fail
    pub fn set_snapshot_failure(&self, fail: bool) {
        self.fail_snapshots.store(fail, Ordering::SeqCst);
    }

    /// Number of snapshots captured so far
    pub fn snapshots_taken(&self) -> u32 {
        self.snapshots_taken.load(Ordering::SeqCst)
    }

    /// Result returned by `evaluate` for a target
    pub fn set_evaluation(&self, target_id: u64, value: Value) {
        self.evaluations.write().insert(target_id, value);
    }
}

impl Default for MockProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformProbe for MockProbe {
    fn list_processes(&self) -> Vec<ProcessMetric> {
        self.processes.read().clone()
    }

    fn heap_usage(&self) -> HeapUsage {
        *self.heap.read()
    }

    fn active_handles(&self) -> usize {
        self.handles.load(Ordering::SeqCst)
    }

    async fn capture_heap_snapshot(&self, target_id: Option<u64>) -> Result<CapturedSnapshot> {
        if self.fail_snapshots.load(Ordering::SeqCst) {
            return Err(MemoryError::Snapshot("mock snapshot failure".to_string()));
        }
        self.snapshots_taken.fetch_add(1, Ordering::SeqCst);
        Ok(CapturedSnapshot {
            process_id: target_id.map(|id| 1000 + id as u32).unwrap_or(1),
            kind: if target_id.is_some() {
                SnapshotKind::Renderer
            } else {
                SnapshotKind::Main
            },
            size_bytes: self.snapshot_size.load(Ordering::SeqCst),
            object_count: Some(self.snapshot_objects.load(Ordering::SeqCst)),
            storage_path: None,
        })
    }

    async fn evaluate(&self, target_id: u64, _script: &str) -> Result<Value> {
        self.evaluations
            .read()
            .get(&target_id)
            .cloned()
            .ok_or_else(|| MemoryError::Target(format!("unknown target {}", target_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_target_records_commands() {
        let target = MockTarget::new(1, "https://chat.example.com");
        target.respond_to("nodes", json!({"nodes": 10}));

        let result = target.evaluate_script("count nodes").await.unwrap();
        assert_eq!(result["nodes"], 10);
        assert_eq!(target.evaluate_script("other").await.unwrap(), Value::Null);

        target.reload().await.unwrap();
        target.clear_storage().await.unwrap();
        assert_eq!(target.reload_count(), 1);
        assert_eq!(target.storage_clear_count(), 1);
        assert_eq!(target.evaluated_scripts().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_target_failure_and_liveness() {
        let target = MockTarget::new(2, "b");
        assert!(target.is_alive());
        target.kill();
        assert!(!target.is_alive());

        target.set_failing(true);
        assert!(target.reload().await.is_err());
        assert_eq!(target.reload_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_probe_target_memory() {
        let probe = MockProbe::new();
        probe.set_target_memory(4, 100);
        probe.set_target_memory(4, 200);

        let processes = probe.list_processes();
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].resident_memory_bytes, 200);

        probe.set_snapshot_failure(true);
        assert!(probe.capture_heap_snapshot(None).await.is_err());
        assert_eq!(probe.snapshots_taken(), 0);
    }
}
