//! Capability contract for monitored targets
//!
//! A monitored target is one externally owned content instance (one server tab).
//! The host owns the handle; this subsystem only keeps `Weak` references to it.

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

/// Trait implemented by the host for every monitored target
#[async_trait]
pub trait MonitoredTarget: Send + Sync {
    /// Host-assigned numeric id, used to match process metrics
    fn id(&self) -> u64;

    /// Label or URL the target is registered under
    fn label(&self) -> String;

    /// Whether the target still exists and can accept commands
    fn is_alive(&self) -> bool;

    /// Evaluate a script inside the target and return its JSON result
    async fn evaluate_script(&self, script: &str) -> Result<Value>;

    /// Reload the target
    async fn reload(&self) -> Result<()>;

    /// Clear cached storage (HTTP cache, service worker caches) of the target
    async fn clear_storage(&self) -> Result<()>;
}
