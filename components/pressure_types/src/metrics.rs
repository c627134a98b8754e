//! Metrics, risk levels and pressure events shared between components

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall clock time in milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Self-reported metrics of a single feature
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureMetrics {
    /// Number of times the feature did work
    pub activations: u64,
    /// Estimated bytes freed by the feature
    pub memory_saved: u64,
    /// Timestamp (ms) of the last activation
    pub last_run: Option<u64>,
}

/// Metrics aggregated over every registered feature
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateMetrics {
    /// Sum of `memory_saved`
    pub total_memory_saved: u64,
    /// Sum of `activations`
    pub total_activations: u64,
    /// Most recent `last_run`
    pub last_run: Option<u64>,
    /// Number of enabled features
    pub enabled_features: usize,
}

impl AggregateMetrics {
    /// Fold one feature's metrics into the aggregate
    pub fn absorb(&mut self, metrics: &FeatureMetrics, enabled: bool) {
        self.total_memory_saved = self.total_memory_saved.saturating_add(metrics.memory_saved);
        self.total_activations = self.total_activations.saturating_add(metrics.activations);
        self.last_run = match (self.last_run, metrics.last_run) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if enabled {
            self.enabled_features += 1;
        }
    }
}

/// Ordinal classification of imminent memory exhaustion
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Raised by the monitor when a target reaches `high` or `critical` risk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PressureAlert {
    pub target_id: u64,
    pub target_label: String,
    pub risk: RiskLevel,
    pub current_memory: u64,
    pub predicted_memory: Option<u64>,
    pub time_to_limit_ms: Option<u64>,
    pub recommendation: String,
    pub timestamp: u64,
}

/// A mitigation a feature performed against a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intervention {
    pub timestamp: u64,
    pub feature: String,
    pub target: String,
    pub action: String,
    pub memory_saved: u64,
}
