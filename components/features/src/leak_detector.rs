//! Leak detector: periodic DOM and handle scans of tracked targets

use crate::replace_setting;
use crate::targets::TrackedTargets;
use async_trait::async_trait;
use config_manager::{FeatureConfig, GlobalSettings};
use feature_runtime::{Feature, FeatureState};
use memory_profiler::{detect_leaks, DetectedLeak, LeakSignals, LeakThresholds, DOM_STATS_SCRIPT};
use parking_lot::RwLock;
use pressure_types::{MonitoredTarget, PlatformProbe, Result};
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const NAME: &str = "leakDetector";

#[derive(Debug, Clone)]
pub struct LeakDetectorSettings {
    pub scan_interval: Duration,
    pub thresholds: LeakThresholds,
}

impl Default for LeakDetectorSettings {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(5 * 60),
            thresholds: LeakThresholds::default(),
        }
    }
}

impl LeakDetectorSettings {
    pub fn from_config(feature: &FeatureConfig) -> Self {
        let defaults = Self::default();
        Self {
            scan_interval: feature
                .setting_u64("scanInterval")
                .map(|ms| Duration::from_millis(ms.max(1)))
                .unwrap_or(defaults.scan_interval),
            thresholds: defaults.thresholds,
        }
    }
}

struct LeakInner {
    state: Arc<FeatureState>,
    probe: Arc<dyn PlatformProbe>,
    thresholds: LeakThresholds,
    targets: TrackedTargets,
    /// Findings of the latest scan, by target label
    findings: RwLock<BTreeMap<String, Vec<DetectedLeak>>>,
}

impl LeakInner {
    async fn scan(&self) -> Vec<DetectedLeak> {
        let handles = self.probe.active_handles() as u64;
        let mut findings = BTreeMap::new();

        for target in self.targets.live() {
            let stats = match target.evaluate_script(DOM_STATS_SCRIPT).await {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(feature = NAME, target = %target.label(), error = %e, "DOM statistics unavailable");
                    continue;
                }
            };
            let signals = LeakSignals::default().with_dom_stats(&stats);
            let mut leaks = detect_leaks(&signals, &self.thresholds);
            for leak in &mut leaks {
                leak.location = Some(target.label());
            }
            findings.insert(target.label(), leaks);
        }

        // handles belong to the host, not to any one target
        let host = LeakSignals {
            active_handles: Some(handles),
            ..Default::default()
        };
        findings.insert(String::new(), detect_leaks(&host, &self.thresholds));

        let all: Vec<DetectedLeak> = findings.values().flatten().cloned().collect();
        if !all.is_empty() {
            info!(count = all.len(), "Potential leaks detected");
        }
        *self.findings.write() = findings;
        self.state.record_activation(0);
        all
    }
}

/// Periodically runs the leak heuristics against every tracked target
pub struct LeakDetectorFeature {
    inner: Arc<LeakInner>,
    scan_interval: RwLock<Duration>,
}

impl LeakDetectorFeature {
    pub fn new(probe: Arc<dyn PlatformProbe>, settings: LeakDetectorSettings) -> Self {
        Self {
            inner: Arc::new(LeakInner {
                state: FeatureState::new(NAME),
                probe,
                thresholds: settings.thresholds,
                targets: TrackedTargets::new(),
                findings: RwLock::new(BTreeMap::new()),
            }),
            scan_interval: RwLock::new(settings.scan_interval),
        }
    }

    /// Scan now; empty while disabled
    pub async fn scan_now(&self) -> Vec<DetectedLeak> {
        if !self.is_enabled() {
            return Vec::new();
        }
        self.inner.scan().await
    }

    /// Findings of the latest scan
    pub fn latest_leaks(&self) -> Vec<DetectedLeak> {
        self.inner
            .findings
            .read()
            .values()
            .flatten()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Feature for LeakDetectorFeature {
    fn state(&self) -> &Arc<FeatureState> {
        &self.inner.state
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn report_section(&self) -> Option<(String, Value)> {
        if !self.is_enabled() {
            return None;
        }
        let leaks = serde_json::to_value(self.latest_leaks()).ok()?;
        Some(("leaks".to_string(), leaks))
    }

    fn configure(&self, feature: &FeatureConfig, _global: &GlobalSettings) -> bool {
        let settings = LeakDetectorSettings::from_config(feature);
        replace_setting(&self.scan_interval, settings.scan_interval)
    }

    async fn on_enable(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let scan_interval = *self.scan_interval.read();
        self.inner.state.spawn_interval(scan_interval, move || {
            let inner = Arc::clone(&inner);
            async move {
                inner.scan().await;
            }
        });
        Ok(())
    }

    async fn on_disable(&self) -> Result<()> {
        self.inner.findings.write().clear();
        Ok(())
    }

    async fn on_apply_to_target(&self, target: Arc<dyn MonitoredTarget>) -> Result<()> {
        self.inner.targets.track(&target);
        Ok(())
    }
}
