//! Smart cleanup: frees caches and storage of pressured targets

use crate::scripts::CLEANUP_SCRIPT;
use crate::replace_setting;
use crate::targets::TrackedTargets;
use async_trait::async_trait;
use config_manager::{FeatureConfig, GlobalSettings};
use feature_runtime::{Feature, FeatureState};
use parking_lot::RwLock;
use pressure_types::{
    now_millis, Intervention, MonitoredTarget, PressureAlert, Result, RiskLevel,
};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const NAME: &str = "smartCleanup";

#[derive(Debug, Clone, PartialEq)]
pub struct SmartCleanupSettings {
    pub cleanup_interval: Duration,
}

impl Default for SmartCleanupSettings {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(15 * 60),
        }
    }
}

impl SmartCleanupSettings {
    pub fn from_config(feature: &FeatureConfig) -> Self {
        let defaults = Self::default();
        Self {
            cleanup_interval: feature
                .setting_u64("cleanupInterval")
                .map(|ms| Duration::from_millis(ms.max(1)))
                .unwrap_or(defaults.cleanup_interval),
        }
    }
}

struct CleanupInner {
    state: Arc<FeatureState>,
    targets: TrackedTargets,
}

impl CleanupInner {
    /// Clear storage and run the cleanup script; returns the bytes reported freed
    async fn clean(&self, target: &dyn MonitoredTarget) -> Result<u64> {
        target.clear_storage().await?;
        let outcome = target.evaluate_script(CLEANUP_SCRIPT).await?;
        let freed = outcome
            .get("freedBytes")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        self.state.record_activation(freed);
        debug!(target = %target.label(), freed, "Target cleaned");
        Ok(freed)
    }

    /// Clean every live target, logging failures per target
    async fn clean_all(&self) {
        for target in self.targets.live() {
            if let Err(e) = self.clean(target.as_ref()).await {
                warn!(feature = NAME, target = %target.label(), error = %e, "Cleanup failed");
            }
        }
    }
}

/// Clears storage and caches on pressure, on a timer and before sleep
pub struct SmartCleanupFeature {
    inner: Arc<CleanupInner>,
    settings: RwLock<SmartCleanupSettings>,
}

impl SmartCleanupFeature {
    pub fn new(settings: SmartCleanupSettings) -> Self {
        Self {
            inner: Arc::new(CleanupInner {
                state: FeatureState::new(NAME),
                targets: TrackedTargets::new(),
            }),
            settings: RwLock::new(settings),
        }
    }

    /// Clean every tracked target now
    pub async fn clean_now(&self) {
        if self.is_enabled() {
            self.inner.clean_all().await;
        }
    }
}

#[async_trait]
impl Feature for SmartCleanupFeature {
    fn state(&self) -> &Arc<FeatureState> {
        &self.inner.state
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn configure(&self, feature: &FeatureConfig, _global: &GlobalSettings) -> bool {
        replace_setting(&self.settings, SmartCleanupSettings::from_config(feature))
    }

    async fn on_enable(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let cleanup_interval = self.settings.read().cleanup_interval;
        self.inner
            .state
            .spawn_interval(cleanup_interval, move || {
                let inner = Arc::clone(&inner);
                async move {
                    inner.clean_all().await;
                }
            });
        Ok(())
    }

    async fn on_apply_to_target(&self, target: Arc<dyn MonitoredTarget>) -> Result<()> {
        self.inner.targets.track(&target);
        Ok(())
    }

    async fn on_system_sleep(&self) -> Result<()> {
        self.inner.clean_all().await;
        Ok(())
    }

    async fn on_pressure(
        &self,
        target: Arc<dyn MonitoredTarget>,
        alert: &PressureAlert,
    ) -> Result<Option<Intervention>> {
        if alert.risk < RiskLevel::High || !target.is_alive() {
            return Ok(None);
        }
        let freed = self.inner.clean(target.as_ref()).await?;
        Ok(Some(Intervention {
            timestamp: now_millis(),
            feature: NAME.to_string(),
            target: target.label(),
            action: "cleanup".to_string(),
            memory_saved: freed,
        }))
    }
}
