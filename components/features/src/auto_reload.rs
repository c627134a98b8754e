//! Auto reload: reloads targets at critical pressure, with a per-target cooldown

use crate::replace_setting;
use async_trait::async_trait;
use config_manager::{FeatureConfig, GlobalSettings};
use feature_runtime::{Feature, FeatureState};
use parking_lot::{Mutex, RwLock};
use pressure_types::{
    now_millis, Intervention, MonitoredTarget, PressureAlert, Result, RiskLevel,
};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

pub const NAME: &str = "autoReload";

#[derive(Debug, Clone, PartialEq)]
pub struct AutoReloadSettings {
    /// Minimum time between two reloads of the same target
    pub cooldown: Duration,
}

impl Default for AutoReloadSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(10 * 60),
        }
    }
}

impl AutoReloadSettings {
    pub fn from_config(feature: &FeatureConfig) -> Self {
        match feature.setting_u64("cooldownMinutes") {
            Some(minutes) => Self {
                cooldown: Duration::from_secs(minutes * 60),
            },
            None => Self::default(),
        }
    }
}

pub struct AutoReloadFeature {
    state: Arc<FeatureState>,
    settings: RwLock<AutoReloadSettings>,
    last_reload: Mutex<HashMap<u64, Instant>>,
}

impl AutoReloadFeature {
    pub fn new(settings: AutoReloadSettings) -> Self {
        Self {
            state: FeatureState::new(NAME),
            settings: RwLock::new(settings),
            last_reload: Mutex::new(HashMap::new()),
        }
    }

    fn in_cooldown(&self, target_id: u64) -> bool {
        let cooldown = self.settings.read().cooldown;
        self.last_reload
            .lock()
            .get(&target_id)
            .map_or(false, |at| at.elapsed() < cooldown)
    }
}

#[async_trait]
impl Feature for AutoReloadFeature {
    fn state(&self) -> &Arc<FeatureState> {
        &self.state
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn configure(&self, feature: &FeatureConfig, _global: &GlobalSettings) -> bool {
        replace_setting(&self.settings, AutoReloadSettings::from_config(feature))
    }

    async fn on_disable(&self) -> Result<()> {
        self.last_reload.lock().clear();
        Ok(())
    }

    async fn on_pressure(
        &self,
        target: Arc<dyn MonitoredTarget>,
        alert: &PressureAlert,
    ) -> Result<Option<Intervention>> {
        if alert.risk < RiskLevel::Critical || !target.is_alive() {
            return Ok(None);
        }
        if self.in_cooldown(target.id()) {
            debug!(target = %target.label(), "Reload skipped, target in cooldown");
            return Ok(None);
        }

        target.reload().await?;
        self.last_reload.lock().insert(target.id(), Instant::now());
        self.state.record_activation(alert.current_memory);
        info!(target = %target.label(), memory = alert.current_memory, "Target reloaded");

        Ok(Some(Intervention {
            timestamp: now_millis(),
            feature: NAME.to_string(),
            target: target.label(),
            action: "reload".to_string(),
            memory_saved: alert.current_memory,
        }))
    }
}
