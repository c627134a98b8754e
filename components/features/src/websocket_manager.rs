//! WebSocket manager: pauses sockets across system sleep

use crate::scripts::{SOCKET_PAUSE_SCRIPT, SOCKET_RECONNECT_SCRIPT, SOCKET_TRACKING_SCRIPT};
use crate::replace_setting;
use crate::targets::TrackedTargets;
use async_trait::async_trait;
use config_manager::{FeatureConfig, GlobalSettings};
use feature_runtime::{Feature, FeatureState};
use parking_lot::RwLock;
use pressure_types::{MonitoredTarget, Result};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, warn};

pub const NAME: &str = "websocketManager";

#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketSettings {
    pub reconnect_on_resume: bool,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            reconnect_on_resume: true,
        }
    }
}

impl WebSocketSettings {
    pub fn from_config(feature: &FeatureConfig) -> Self {
        Self {
            reconnect_on_resume: feature.setting_bool("reconnectOnResume").unwrap_or(true),
        }
    }
}

pub struct WebSocketManagerFeature {
    state: Arc<FeatureState>,
    settings: RwLock<WebSocketSettings>,
    targets: TrackedTargets,
}

impl WebSocketManagerFeature {
    pub fn new(settings: WebSocketSettings) -> Self {
        Self {
            state: FeatureState::new(NAME),
            settings: RwLock::new(settings),
            targets: TrackedTargets::new(),
        }
    }

    /// Evaluate `script` in every live target and sum the numeric `field` it returns
    async fn run_everywhere(&self, script: &str, field: &str) -> u64 {
        let mut total = 0;
        for target in self.targets.live() {
            match target.evaluate_script(script).await {
                Ok(outcome) => total += outcome.get(field).and_then(Value::as_u64).unwrap_or(0),
                Err(e) => {
                    warn!(feature = NAME, target = %target.label(), error = %e, "Socket script failed")
                }
            }
        }
        total
    }
}

#[async_trait]
impl Feature for WebSocketManagerFeature {
    fn state(&self) -> &Arc<FeatureState> {
        &self.state
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn configure(&self, feature: &FeatureConfig, _global: &GlobalSettings) -> bool {
        replace_setting(&self.settings, WebSocketSettings::from_config(feature))
    }

    async fn on_apply_to_target(&self, target: Arc<dyn MonitoredTarget>) -> Result<()> {
        self.targets.track(&target);
        if target.is_alive() {
            target.evaluate_script(SOCKET_TRACKING_SCRIPT).await?;
        }
        Ok(())
    }

    async fn on_system_sleep(&self) -> Result<()> {
        let paused = self.run_everywhere(SOCKET_PAUSE_SCRIPT, "paused").await;
        debug!(paused, "Sockets paused for sleep");
        Ok(())
    }

    async fn on_system_resume(&self) -> Result<()> {
        if !self.settings.read().reconnect_on_resume {
            return Ok(());
        }
        let reconnected = self
            .run_everywhere(SOCKET_RECONNECT_SCRIPT, "reconnected")
            .await;
        debug!(reconnected, "Sockets reconnected after resume");
        Ok(())
    }
}
