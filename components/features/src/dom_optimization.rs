//! DOM optimisation: lazy images and disposable hidden nodes

use crate::scripts::dom_optimization_call;
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

pub const NAME: &str = "domOptimization";

/// Estimated bytes released per removed node
const NODE_BYTES: u64 = 512;

#[derive(Debug, Clone, PartialEq)]
pub struct DomOptimizationSettings {
    pub lazy_images: bool,
}

impl Default for DomOptimizationSettings {
    fn default() -> Self {
        Self { lazy_images: true }
    }
}

impl DomOptimizationSettings {
    pub fn from_config(feature: &FeatureConfig) -> Self {
        Self {
            lazy_images: feature.setting_bool("lazyImages").unwrap_or(true),
        }
    }
}

pub struct DomOptimizationFeature {
    state: Arc<FeatureState>,
    settings: RwLock<DomOptimizationSettings>,
    targets: TrackedTargets,
}

impl DomOptimizationFeature {
    pub fn new(settings: DomOptimizationSettings) -> Self {
        Self {
            state: FeatureState::new(NAME),
            settings: RwLock::new(settings),
            targets: TrackedTargets::new(),
        }
    }

    /// Run the optimisation script; returns the estimated bytes freed
    async fn optimize(&self, target: &dyn MonitoredTarget) -> Result<u64> {
        let lazy_images = self.settings.read().lazy_images;
        let outcome = target
            .evaluate_script(&dom_optimization_call(lazy_images))
            .await?;
        let removed = outcome
            .get("removedNodes")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        debug!(target = %target.label(), removed, "DOM optimised");
        Ok(removed.saturating_mul(NODE_BYTES))
    }
}

#[async_trait]
impl Feature for DomOptimizationFeature {
    fn state(&self) -> &Arc<FeatureState> {
        &self.state
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn configure(&self, feature: &FeatureConfig, _global: &GlobalSettings) -> bool {
        replace_setting(&self.settings, DomOptimizationSettings::from_config(feature))
    }

    async fn on_apply_to_target(&self, target: Arc<dyn MonitoredTarget>) -> Result<()> {
        self.targets.track(&target);
        if !target.is_alive() {
            return Ok(());
        }
        let freed = self.optimize(target.as_ref()).await?;
        self.state.record_activation(freed);
        Ok(())
    }

    async fn on_system_resume(&self) -> Result<()> {
        for target in self.targets.live() {
            match self.optimize(target.as_ref()).await {
                Ok(freed) => self.state.add_memory_saved(freed),
                Err(e) => {
                    warn!(feature = NAME, target = %target.label(), error = %e, "DOM optimisation failed")
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pressure_types::mock::MockTarget;
    use serde_json::json;

    #[tokio::test]
    async fn test_apply_optimizes_target() {
        let feature = DomOptimizationFeature::new(DomOptimizationSettings::default());
        feature.enable().await.unwrap();
        let target = Arc::new(MockTarget::new(1, "t"));
        target.respond_to("removedNodes", json!({ "lazyLoaded": 3, "removedNodes": 4 }));

        feature.apply_to_target(target.clone()).await.unwrap();

        let scripts = target.evaluated_scripts();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].ends_with("(true)"));
        let metrics = feature.metrics();
        assert_eq!(metrics.activations, 1);
        assert_eq!(metrics.memory_saved, 4 * NODE_BYTES);
    }

    #[tokio::test]
    async fn test_resume_counts_one_activation() {
        let feature = DomOptimizationFeature::new(DomOptimizationSettings { lazy_images: false });
        let a = Arc::new(MockTarget::new(1, "a"));
        let b = Arc::new(MockTarget::new(2, "b"));
        // tracked while disabled: the hook does not run, nothing is recorded
        feature.apply_to_target(a.clone()).await.unwrap();
        assert!(a.evaluated_scripts().is_empty());

        feature.enable().await.unwrap();
        feature.apply_to_target(a.clone()).await.unwrap();
        feature.apply_to_target(b.clone()).await.unwrap();
        b.set_failing(true);

        feature.handle_system_resume().await.unwrap();
        assert_eq!(a.evaluated_scripts().len(), 2);
        assert_eq!(feature.metrics().activations, 3);
    }
}
