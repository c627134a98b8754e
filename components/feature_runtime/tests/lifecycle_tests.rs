//! Lifecycle tests for timer-owning features
//!
//! Verify that disabling a feature tears down its timers synchronously.

use async_trait::async_trait;
use config_manager::{FeatureConfig, GlobalSettings};
use feature_runtime::{Feature, FeatureState};
use parking_lot::RwLock;
use pressure_types::Result;
use serde_json::json;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

struct TickingFeature {
    state: Arc<FeatureState>,
    period: RwLock<Duration>,
}

impl TickingFeature {
    fn new(period: Duration) -> Self {
        Self {
            state: FeatureState::new("ticking"),
            period: RwLock::new(period),
        }
    }
}

#[async_trait]
impl Feature for TickingFeature {
    fn state(&self) -> &Arc<FeatureState> {
        &self.state
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn configure(&self, feature: &FeatureConfig, _global: &GlobalSettings) -> bool {
        let Some(ms) = feature.setting_u64("periodMs") else {
            return false;
        };
        let period = Duration::from_millis(ms);
        let mut current = self.period.write();
        if *current == period {
            return false;
        }
        *current = period;
        true
    }

    async fn on_enable(&self) -> Result<()> {
        let state = Arc::clone(&self.state);
        let period = *self.period.read();
        self.state.spawn_interval(period, move || {
            let state = Arc::clone(&state);
            async move {
                state.record_activation(1024);
            }
        });
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_metrics_after_disable() {
    let feature = TickingFeature::new(Duration::from_secs(10));
    feature.enable().await.unwrap();

    tokio::time::sleep(Duration::from_secs(25)).await;
    let before = feature.metrics();
    assert_eq!(before.activations, 2);
    assert_eq!(before.memory_saved, 2048);

    feature.disable().await.unwrap();
    assert_eq!(feature.state().timer_count(), 0);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(feature.metrics(), before);
}

#[tokio::test(start_paused = true)]
async fn test_reenable_restarts_timer() {
    let feature = TickingFeature::new(Duration::from_secs(1));
    feature.enable().await.unwrap();
    feature.disable().await.unwrap();
    feature.enable().await.unwrap();

    // exactly one timer: the first one was aborted by disable
    assert_eq!(feature.state().timer_count(), 1);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(feature.metrics().activations, 2);
}

#[tokio::test]
async fn test_trait_object_dispatch() {
    let feature: Arc<dyn Feature> = Arc::new(TickingFeature::new(Duration::from_secs(60)));
    assert_eq!(feature.name(), "ticking");
    feature.enable().await.unwrap();
    assert!(feature.is_enabled());
    assert!(feature.as_any().downcast_ref::<TickingFeature>().is_some());
    feature.disable().await.unwrap();
}

fn period_config(ms: u64) -> FeatureConfig {
    let mut config = FeatureConfig::default();
    config
        .custom_settings
        .insert("periodMs".to_string(), json!(ms));
    config
}

#[tokio::test(start_paused = true)]
async fn test_new_settings_restart_running_timer() {
    let feature = TickingFeature::new(Duration::from_secs(10));
    feature.enable().await.unwrap();

    feature
        .apply_configuration(&period_config(1_000), &GlobalSettings::default())
        .await
        .unwrap();
    assert_eq!(feature.state().timer_count(), 1);

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(feature.metrics().activations, 3);
}

#[tokio::test(start_paused = true)]
async fn test_settings_stored_while_disabled() {
    let feature = TickingFeature::new(Duration::from_secs(10));
    let global = GlobalSettings::default();

    feature
        .apply_configuration(&period_config(2_000), &global)
        .await
        .unwrap();
    assert_eq!(feature.state().timer_count(), 0);

    feature.enable().await.unwrap();
    tokio::time::sleep(Duration::from_millis(4_500)).await;
    assert_eq!(feature.metrics().activations, 2);

    // unchanged settings leave the running timer alone
    feature
        .apply_configuration(&period_config(2_000), &global)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(feature.metrics().activations, 3);
}
