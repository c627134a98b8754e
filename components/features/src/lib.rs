//! Built-in memory-pressure features
//!
//! Each module holds one [`Feature`] implementation with its settings type:
//!
//! - `monitoring`: samples the probe and raises pressure alerts
//! - `smartCleanup`: clears storage and caches of pressured targets
//! - `autoReload`: reloads targets at critical pressure
//! - `domOptimization`: lazy images and hidden-node pruning
//! - `websocketManager`: pauses sockets over sleep and reconnects on resume
//! - `leakDetector`: periodic leak heuristics per target
//! - `performanceCollector`: rolling process metrics for reports

pub mod auto_reload;
pub mod dom_optimization;
pub mod leak_detector;
pub mod monitor;
pub mod performance_collector;
pub mod scripts;
pub mod smart_cleanup;
pub mod targets;
pub mod websocket_manager;

pub use auto_reload::{AutoReloadFeature, AutoReloadSettings};
pub use dom_optimization::{DomOptimizationFeature, DomOptimizationSettings};
pub use leak_detector::{LeakDetectorFeature, LeakDetectorSettings};
pub use monitor::{
    memory_for_target, predictor_config, AppMemory, MemorySnapshot, MonitorFeature,
    MonitorSettings, TargetAssessment,
};
pub use performance_collector::{
    PerformanceCollectorFeature, PerformanceSample, PerformanceSettings, PerformanceSummary,
};
pub use smart_cleanup::{SmartCleanupFeature, SmartCleanupSettings};
pub use targets::TrackedTargets;
pub use websocket_manager::{WebSocketManagerFeature, WebSocketSettings};

use config_manager::ConfigurationManager;
use feature_runtime::Feature;
use parking_lot::RwLock;
use pressure_types::PlatformProbe;
use std::sync::Arc;
use tracing::debug;

/// Store `value` in `slot`; returns false if it already held an equal value
pub(crate) fn replace_setting<T: PartialEq>(slot: &RwLock<T>, value: T) -> bool {
    let mut current = slot.write();
    if *current == value {
        return false;
    }
    *current = value;
    true
}

/// Build one built-in feature from the current configuration
///
/// Returns `None` for names that are not built in.
pub fn build_feature(
    name: &str,
    config: &ConfigurationManager,
    probe: &Arc<dyn PlatformProbe>,
) -> Option<Arc<dyn Feature>> {
    let feature_config = config.get_feature_config(name).unwrap_or_default();

    let feature: Arc<dyn Feature> = match name {
        monitor::NAME => Arc::new(MonitorFeature::new(
            Arc::clone(probe),
            MonitorSettings::from_config(&feature_config, &config.global_settings()),
        )),
        smart_cleanup::NAME => Arc::new(SmartCleanupFeature::new(
            SmartCleanupSettings::from_config(&feature_config),
        )),
        auto_reload::NAME => Arc::new(AutoReloadFeature::new(AutoReloadSettings::from_config(
            &feature_config,
        ))),
        dom_optimization::NAME => Arc::new(DomOptimizationFeature::new(
            DomOptimizationSettings::from_config(&feature_config),
        )),
        websocket_manager::NAME => Arc::new(WebSocketManagerFeature::new(
            WebSocketSettings::from_config(&feature_config),
        )),
        leak_detector::NAME => Arc::new(LeakDetectorFeature::new(
            Arc::clone(probe),
            LeakDetectorSettings::from_config(&feature_config),
        )),
        performance_collector::NAME => Arc::new(PerformanceCollectorFeature::new(
            Arc::clone(probe),
            PerformanceSettings::from_config(&feature_config),
        )),
        _ => return None,
    };

    debug!(feature = name, priority = feature_config.priority, "Built feature");
    Some(feature)
}
