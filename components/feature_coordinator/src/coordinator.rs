//! Feature coordinator implementation

use crate::report::{metrics_csv, FeatureReport, MemoryReport, WebContentsEntry};
use config_manager::{ConfigurationManager, GlobalSettings, BUILTIN_FEATURES};
use feature_runtime::Feature;
use features::{build_feature, memory_for_target, MemorySnapshot, MonitorFeature};
use parking_lot::{Mutex, RwLock};
use pressure_types::{
    AggregateMetrics, Intervention, MemoryError, MonitoredTarget, PlatformProbe, PressureAlert,
    Result,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Interventions kept for reports
const MAX_INTERVENTIONS: usize = 100;

/// Default priority for features missing from the configuration
const DEFAULT_PRIORITY: u8 = 50;

struct RegisteredFeature {
    priority: u8,
    feature: Arc<dyn Feature>,
}

/// Owns the feature registry and the monitored-target registry
///
/// The coordinator is the only component that mutates either registry. Callers
/// get copies back (`get_metrics`, `web_contents_list`), never the live maps.
///
/// Enabling the coordinator does not enable any feature by itself; features are
/// switched with [`toggle_feature`](Self::toggle_feature) or
/// [`sync_with_configuration`](Self::sync_with_configuration).
///
/// # Example
///
/// ```no_run
/// use config_manager::ConfigurationManager;
/// use feature_coordinator::FeatureCoordinator;
/// use pressure_types::{mock::MockProbe, PlatformProbe};
/// use std::sync::Arc;
///
/// # async fn run() -> pressure_types::Result<()> {
/// let config = Arc::new(ConfigurationManager::open_default());
/// let probe: Arc<dyn PlatformProbe> = Arc::new(MockProbe::new());
/// let coordinator = FeatureCoordinator::with_default_features(config, probe);
///
/// coordinator.enable().await;
/// coordinator.sync_with_configuration().await;
/// let report = coordinator.generate_report();
/// println!("{} features enabled", report.metrics.enabled_features);
/// # Ok(())
/// # }
/// ```
pub struct FeatureCoordinator {
    config: Arc<ConfigurationManager>,
    probe: Arc<dyn PlatformProbe>,
    /// Sorted by descending priority, ties in registration order
    features: RwLock<Vec<RegisteredFeature>>,
    /// Tracked targets by label
    targets: RwLock<BTreeMap<String, Weak<dyn MonitoredTarget>>>,
    interventions: Mutex<VecDeque<Intervention>>,
    enabled: AtomicBool,
    created_at: Instant,
}

impl FeatureCoordinator {
    /// Create a coordinator with no registered features
    pub fn new(config: Arc<ConfigurationManager>, probe: Arc<dyn PlatformProbe>) -> Self {
        Self {
            config,
            probe,
            features: RwLock::new(Vec::new()),
            targets: RwLock::new(BTreeMap::new()),
            interventions: Mutex::new(VecDeque::new()),
            enabled: AtomicBool::new(false),
            created_at: Instant::now(),
        }
    }

    /// Create a coordinator with every built-in feature registered
    pub fn with_default_features(
        config: Arc<ConfigurationManager>,
        probe: Arc<dyn PlatformProbe>,
    ) -> Self {
        let coordinator = Self::new(config, probe);
        for name in BUILTIN_FEATURES {
            match build_feature(name, &coordinator.config, &coordinator.probe) {
                Some(feature) => coordinator.register_feature(feature),
                None => warn!(feature = name, "No implementation for built-in feature"),
            }
        }
        info!(
            count = coordinator.features.read().len(),
            "Registered built-in features"
        );
        coordinator
    }

    /// Configuration backing this coordinator
    pub fn config(&self) -> &Arc<ConfigurationManager> {
        &self.config
    }

    /// Register a feature, replacing any feature with the same name
    pub fn register_feature(&self, feature: Arc<dyn Feature>) {
        let name = feature.name().to_string();
        let priority = self
            .config
            .get_feature_config(&name)
            .map_or(DEFAULT_PRIORITY, |c| c.priority);

        let mut features = self.features.write();
        if let Some(pos) = features.iter().position(|f| f.feature.name() == name) {
            warn!(feature = %name, "Replacing registered feature");
            features.remove(pos);
        }
        let pos = features
            .iter()
            .position(|f| f.priority < priority)
            .unwrap_or(features.len());
        features.insert(pos, RegisteredFeature { priority, feature });
        debug!(feature = %name, priority, "Feature registered");
    }

    /// Registered feature by name
    pub fn feature(&self, name: &str) -> Option<Arc<dyn Feature>> {
        self.features
            .read()
            .iter()
            .find(|f| f.feature.name() == name)
            .map(|f| Arc::clone(&f.feature))
    }

    /// Registered feature names in dispatch order
    pub fn feature_names(&self) -> Vec<String> {
        self.features
            .read()
            .iter()
            .map(|f| f.feature.name().to_string())
            .collect()
    }

    fn ordered_features(&self) -> Vec<Arc<dyn Feature>> {
        self.features
            .read()
            .iter()
            .map(|f| Arc::clone(&f.feature))
            .collect()
    }

    fn enabled_features(&self) -> Vec<Arc<dyn Feature>> {
        self.ordered_features()
            .into_iter()
            .filter(|f| f.is_enabled())
            .collect()
    }

    /// Run `f` against the registered monitoring feature
    fn with_monitor<R>(&self, f: impl FnOnce(&MonitorFeature) -> R) -> Option<R> {
        let feature = self.feature(features::monitor::NAME)?;
        let monitor = feature.as_any().downcast_ref::<MonitorFeature>()?;
        Some(f(monitor))
    }

    /// Hand the effective configuration to a feature
    async fn configure_feature(&self, feature: &Arc<dyn Feature>, global: &GlobalSettings) {
        let feature_config = self
            .config
            .get_feature_config(feature.name())
            .unwrap_or_default();
        if let Err(e) = feature.apply_configuration(&feature_config, global).await {
            error!(feature = feature.name(), error = %e, "Failed to apply feature settings");
        }
    }

    /// Subscribe to the monitoring feature's pressure alerts
    pub fn subscribe_alerts(&self) -> Option<tokio::sync::broadcast::Receiver<PressureAlert>> {
        self.with_monitor(MonitorFeature::subscribe)
    }

    /// Whether the coordinator is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enable the coordinator; features keep their current state
    pub async fn enable(&self) {
        if self
            .enabled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Coordinator already enabled");
            return;
        }
        info!("Memory management enabled");
    }

    /// Disable the coordinator and every registered feature
    pub async fn disable(&self) {
        if self
            .enabled
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Coordinator already disabled");
            return;
        }
        for feature in self.ordered_features() {
            if let Err(e) = feature.disable().await {
                error!(feature = feature.name(), error = %e, "Failed to disable feature");
            }
        }
        info!("Memory management disabled");
    }

    /// Switch one feature on or off and persist the choice
    ///
    /// Turning a feature on while the coordinator is disabled is ignored and
    /// returns `Ok(false)`. Turning a feature off is always honored. A feature
    /// that is turned on is applied to every tracked live target.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::FeatureNotFound`] if no feature has this name.
    pub async fn toggle_feature(&self, name: &str, on: bool) -> Result<bool> {
        let feature = self
            .feature(name)
            .ok_or_else(|| MemoryError::FeatureNotFound(name.to_string()))?;

        if on && !self.is_enabled() {
            debug!(feature = name, "Coordinator disabled, ignoring feature enable");
            return Ok(false);
        }

        if on {
            self.configure_feature(&feature, &self.config.global_settings())
                .await;
            if let Err(e) = feature.enable().await {
                error!(feature = name, error = %e, "Failed to enable feature");
            }
            for target in self.live_targets() {
                if let Err(e) = feature.apply_to_target(target).await {
                    warn!(feature = name, error = %e, "Failed to apply feature to target");
                }
            }
        } else if let Err(e) = feature.disable().await {
            error!(feature = name, error = %e, "Failed to disable feature");
        }

        self.config.set_feature_enabled(name, on);
        Ok(true)
    }

    /// Enable or disable every feature to match the configuration
    ///
    /// Priorities and settings are re-read as well, so a profile switch or a
    /// global settings change reaches running features. Features are only
    /// enabled while the coordinator is enabled.
    pub async fn sync_with_configuration(&self) {
        {
            let mut features = self.features.write();
            for registered in features.iter_mut() {
                if let Some(config) = self.config.get_feature_config(registered.feature.name()) {
                    registered.priority = config.priority;
                }
            }
            // stable, so ties keep registration order
            features.sort_by(|a, b| b.priority.cmp(&a.priority));
        }

        let coordinator_on = self.is_enabled();
        let global = self.config.global_settings();
        for feature in self.ordered_features() {
            let wanted = coordinator_on && self.config.is_feature_enabled(feature.name());
            if !wanted && feature.is_enabled() {
                if let Err(e) = feature.disable().await {
                    error!(feature = feature.name(), error = %e, "Failed to disable feature");
                }
            }
            self.configure_feature(&feature, &global).await;
            if wanted && !feature.is_enabled() {
                if let Err(e) = feature.enable().await {
                    error!(feature = feature.name(), error = %e, "Failed to enable feature");
                }
                for target in self.live_targets() {
                    if let Err(e) = feature.apply_to_target(target).await {
                        warn!(feature = feature.name(), error = %e, "Failed to apply feature to target");
                    }
                }
            }
        }
        debug!(profile = %self.config.active_profile(), "Features synced with configuration");
    }

    /// Track a target and, when enabled, apply every enabled feature to it
    ///
    /// The target is tracked even while the coordinator is disabled, so features
    /// enabled later still reach it.
    pub async fn apply_to_target(&self, target: Arc<dyn MonitoredTarget>) {
        let label = target.label();
        self.targets
            .write()
            .insert(label.clone(), Arc::downgrade(&target));
        debug!(target = %label, "Tracking target");

        if !self.is_enabled() {
            return;
        }
        for feature in self.enabled_features() {
            if let Err(e) = feature.apply_to_target(Arc::clone(&target)).await {
                warn!(feature = feature.name(), target = %label, error = %e, "Failed to apply feature");
            }
        }
    }

    /// Stop tracking a target
    pub fn handle_target_destroyed(&self, label: &str) {
        if self.targets.write().remove(label).is_some() {
            debug!(target = label, "Target destroyed");
        }
    }

    /// Live tracked targets by label; dead entries are dropped
    ///
    /// Liveness is checked without holding the registry lock, so a target may
    /// call back into the coordinator from `is_alive`.
    pub fn web_contents_list(&self) -> BTreeMap<String, Arc<dyn MonitoredTarget>> {
        let tracked: Vec<(String, Weak<dyn MonitoredTarget>)> = self
            .targets
            .read()
            .iter()
            .map(|(label, weak)| (label.clone(), Weak::clone(weak)))
            .collect();

        let mut live = BTreeMap::new();
        let mut dead = Vec::new();
        for (label, weak) in tracked {
            match weak.upgrade() {
                Some(target) if target.is_alive() => {
                    live.insert(label, target);
                }
                _ => dead.push((label, weak)),
            }
        }

        if !dead.is_empty() {
            let mut targets = self.targets.write();
            for (label, weak) in dead {
                // the label may have been re-registered meanwhile
                if targets.get(&label).is_some_and(|current| current.ptr_eq(&weak)) {
                    targets.remove(&label);
                }
            }
        }
        live
    }

    fn live_targets(&self) -> Vec<Arc<dyn MonitoredTarget>> {
        self.web_contents_list().into_values().collect()
    }

    /// Forward a sleep notification to every feature
    pub async fn handle_system_sleep(&self) {
        if !self.is_enabled() {
            return;
        }
        info!("System going to sleep");
        for feature in self.ordered_features() {
            if let Err(e) = feature.handle_system_sleep().await {
                warn!(feature = feature.name(), error = %e, "Sleep handler failed");
            }
        }
    }

    /// Forward a resume notification to every feature
    pub async fn handle_system_resume(&self) {
        if !self.is_enabled() {
            return;
        }
        info!("System resumed");
        for feature in self.ordered_features() {
            if let Err(e) = feature.handle_system_resume().await {
                warn!(feature = feature.name(), error = %e, "Resume handler failed");
            }
        }
    }

    /// Route a pressure alert to the enabled features in priority order
    ///
    /// Alerts for targets that are no longer tracked or alive are dropped.
    pub async fn dispatch_alert(&self, alert: &PressureAlert) -> Vec<Intervention> {
        if !self.is_enabled() {
            return Vec::new();
        }
        let Some(target) = self
            .live_targets()
            .into_iter()
            .find(|t| t.id() == alert.target_id)
        else {
            debug!(target = %alert.target_label, "Alert for untracked target dropped");
            return Vec::new();
        };

        let mut performed = Vec::new();
        for feature in self.enabled_features() {
            if !target.is_alive() {
                break;
            }
            match feature.handle_pressure(Arc::clone(&target), alert).await {
                Ok(Some(intervention)) => {
                    info!(
                        feature = feature.name(),
                        target = %intervention.target,
                        action = %intervention.action,
                        "Intervention performed"
                    );
                    performed.push(intervention);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(feature = feature.name(), target = %alert.target_label, error = %e, "Pressure handler failed");
                }
            }
        }

        let mut interventions = self.interventions.lock();
        interventions.extend(performed.iter().cloned());
        while interventions.len() > MAX_INTERVENTIONS {
            interventions.pop_front();
        }
        performed
    }

    /// Interventions recorded so far, oldest first
    pub fn interventions(&self) -> Vec<Intervention> {
        self.interventions.lock().iter().cloned().collect()
    }

    /// Aggregate of every registered feature's metrics
    pub fn get_metrics(&self) -> AggregateMetrics {
        let mut aggregate = AggregateMetrics::default();
        for feature in self.ordered_features() {
            aggregate.absorb(&feature.metrics(), feature.is_enabled());
        }
        aggregate
    }

    fn feature_reports(&self) -> BTreeMap<String, FeatureReport> {
        self.ordered_features()
            .into_iter()
            .map(|f| {
                (
                    f.name().to_string(),
                    FeatureReport {
                        enabled: f.is_enabled(),
                        metrics: f.metrics(),
                    },
                )
            })
            .collect()
    }

    /// Assemble a report of features, targets and interventions
    pub fn generate_report(&self) -> MemoryReport {
        let processes = self.probe.list_processes();
        let monitoring = self
            .feature(features::monitor::NAME)
            .map_or(false, |f| f.is_enabled());

        let web_contents = self
            .web_contents_list()
            .into_iter()
            .map(|(label, target)| {
                let memory = memory_for_target(&processes, target.id());
                let assessment = match memory {
                    Some(memory) if monitoring => {
                        self.with_monitor(|monitor| monitor.assess(target.id(), memory))
                    }
                    _ => None,
                };
                WebContentsEntry {
                    id: target.id(),
                    url: label,
                    memory: memory.unwrap_or(0),
                    risk: assessment.as_ref().map(|a| a.risk),
                    recommendation: assessment.map(|a| a.recommendation),
                }
            })
            .collect();

        let extras = self
            .ordered_features()
            .iter()
            .filter_map(|f| f.report_section())
            .collect::<Map<String, Value>>();

        MemoryReport {
            timestamp: chrono::Utc::now().to_rfc3339(),
            duration: self.created_at.elapsed().as_millis() as u64,
            enabled: self.is_enabled(),
            features: self.feature_reports(),
            metrics: self.get_metrics(),
            interventions: self.interventions(),
            web_contents,
            extras,
        }
    }

    /// Export `activations` and `memorySaved` of every enabled feature as CSV
    pub fn export_csv(&self) -> Result<String> {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let rows: Vec<(String, pressure_types::FeatureMetrics)> = self
            .enabled_features()
            .iter()
            .map(|f| (f.name().to_string(), f.metrics()))
            .collect();
        metrics_csv(
            &timestamp,
            rows.iter().map(|(name, metrics)| (name.as_str(), metrics)),
        )
    }

    /// Take a monitoring pass and broadcast it to every live target
    ///
    /// Returns `None` when the monitoring feature is missing or disabled.
    pub async fn request_snapshot(&self) -> Option<MemorySnapshot> {
        let mut snapshot = self.with_monitor(MonitorFeature::sample_now).flatten()?;
        snapshot.features = self
            .feature_reports()
            .into_iter()
            .filter_map(|(name, report)| serde_json::to_value(report).ok().map(|v| (name, v)))
            .collect();

        let detail = match serde_json::to_string(&snapshot) {
            Ok(detail) => detail,
            Err(e) => {
                warn!(error = %e, "Failed to serialize memory snapshot");
                return Some(snapshot);
            }
        };
        let script = format!(
            "window.dispatchEvent(new CustomEvent('memory-snapshot', {{ detail: {} }}))",
            detail
        );
        for target in self.live_targets() {
            if let Err(e) = target.evaluate_script(&script).await {
                debug!(target = %target.label(), error = %e, "Snapshot broadcast failed");
            }
        }
        Some(snapshot)
    }

    /// Effective settings of a feature as JSON, for the control surface
    pub fn feature_settings(&self, name: &str) -> Option<Value> {
        let config = self.config.get_feature_config(name)?;
        Some(json!({
            "enabled": self.feature(name).map_or(false, |f| f.is_enabled()),
            "priority": config.priority,
            "customSettings": config.custom_settings,
        }))
    }
}
