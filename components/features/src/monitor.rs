//! Monitoring feature: periodic sampling, prediction and pressure alerts

use crate::targets::TrackedTargets;
use async_trait::async_trait;
use config_manager::{FeatureConfig, GlobalSettings};
use feature_runtime::{Feature, FeatureState};
use parking_lot::{Mutex, RwLock};
use pressure_predictor::{Assessment, DataPoint, PredictionResult, PredictorConfig, PressurePredictor};
use pressure_types::{
    now_millis, HeapUsage, MonitoredTarget, PlatformProbe, PressureAlert, ProcessMetric, Result,
    RiskLevel,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub const NAME: &str = "monitoring";

const ALERT_CHANNEL_CAPACITY: usize = 64;

/// Predictor thresholds derived from the global settings
pub fn predictor_config(global: &GlobalSettings) -> PredictorConfig {
    PredictorConfig::new()
        .with_memory_limit(global.memory_limit)
        .with_thresholds(global.warning_threshold, global.critical_threshold)
        .with_history_size(global.history_size)
        .with_prediction_horizon(global.prediction_horizon)
}

/// Resident memory of every process rendering `target_id`; `None` if there is none
pub fn memory_for_target(processes: &[ProcessMetric], target_id: u64) -> Option<u64> {
    processes
        .iter()
        .filter(|p| p.associated_target_id == Some(target_id))
        .map(|p| p.resident_memory_bytes)
        .reduce(|a, b| a.saturating_add(b))
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    /// Publish alerts for high and critical targets
    pub alert_on_high_risk: bool,
    pub predictor: PredictorConfig,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            alert_on_high_risk: true,
            predictor: PredictorConfig::default(),
        }
    }
}

impl MonitorSettings {
    pub fn from_config(feature: &FeatureConfig, global: &GlobalSettings) -> Self {
        Self {
            check_interval: Duration::from_millis(global.check_interval.max(1)),
            alert_on_high_risk: feature.setting_bool("alertOnHighRisk").unwrap_or(true),
            predictor: predictor_config(global),
        }
    }
}

/// Latest classification of one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetAssessment {
    pub target_id: u64,
    pub label: String,
    pub memory: u64,
    pub risk: RiskLevel,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_memory: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_limit_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Memory of the whole application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMemory {
    pub total_memory: u64,
    pub process_count: usize,
    pub cpu_percent: f64,
    pub heap: HeapUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<PredictionResult>,
}

/// Result of one monitoring pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub timestamp: u64,
    pub app: AppMemory,
    pub targets: Vec<TargetAssessment>,
    /// Per-feature state, filled in by the coordinator
    #[serde(default)]
    pub features: Map<String, Value>,
}

struct MonitorInner {
    state: Arc<FeatureState>,
    probe: Arc<dyn PlatformProbe>,
    settings: RwLock<MonitorSettings>,
    targets: TrackedTargets,
    app: Mutex<PressurePredictor>,
    per_target: Mutex<HashMap<u64, PressurePredictor>>,
    latest: RwLock<HashMap<u64, TargetAssessment>>,
    alerts: broadcast::Sender<PressureAlert>,
}

impl MonitorInner {
    fn sample(&self) -> MemorySnapshot {
        let now = now_millis();
        let processes = self.probe.list_processes();
        let total_memory = processes
            .iter()
            .fold(0u64, |sum, p| sum.saturating_add(p.resident_memory_bytes));
        let cpu_percent: f64 = processes.iter().map(|p| p.cpu_percent).sum();

        let app_prediction = {
            let mut app = self.app.lock();
            app.add_data_point(DataPoint::new(now, total_memory).with_cpu(cpu_percent));
            app.predict()
        };

        let (predictor_config, alert_on_high_risk) = {
            let settings = self.settings.read();
            (settings.predictor.clone(), settings.alert_on_high_risk)
        };

        let live = self.targets.live();
        let mut targets = Vec::with_capacity(live.len());
        {
            let mut predictors = self.per_target.lock();
            predictors.retain(|id, _| live.iter().any(|t| t.id() == *id));

            for target in &live {
                let Some(memory) = memory_for_target(&processes, target.id()) else {
                    continue;
                };
                let predictor = predictors
                    .entry(target.id())
                    .or_insert_with(|| PressurePredictor::new(predictor_config.clone()));
                predictor.add_data_point(DataPoint::new(now, memory));
                targets.push(assess(target.as_ref(), memory, predictor));
            }
        }

        {
            let mut latest = self.latest.write();
            latest.clear();
            for assessment in &targets {
                latest.insert(assessment.target_id, assessment.clone());
            }
        }

        if alert_on_high_risk {
            for assessment in targets.iter().filter(|a| a.risk >= RiskLevel::High) {
                let alert = PressureAlert {
                    target_id: assessment.target_id,
                    target_label: assessment.label.clone(),
                    risk: assessment.risk,
                    current_memory: assessment.memory,
                    predicted_memory: assessment.predicted_memory,
                    time_to_limit_ms: assessment.time_to_limit_ms,
                    recommendation: assessment.recommendation.clone(),
                    timestamp: now,
                };
                warn!(
                    target = %alert.target_label,
                    risk = %alert.risk,
                    memory = alert.current_memory,
                    "Memory pressure detected"
                );
                if self.alerts.send(alert).is_err() {
                    debug!("No pressure alert subscribers");
                }
            }
        }

        self.state.record_activation(0);

        MemorySnapshot {
            timestamp: now,
            app: AppMemory {
                total_memory,
                process_count: processes.len(),
                cpu_percent,
                heap: self.probe.heap_usage(),
                prediction: app_prediction,
            },
            targets,
            features: Map::new(),
        }
    }
}

fn assess(
    target: &dyn MonitoredTarget,
    memory: u64,
    predictor: &PressurePredictor,
) -> TargetAssessment {
    match predictor.predict() {
        Some(prediction) => TargetAssessment {
            target_id: target.id(),
            label: target.label(),
            memory,
            risk: prediction.risk,
            recommendation: prediction.recommendation,
            predicted_memory: Some(prediction.predicted_memory),
            time_to_limit_ms: prediction.time_to_limit_ms,
            confidence: Some(prediction.confidence),
        },
        None => {
            let Assessment {
                risk,
                recommendation,
            } = predictor.assess_current(memory);
            TargetAssessment {
                target_id: target.id(),
                label: target.label(),
                memory,
                risk,
                recommendation,
                predicted_memory: None,
                time_to_limit_ms: None,
                confidence: None,
            }
        }
    }
}

/// Samples the probe on `checkInterval` and raises alerts for pressured targets
pub struct MonitorFeature {
    inner: Arc<MonitorInner>,
}

impl MonitorFeature {
    pub fn new(probe: Arc<dyn PlatformProbe>, settings: MonitorSettings) -> Self {
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MonitorInner {
                state: FeatureState::new(NAME),
                probe,
                app: Mutex::new(PressurePredictor::new(settings.predictor.clone())),
                settings: RwLock::new(settings),
                targets: TrackedTargets::new(),
                per_target: Mutex::new(HashMap::new()),
                latest: RwLock::new(HashMap::new()),
                alerts,
            }),
        }
    }

    /// Copy of the settings in effect
    pub fn settings(&self) -> MonitorSettings {
        self.inner.settings.read().clone()
    }

    /// Receive every alert raised from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PressureAlert> {
        self.inner.alerts.subscribe()
    }

    /// Run one monitoring pass immediately; `None` while disabled
    pub fn sample_now(&self) -> Option<MemorySnapshot> {
        if !self.is_enabled() {
            return None;
        }
        Some(self.inner.sample())
    }

    /// Classification of a target from the last pass
    pub fn latest_assessment(&self, target_id: u64) -> Option<TargetAssessment> {
        self.inner.latest.read().get(&target_id).cloned()
    }

    /// Latest classification, or one derived from `memory` alone when the
    /// target has not been sampled yet
    pub fn assess(&self, target_id: u64, memory: u64) -> Assessment {
        match self.latest_assessment(target_id) {
            Some(latest) => Assessment {
                risk: latest.risk,
                recommendation: latest.recommendation,
            },
            None => PressurePredictor::new(self.inner.settings.read().predictor.clone())
                .assess_current(memory),
        }
    }

    /// Number of samples held for a target
    pub fn history_len(&self, target_id: u64) -> usize {
        self.inner
            .per_target
            .lock()
            .get(&target_id)
            .map_or(0, PressurePredictor::len)
    }
}

#[async_trait]
impl Feature for MonitorFeature {
    fn state(&self) -> &Arc<FeatureState> {
        &self.inner.state
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn configure(&self, feature: &FeatureConfig, global: &GlobalSettings) -> bool {
        let settings = MonitorSettings::from_config(feature, global);
        let mut current = self.inner.settings.write();
        if *current == settings {
            return false;
        }
        if current.predictor != settings.predictor {
            self.inner.app.lock().set_config(settings.predictor.clone());
            for predictor in self.inner.per_target.lock().values_mut() {
                predictor.set_config(settings.predictor.clone());
            }
            // assessments against the old thresholds are stale
            self.inner.latest.write().clear();
        }
        *current = settings;
        true
    }

    async fn on_enable(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let check_interval = self.inner.settings.read().check_interval;
        self.inner
            .state
            .spawn_interval(check_interval, move || {
                let inner = Arc::clone(&inner);
                async move {
                    inner.sample();
                }
            });
        Ok(())
    }

    async fn on_apply_to_target(&self, target: Arc<dyn MonitoredTarget>) -> Result<()> {
        self.inner.targets.track(&target);
        Ok(())
    }
}
