//! Performance collector: rolling process metrics for reports

use crate::replace_setting;
use async_trait::async_trait;
use config_manager::{FeatureConfig, GlobalSettings};
use feature_runtime::{Feature, FeatureState};
use parking_lot::{Mutex, RwLock};
use pressure_types::{now_millis, PlatformProbe, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

pub const NAME: &str = "performanceCollector";

const MAX_SAMPLES: usize = 120;

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSettings {
    pub sample_interval: Duration,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(60),
        }
    }
}

impl PerformanceSettings {
    pub fn from_config(feature: &FeatureConfig) -> Self {
        match feature.setting_u64("sampleInterval") {
            Some(ms) => Self {
                sample_interval: Duration::from_millis(ms.max(1)),
            },
            None => Self::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    pub timestamp: u64,
    pub total_memory: u64,
    pub cpu_percent: f64,
    pub process_count: usize,
}

/// Aggregate over the retained samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub samples: usize,
    pub average_memory: f64,
    pub peak_memory: u64,
    pub average_cpu: f64,
}

struct CollectorInner {
    state: Arc<FeatureState>,
    probe: Arc<dyn PlatformProbe>,
    samples: Mutex<VecDeque<PerformanceSample>>,
}

impl CollectorInner {
    fn collect(&self) -> PerformanceSample {
        let processes = self.probe.list_processes();
        let sample = PerformanceSample {
            timestamp: now_millis(),
            total_memory: processes
                .iter()
                .fold(0u64, |sum, p| sum.saturating_add(p.resident_memory_bytes)),
            cpu_percent: processes.iter().map(|p| p.cpu_percent).sum(),
            process_count: processes.len(),
        };
        {
            let mut samples = self.samples.lock();
            samples.push_back(sample);
            while samples.len() > MAX_SAMPLES {
                samples.pop_front();
            }
        }
        self.state.record_activation(0);
        sample
    }

    fn summary(&self) -> PerformanceSummary {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return PerformanceSummary::default();
        }
        let n = samples.len() as f64;
        PerformanceSummary {
            samples: samples.len(),
            average_memory: samples.iter().map(|s| s.total_memory as f64).sum::<f64>() / n,
            peak_memory: samples.iter().map(|s| s.total_memory).max().unwrap_or(0),
            average_cpu: samples.iter().map(|s| s.cpu_percent).sum::<f64>() / n,
        }
    }
}

pub struct PerformanceCollectorFeature {
    inner: Arc<CollectorInner>,
    settings: RwLock<PerformanceSettings>,
}

impl PerformanceCollectorFeature {
    pub fn new(probe: Arc<dyn PlatformProbe>, settings: PerformanceSettings) -> Self {
        Self {
            inner: Arc::new(CollectorInner {
                state: FeatureState::new(NAME),
                probe,
                samples: Mutex::new(VecDeque::new()),
            }),
            settings: RwLock::new(settings),
        }
    }

    /// Take a sample now; `None` while disabled
    pub fn collect_now(&self) -> Option<PerformanceSample> {
        self.is_enabled().then(|| self.inner.collect())
    }

    pub fn summary(&self) -> PerformanceSummary {
        self.inner.summary()
    }
}

#[async_trait]
impl Feature for PerformanceCollectorFeature {
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
        let summary = serde_json::to_value(self.summary()).ok()?;
        Some(("performance".to_string(), summary))
    }

    fn configure(&self, feature: &FeatureConfig, _global: &GlobalSettings) -> bool {
        replace_setting(&self.settings, PerformanceSettings::from_config(feature))
    }

    async fn on_enable(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let sample_interval = self.settings.read().sample_interval;
        self.inner
            .state
            .spawn_interval(sample_interval, move || {
                let inner = Arc::clone(&inner);
                async move {
                    inner.collect();
                }
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pressure_types::mock::MockProbe;
    use pressure_types::MB;

    #[tokio::test]
    async fn test_summary() {
        let probe = Arc::new(MockProbe::new());
        let feature = PerformanceCollectorFeature::new(probe.clone(), PerformanceSettings::default());
        assert!(feature.collect_now().is_none());
        feature.enable().await.unwrap();

        probe.set_target_memory(1, 100 * MB);
        feature.collect_now().unwrap();
        probe.set_target_memory(1, 300 * MB);
        feature.collect_now().unwrap();

        let summary = feature.summary();
        assert_eq!(summary.samples, 2);
        assert_eq!(summary.peak_memory, 300 * MB);
        assert!((summary.average_memory - (200 * MB) as f64).abs() < 1.0);

        let (key, value) = feature.report_section().unwrap();
        assert_eq!(key, "performance");
        assert_eq!(value["samples"], 2);
        assert!(value["averageCpu"].is_number());
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_on_interval() {
        let probe = Arc::new(MockProbe::new());
        let feature = PerformanceCollectorFeature::new(
            probe,
            PerformanceSettings {
                sample_interval: Duration::from_secs(60),
            },
        );
        feature.enable().await.unwrap();
        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(feature.summary().samples, 3);
    }
}
