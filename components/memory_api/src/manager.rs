//! Composition root of the memory-pressure subsystem

use crate::messages::{Request, Response};
use chrono::Timelike;
use config_manager::{ConfigurationManager, TriggerContext};
use feature_coordinator::FeatureCoordinator;
use memory_profiler::Profiler;
use parking_lot::Mutex;
use pressure_types::{MemoryError, MonitoredTarget, PlatformProbe};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Owns the configuration, the coordinator and the profiler
///
/// Exactly one instance is created by the host at start-up and passed by
/// reference to whatever needs it.
///
/// # Example
///
/// ```no_run
/// use memory_api::MemoryManager;
/// use pressure_types::{mock::MockProbe, PlatformProbe};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() {
///     let probe: Arc<dyn PlatformProbe> = Arc::new(MockProbe::new());
///     let manager = MemoryManager::open_default(probe);
///     manager.start().await;
///
///     let response = manager
///         .handle_message(r#"{"type": "getMetrics"}"#)
///         .await;
///     println!("{}", response);
///
///     manager.shutdown().await;
/// }
/// ```
pub struct MemoryManager {
    config: Arc<ConfigurationManager>,
    coordinator: Arc<FeatureCoordinator>,
    profiler: Profiler,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryManager {
    /// Create a manager around an already loaded configuration
    pub fn new(config: Arc<ConfigurationManager>, probe: Arc<dyn PlatformProbe>) -> Self {
        let coordinator = Arc::new(FeatureCoordinator::with_default_features(
            Arc::clone(&config),
            Arc::clone(&probe),
        ));
        Self {
            config,
            coordinator,
            profiler: Profiler::new(probe),
            dispatcher: Mutex::new(None),
        }
    }

    /// Load the configuration from `dir` and create a manager
    pub fn open(dir: impl AsRef<Path>, probe: Arc<dyn PlatformProbe>) -> Self {
        Self::new(Arc::new(ConfigurationManager::open(dir)), probe)
    }

    /// Load the configuration from the per-user config directory
    pub fn open_default(probe: Arc<dyn PlatformProbe>) -> Self {
        Self::new(Arc::new(ConfigurationManager::open_default()), probe)
    }

    /// Configuration manager
    pub fn config(&self) -> &Arc<ConfigurationManager> {
        &self.config
    }

    /// Feature coordinator
    pub fn coordinator(&self) -> &Arc<FeatureCoordinator> {
        &self.coordinator
    }

    /// Profiler
    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    /// Enable the configured features and start routing pressure alerts
    pub async fn start(&self) {
        if self.config.global_settings().enabled {
            self.coordinator.enable().await;
        }
        self.coordinator.sync_with_configuration().await;
        self.spawn_dispatcher();
        info!(
            profile = %self.config.active_profile(),
            features = self.coordinator.get_metrics().enabled_features,
            "Memory manager started"
        );
    }

    /// Stop alert routing, profiling sessions and every feature
    pub async fn shutdown(&self) {
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
        self.profiler.stop_all().await;
        self.coordinator.disable().await;
        info!("Memory manager stopped");
    }

    fn spawn_dispatcher(&self) {
        let Some(mut alerts) = self.coordinator.subscribe_alerts() else {
            warn!("Monitoring feature not registered, pressure alerts are not routed");
            return;
        };
        let coordinator = Arc::clone(&self.coordinator);
        let handle = tokio::spawn(async move {
            loop {
                match alerts.recv().await {
                    Ok(alert) => {
                        coordinator.dispatch_alert(&alert).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Pressure alert dispatcher lagging");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Pressure alert dispatcher stopped");
        });

        if let Some(previous) = self.dispatcher.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Track a new target
    pub async fn register_target(&self, target: Arc<dyn MonitoredTarget>) {
        self.coordinator.apply_to_target(target).await;
    }

    /// Stop tracking a target
    pub fn target_destroyed(&self, label: &str) {
        self.coordinator.handle_target_destroyed(label);
    }

    /// Switch to the first profile whose triggers match current conditions
    ///
    /// Returns the name of the newly activated profile, if any.
    pub async fn apply_matching_profile(&self) -> Option<String> {
        let limit = self.config.global_settings().memory_limit.max(1);
        let memory = self
            .coordinator
            .generate_report()
            .web_contents
            .iter()
            .fold(0u64, |sum, entry| sum.saturating_add(entry.memory));
        let context = TriggerContext {
            memory_percent: memory as f64 / limit as f64 * 100.0,
            hour: chrono::Local::now().hour() as u8,
            target_count: self.coordinator.web_contents_list().len(),
        };

        let name = self.config.matching_profile(&context)?;
        if let Err(e) = self.config.set_active_profile(&name) {
            warn!(profile = %name, error = %e, "Failed to activate matching profile");
            return None;
        }
        self.coordinator.sync_with_configuration().await;
        info!(profile = %name, "Switched profile from triggers");
        Some(name)
    }

    /// Handle one control-surface request
    ///
    /// Only unknown profiles and unknown profiling sessions produce error
    /// responses; every other failure is logged and answered with a no-op.
    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::ToggleAll { enabled } => {
                self.config.update_global_settings(|g| g.enabled = enabled);
                if enabled {
                    self.coordinator.enable().await;
                    self.coordinator.sync_with_configuration().await;
                } else {
                    self.coordinator.disable().await;
                }
                Response::Ack { applied: true }
            }
            Request::ToggleFeature { name, enabled } => {
                let applied = match self.coordinator.toggle_feature(&name, enabled).await {
                    Ok(applied) => applied,
                    Err(e) => {
                        warn!(feature = %name, error = %e, "Toggle ignored");
                        false
                    }
                };
                Response::Ack { applied }
            }
            Request::GetMetrics => Response::Metrics {
                metrics: self.coordinator.get_metrics(),
            },
            Request::RequestSnapshot => Response::Snapshot {
                snapshot: self.coordinator.request_snapshot().await,
            },
            Request::StartProfile { options } => Response::ProfileStarted {
                session_id: self.profiler.start_profiling(options),
            },
            Request::StopProfile { session_id } => {
                match self.profiler.stop_profiling(&session_id).await {
                    Ok(profile) => Response::ProfileReport { profile },
                    Err(e) => Response::error(&e),
                }
            }
            Request::ExportCsv => match self.coordinator.export_csv() {
                Ok(csv) => Response::Csv { csv },
                Err(e) => {
                    warn!(error = %e, "CSV export failed");
                    Response::Csv { csv: String::new() }
                }
            },
            Request::GetActiveProfile => Response::ActiveProfile {
                name: self.config.active_profile(),
            },
            Request::SetActiveProfile { name } => match self.config.set_active_profile(&name) {
                Ok(()) => {
                    self.coordinator.sync_with_configuration().await;
                    Response::Ack { applied: true }
                }
                Err(e) => Response::error(&e),
            },
            Request::CreateProfile { profile } => {
                let applied = match self.config.create_profile(profile) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "Profile not created");
                        false
                    }
                };
                Response::Ack { applied }
            }
            Request::DeleteProfile { name } => {
                let was_active = self.config.active_profile() == name;
                match self.config.delete_profile(&name) {
                    Ok(()) => {
                        if was_active {
                            self.coordinator.sync_with_configuration().await;
                        }
                        Response::Ack { applied: true }
                    }
                    Err(e) => Response::error(&e),
                }
            }
            Request::ListProfiles => Response::Profiles {
                profiles: self.config.list_profiles(),
            },
            Request::GenerateReport => Response::Report {
                report: Box::new(self.coordinator.generate_report()),
            },
        }
    }

    /// Handle a JSON request and return a JSON response; never fails
    pub async fn handle_message(&self, message: &str) -> String {
        let response = match serde_json::from_str::<Request>(message) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!(error = %e, "Malformed control request");
                Response::invalid_request(e.to_string())
            }
        };
        serde_json::to_string(&response).unwrap_or_else(|e| {
            let fallback = Response::Error {
                code: MemoryError::Serialization(e).code().to_string(),
                message: "response could not be serialized".to_string(),
            };
            serde_json::to_string(&fallback).unwrap_or_default()
        })
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
    }
}
