//! Feature contract and lifecycle
//!
//! A feature is a pluggable mitigation or observation policy. Implementors only
//! provide [`Feature::state`] and whichever `on_*` hooks they need; the provided
//! lifecycle methods enforce the shared contract:
//!
//! - `enable`/`disable` are idempotent and run the hook only on a real transition
//! - `disable` aborts every feature-owned timer before running `on_disable`
//! - every other entry point is a no-op while the feature is disabled
//! - `handle_system_resume` always counts as one activation; sleep never does
//! - `apply_configuration` restarts the timers of a running feature whose
//!   settings changed
//!
//! A failing hook never rolls back the state transition. Its error is returned to
//! the caller, which logs it and carries on with the remaining features.

mod state;

pub use state::FeatureState;

use async_trait::async_trait;
use config_manager::{FeatureConfig, GlobalSettings};
use pressure_types::{FeatureMetrics, Intervention, MonitoredTarget, PressureAlert, Result};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, info};

/// Trait that all features must implement
#[async_trait]
pub trait Feature: Send + Sync + 'static {
    /// Shared state carried by the feature
    fn state(&self) -> &Arc<FeatureState>;

    /// Access to the concrete type, for callers that need feature-specific APIs
    fn as_any(&self) -> &dyn Any;

    /// Feature name (configuration key)
    fn name(&self) -> &str {
        self.state().name()
    }

    /// Whether the feature is enabled
    fn is_enabled(&self) -> bool {
        self.state().is_enabled()
    }

    /// Snapshot copy of the feature metrics
    fn metrics(&self) -> FeatureMetrics {
        self.state().metrics()
    }

    /// Extra section this feature contributes to reports, keyed by section name
    fn report_section(&self) -> Option<(String, Value)> {
        None
    }

    /// Adopt settings from the effective configuration
    ///
    /// Returns true if anything changed. Timers started by `on_enable` keep
    /// their period until the feature restarts them.
    fn configure(&self, _feature: &FeatureConfig, _global: &GlobalSettings) -> bool {
        false
    }

    /// Called after the feature was enabled
    async fn on_enable(&self) -> Result<()> {
        Ok(())
    }

    /// Called after the feature was disabled and its timers were cancelled
    async fn on_disable(&self) -> Result<()> {
        Ok(())
    }

    /// Called for every target the feature is applied to
    async fn on_apply_to_target(&self, _target: Arc<dyn MonitoredTarget>) -> Result<()> {
        Ok(())
    }

    /// Called when the system is about to sleep
    async fn on_system_sleep(&self) -> Result<()> {
        Ok(())
    }

    /// Called when the system resumed
    async fn on_system_resume(&self) -> Result<()> {
        Ok(())
    }

    /// Called when a target reached high or critical memory pressure
    async fn on_pressure(
        &self,
        _target: Arc<dyn MonitoredTarget>,
        _alert: &PressureAlert,
    ) -> Result<Option<Intervention>> {
        Ok(None)
    }

    /// Enable the feature
    async fn enable(&self) -> Result<()> {
        if !self.state().transition(true) {
            debug!(feature = self.name(), "Feature already enabled");
            return Ok(());
        }
        info!(feature = self.name(), "Feature enabled");
        self.on_enable().await
    }

    /// Disable the feature and cancel its timers
    async fn disable(&self) -> Result<()> {
        if !self.state().transition(false) {
            debug!(feature = self.name(), "Feature already disabled");
            return Ok(());
        }
        self.state().cancel_timers();
        info!(feature = self.name(), "Feature disabled");
        self.on_disable().await
    }

    /// Adopt new settings, restarting the timers of a running feature
    async fn apply_configuration(
        &self,
        feature: &FeatureConfig,
        global: &GlobalSettings,
    ) -> Result<()> {
        if !self.configure(feature, global) {
            return Ok(());
        }
        debug!(feature = self.name(), "Feature settings changed");
        if !self.is_enabled() {
            return Ok(());
        }
        self.state().cancel_timers();
        self.on_enable().await
    }

    /// Apply the feature to a target
    async fn apply_to_target(&self, target: Arc<dyn MonitoredTarget>) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.on_apply_to_target(target).await
    }

    /// Forward a system sleep notification
    async fn handle_system_sleep(&self) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.on_system_sleep().await
    }

    /// Forward a system resume notification and count it as an activation
    async fn handle_system_resume(&self) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let result = self.on_system_resume().await;
        self.state().record_activation(0);
        result
    }

    /// Forward a pressure alert for a target
    async fn handle_pressure(
        &self,
        target: Arc<dyn MonitoredTarget>,
        alert: &PressureAlert,
    ) -> Result<Option<Intervention>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        self.on_pressure(target, alert).await
    }
}
