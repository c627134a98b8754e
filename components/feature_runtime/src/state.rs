//! Shared feature state: enabled flag, metrics and owned timers

use parking_lot::Mutex;
use pressure_types::{now_millis, FeatureMetrics};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// State every feature carries
///
/// The enabled flag and the metrics are updated under the same lock, so once
/// `transition(false)` returns no caller can record another activation.
#[derive(Debug)]
pub struct FeatureState {
    name: String,
    enabled: AtomicBool,
    metrics: Mutex<FeatureMetrics>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl FeatureState {
    /// Create the state for a feature; features start disabled
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            enabled: AtomicBool::new(false),
            metrics: Mutex::new(FeatureMetrics::default()),
            timers: Mutex::new(Vec::new()),
        })
    }

    /// Feature name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the feature is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Move to `enabled`; returns false if the feature was already in that state
    pub fn transition(&self, enabled: bool) -> bool {
        let _metrics = self.metrics.lock();
        self.enabled
            .compare_exchange(!enabled, enabled, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Snapshot copy of the metrics
    pub fn metrics(&self) -> FeatureMetrics {
        self.metrics.lock().clone()
    }

    /// Count one activation; ignored while the feature is disabled
    pub fn record_activation(&self, memory_saved: u64) {
        let mut metrics = self.metrics.lock();
        if !self.enabled.load(Ordering::SeqCst) {
            debug!(feature = %self.name, "Ignoring activation of disabled feature");
            return;
        }
        metrics.activations += 1;
        metrics.memory_saved = metrics.memory_saved.saturating_add(memory_saved);
        metrics.last_run = Some(now_millis());
    }

    /// Add freed bytes without counting an activation
    pub fn add_memory_saved(&self, memory_saved: u64) {
        let mut metrics = self.metrics.lock();
        if self.enabled.load(Ordering::SeqCst) {
            metrics.memory_saved = metrics.memory_saved.saturating_add(memory_saved);
        }
    }

    /// Run `tick` every `period` until the feature is disabled
    ///
    /// The first tick fires one full period after the call.
    pub fn spawn_interval<F, Fut>(self: &Arc<Self>, period: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let state = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !state.is_enabled() {
                    break;
                }
                tick().await;
            }
        });
        self.timers.lock().push(handle);
    }

    /// Number of timers currently owned
    pub fn timer_count(&self) -> usize {
        self.timers.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Abort every owned timer
    pub fn cancel_timers(&self) {
        let timers: Vec<JoinHandle<()>> = self.timers.lock().drain(..).collect();
        if !timers.is_empty() {
            debug!(feature = %self.name, count = timers.len(), "Cancelling feature timers");
        }
        for timer in timers {
            timer.abort();
        }
    }
}

impl Drop for FeatureState {
    fn drop(&mut self) {
        for timer in self.timers.get_mut().drain(..) {
            timer.abort();
        }
    }
}
