//! Predictor thresholds and horizons

use pressure_types::{GB, MB};
use serde::{Deserialize, Serialize};

/// Tunable thresholds of the pressure predictor
///
/// Every value is a heuristic default; hosts override them from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictorConfig {
    /// Maximum number of retained data points
    pub history_size: usize,
    /// Points required before `predict` returns a result
    pub min_data_points: usize,
    /// Most recent points used for growth regression
    pub regression_window: usize,
    /// How far ahead to project, in minutes
    pub prediction_horizon_minutes: f64,
    /// Memory budget in bytes
    pub memory_limit: u64,
    /// Percent of the limit that counts as a warning
    pub warning_threshold: f64,
    /// Percent of the limit that counts as critical
    pub critical_threshold: f64,
    /// Time to limit below which risk is critical, in minutes
    pub critical_time_minutes: f64,
    /// Time to limit below which risk is high, in minutes
    pub high_time_minutes: f64,
    /// Time to limit below which a high risk asks for immediate action
    pub urgent_time_minutes: f64,
    /// Growth rate (bytes per minute) considered fast
    pub fast_growth_per_minute: f64,
    /// Smoothing factor of the trend model
    pub smoothing_alpha: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            history_size: 100,
            min_data_points: 10,
            regression_window: 20,
            prediction_horizon_minutes: 5.0,
            memory_limit: 4 * GB,
            warning_threshold: 75.0,
            critical_threshold: 90.0,
            critical_time_minutes: 5.0,
            high_time_minutes: 15.0,
            urgent_time_minutes: 10.0,
            fast_growth_per_minute: (10 * MB) as f64,
            smoothing_alpha: 0.3,
        }
    }
}

impl PredictorConfig {
    /// Create a configuration with default thresholds
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the memory budget
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Set the warning and critical percentages
    pub fn with_thresholds(mut self, warning: f64, critical: f64) -> Self {
        self.warning_threshold = warning;
        self.critical_threshold = critical;
        self
    }

    /// Set the number of retained points
    pub fn with_history_size(mut self, size: usize) -> Self {
        self.history_size = size.max(1);
        self
    }

    /// Set the projection horizon in minutes
    pub fn with_prediction_horizon(mut self, minutes: f64) -> Self {
        self.prediction_horizon_minutes = minutes;
        self
    }

    /// Set the minimum number of points before predictions are made
    pub fn with_min_data_points(mut self, points: usize) -> Self {
        self.min_data_points = points.max(2);
        self
    }

    /// Percent of the limit that `bytes` represents
    pub fn percent_of_limit(&self, bytes: f64) -> f64 {
        if self.memory_limit == 0 {
            return 0.0;
        }
        bytes / self.memory_limit as f64 * 100.0
    }
}
