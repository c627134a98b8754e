//! Rolling-window memory pressure prediction

use crate::config::PredictorConfig;
use crate::models::{AnomalyDetector, SeasonalModel, Trend, TrendModel};
use pressure_types::{now_millis, RiskLevel};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

const MS_PER_MINUTE: f64 = 60_000.0;

/// One memory sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub memory_bytes: u64,
    pub cpu_percent: f64,
    pub event_loop_lag_ms: f64,
}

impl DataPoint {
    /// Sample with only a memory reading
    pub fn new(timestamp: u64, memory_bytes: u64) -> Self {
        Self {
            timestamp,
            memory_bytes,
            cpu_percent: 0.0,
            event_loop_lag_ms: 0.0,
        }
    }

    pub fn with_cpu(mut self, cpu_percent: f64) -> Self {
        self.cpu_percent = cpu_percent;
        self
    }

    pub fn with_event_loop_lag(mut self, lag_ms: f64) -> Self {
        self.event_loop_lag_ms = lag_ms;
        self
    }
}

/// Inputs that went into a prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionFactors {
    pub trend: Trend,
    /// Coefficient of variation of memory over the history
    pub volatility: f64,
    /// Bytes per minute
    pub growth_rate: f64,
    /// Change in growth rate between the halves of the regression window
    pub acceleration: f64,
    pub anomaly_score: f64,
    /// Relative deviation from the hour/day expectation
    pub seasonal_deviation: f64,
}

/// Outcome of [`PressurePredictor::predict`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub timestamp: u64,
    pub current_memory: u64,
    pub predicted_memory: u64,
    /// Milliseconds until the memory limit is reached, if it ever is
    pub time_to_limit_ms: Option<u64>,
    pub confidence: f64,
    pub risk: RiskLevel,
    pub recommendation: String,
    pub factors: PredictionFactors,
}

/// Instantaneous classification from a single reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub risk: RiskLevel,
    pub recommendation: String,
}

/// Slope of memory (bytes) over time (minutes); zero when time has no spread
fn growth_rate_of(points: &[DataPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    let n = points.len() as f64;
    let base = points[0].timestamp as f64;
    let xs: Vec<f64> = points
        .iter()
        .map(|p| (p.timestamp as f64 - base) / MS_PER_MINUTE)
        .collect();
    let ys: Vec<f64> = points.iter().map(|p| p.memory_bytes as f64).collect();

    let sum_x: f64 = xs.iter().sum();
    let sum_y: f64 = ys.iter().sum();
    let sum_xy: f64 = xs.iter().zip(&ys).map(|(x, y)| x * y).sum();
    let sum_xx: f64 = xs.iter().map(|x| x * x).sum();

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denominator
}

/// Human-readable advice for a risk level
pub fn recommendation_for(
    risk: RiskLevel,
    time_to_limit_minutes: Option<f64>,
    urgent_minutes: f64,
) -> String {
    match risk {
        RiskLevel::Critical => {
            "Critical memory pressure: reload or close this target now to avoid running out of memory"
                .to_string()
        }
        RiskLevel::High => match time_to_limit_minutes {
            Some(minutes) if minutes < urgent_minutes => format!(
                "High memory pressure: limit expected in about {:.0} minutes, run cleanup now",
                minutes.max(0.0)
            ),
            _ => "High memory pressure: schedule a cleanup soon".to_string(),
        },
        RiskLevel::Medium => "Memory usage is rising: keep monitoring".to_string(),
        RiskLevel::Low => "Memory usage is normal".to_string(),
    }
}

/// Bounded history plus incrementally updated models
#[derive(Debug, Clone)]
pub struct PressurePredictor {
    config: PredictorConfig,
    history: VecDeque<DataPoint>,
    trend: TrendModel,
    seasonal: SeasonalModel,
    anomaly: AnomalyDetector,
}

impl PressurePredictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            trend: TrendModel::new(config.smoothing_alpha),
            history: VecDeque::with_capacity(config.history_size),
            seasonal: SeasonalModel::new(),
            anomaly: AnomalyDetector::new(),
            config,
        }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Append a sample, evicting the oldest past the history size
    pub fn add_data_point(&mut self, point: DataPoint) {
        let memory = point.memory_bytes as f64;
        self.trend.update(memory);
        self.seasonal.update(point.timestamp, memory);
        self.anomaly.update(memory);

        self.history.push_back(point);
        while self.history.len() > self.config.history_size {
            self.history.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Copy of the retained samples, oldest first
    pub fn history(&self) -> Vec<DataPoint> {
        self.history.iter().copied().collect()
    }

    /// Switch to new thresholds, replaying the retained history into fresh models
    pub fn set_config(&mut self, config: PredictorConfig) {
        if config == self.config {
            return;
        }
        let history = std::mem::take(&mut self.history);
        *self = Self::new(config);
        for point in history {
            self.add_data_point(point);
        }
    }

    /// Drop the history and every model
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    fn window(&self) -> Vec<DataPoint> {
        let take = self.config.regression_window.min(self.history.len());
        self.history
            .iter()
            .skip(self.history.len() - take)
            .copied()
            .collect()
    }

    /// Growth in bytes per minute over the most recent regression window
    pub fn calculate_growth_rate(&self) -> f64 {
        growth_rate_of(&self.window())
    }

    /// Growth rate of the newer half of the window minus that of the older half
    pub fn calculate_acceleration(&self) -> f64 {
        let window = self.window();
        let half = window.len() / 2;
        growth_rate_of(&window[half..]) - growth_rate_of(&window[..half])
    }

    /// Coefficient of variation of memory over the whole history
    pub fn calculate_volatility(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let n = self.history.len() as f64;
        let mean = self.history.iter().map(|p| p.memory_bytes as f64).sum::<f64>() / n;
        if mean.abs() < f64::EPSILON {
            return 0.0;
        }
        let variance = self
            .history
            .iter()
            .map(|p| (p.memory_bytes as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        variance.sqrt() / mean
    }

    /// Shrinking memory with any curvature counts as significant
    fn significant_acceleration(growth_rate: f64, acceleration: f64) -> bool {
        acceleration.abs() > 0.1 * growth_rate
    }

    /// Minutes until `remaining` more bytes have been allocated
    fn minutes_to_limit(remaining: f64, growth_rate: f64, acceleration: f64) -> Option<f64> {
        if remaining <= 0.0 {
            return Some(0.0);
        }
        if growth_rate <= 0.0 && acceleration <= 0.0 {
            return None;
        }

        if Self::significant_acceleration(growth_rate, acceleration) {
            // 0.5·a·t² + g·t − remaining = 0
            let discriminant = growth_rate * growth_rate + 2.0 * acceleration * remaining;
            if discriminant < 0.0 {
                return None;
            }
            let root = discriminant.sqrt();
            [(-growth_rate + root) / acceleration, (-growth_rate - root) / acceleration]
                .into_iter()
                .filter(|t| t.is_finite() && *t > 0.0)
                .min_by(|a, b| a.total_cmp(b))
        } else if growth_rate > 0.0 {
            Some(remaining / growth_rate)
        } else {
            None
        }
    }

    fn classify(
        &self,
        current: f64,
        predicted: f64,
        growth_rate: f64,
        minutes_to_limit: Option<f64>,
    ) -> RiskLevel {
        let config = &self.config;
        let current_pct = config.percent_of_limit(current);
        let predicted_pct = config.percent_of_limit(predicted);
        let within = |limit: f64| minutes_to_limit.map_or(false, |t| t < limit);

        if current_pct >= config.critical_threshold || within(config.critical_time_minutes) {
            RiskLevel::Critical
        } else if current_pct >= config.warning_threshold
            || predicted_pct >= config.critical_threshold
            || within(config.high_time_minutes)
        {
            RiskLevel::High
        } else if predicted_pct >= config.warning_threshold
            || (growth_rate > config.fast_growth_per_minute && minutes_to_limit.is_some())
        {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    fn confidence(&self, volatility: f64, anomaly_score: f64) -> f64 {
        let missing = 20usize.saturating_sub(self.history.len()) as f64;
        let confidence = 1.0 - volatility.min(0.3) - 0.02 * missing - 0.2 * anomaly_score;
        confidence.clamp(0.1, 1.0)
    }

    /// Project memory over the horizon; `None` until enough samples exist
    pub fn predict(&self) -> Option<PredictionResult> {
        if self.history.len() < self.config.min_data_points {
            return None;
        }
        let latest = *self.history.back()?;
        let current = latest.memory_bytes as f64;

        let growth_rate = self.calculate_growth_rate();
        let acceleration = self.calculate_acceleration();
        let volatility = self.calculate_volatility();

        let t = self.config.prediction_horizon_minutes;
        let predicted = if Self::significant_acceleration(growth_rate, acceleration) {
            current + growth_rate * t + 0.5 * acceleration * t * t
        } else {
            current + growth_rate * t
        }
        .max(0.0);

        let remaining = self.config.memory_limit as f64 - current;
        let minutes_to_limit = Self::minutes_to_limit(remaining, growth_rate, acceleration);
        let risk = self.classify(current, predicted, growth_rate, minutes_to_limit);
        let anomaly_score = self.anomaly.last_score();

        debug!(
            current = latest.memory_bytes,
            predicted = predicted as u64,
            growth_rate,
            acceleration,
            %risk,
            "Memory prediction"
        );

        Some(PredictionResult {
            timestamp: now_millis(),
            current_memory: latest.memory_bytes,
            predicted_memory: predicted as u64,
            time_to_limit_ms: minutes_to_limit.map(|m| (m * MS_PER_MINUTE) as u64),
            confidence: self.confidence(volatility, anomaly_score),
            risk,
            recommendation: recommendation_for(
                risk,
                minutes_to_limit,
                self.config.urgent_time_minutes,
            ),
            factors: PredictionFactors {
                trend: self.trend.trend(),
                volatility,
                growth_rate,
                acceleration,
                anomaly_score,
                seasonal_deviation: self.seasonal.deviation(latest.timestamp, current),
            },
        })
    }

    /// Classify a single reading against the thresholds, without history
    pub fn assess_current(&self, memory_bytes: u64) -> Assessment {
        let pct = self.config.percent_of_limit(memory_bytes as f64);
        let risk = if pct >= self.config.critical_threshold {
            RiskLevel::Critical
        } else if pct >= self.config.warning_threshold {
            RiskLevel::High
        } else {
            RiskLevel::Low
        };
        Assessment {
            risk,
            recommendation: recommendation_for(risk, None, self.config.urgent_time_minutes),
        }
    }
}

impl Default for PressurePredictor {
    fn default() -> Self {
        Self::new(PredictorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pressure_types::{GB, MB};

    const START: u64 = 1_700_000_000_000;
    const MINUTE: u64 = 60_000;

    fn feed(predictor: &mut PressurePredictor, values: impl IntoIterator<Item = u64>) {
        for (i, memory) in values.into_iter().enumerate() {
            predictor.add_data_point(DataPoint::new(START + i as u64 * MINUTE, memory));
        }
    }

    #[test]
    fn test_predict_requires_min_points() {
        let mut predictor = PressurePredictor::default();
        feed(&mut predictor, (0..9).map(|i| GB + i * MB));
        assert!(predictor.predict().is_none());

        predictor.add_data_point(DataPoint::new(START + 9 * MINUTE, GB + 9 * MB));
        assert!(predictor.predict().is_some());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut predictor = PressurePredictor::new(PredictorConfig::new().with_history_size(5));
        feed(&mut predictor, (0..12).map(|i| i * MB));

        let history = predictor.history();
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].memory_bytes, 7 * MB);
    }

    #[test]
    fn test_zero_time_spread_gives_zero_growth() {
        let mut predictor = PressurePredictor::default();
        for i in 0..10 {
            predictor.add_data_point(DataPoint::new(START, GB + i * MB));
        }
        assert_eq!(predictor.calculate_growth_rate(), 0.0);
        assert!(predictor.predict().is_some());
    }

    #[test]
    fn test_flat_memory_never_reaches_limit() {
        let mut predictor = PressurePredictor::default();
        feed(&mut predictor, std::iter::repeat(GB).take(15));

        let result = predictor.predict().unwrap();
        assert_eq!(result.time_to_limit_ms, None);
        assert_eq!(result.risk, RiskLevel::Low);
        assert_eq!(result.factors.trend, Trend::Stable);
        assert_eq!(result.factors.volatility, 0.0);
    }

    #[test]
    fn test_over_limit_is_critical_now() {
        let mut predictor = PressurePredictor::new(PredictorConfig::new().with_memory_limit(GB));
        feed(&mut predictor, std::iter::repeat(2 * GB).take(10));

        let result = predictor.predict().unwrap();
        assert_eq!(result.time_to_limit_ms, Some(0));
        assert_eq!(result.risk, RiskLevel::Critical);
        assert!(result.recommendation.starts_with("Critical"));
    }

    #[test]
    fn test_accelerating_growth_uses_quadratic() {
        let mut predictor = PressurePredictor::default();
        // memory = 1GB + i² MB: growth doubles across the window
        feed(&mut predictor, (0..20u64).map(|i| GB + i * i * MB));

        let growth = predictor.calculate_growth_rate();
        let acceleration = predictor.calculate_acceleration();
        assert!(acceleration > 0.1 * growth);

        let result = predictor.predict().unwrap();
        let current = (GB + 361 * MB) as f64;
        let linear = current + growth * 5.0;
        assert!(result.predicted_memory as f64 > linear);
        assert!(result.time_to_limit_ms.is_some());
    }

    #[test]
    fn test_quadratic_root_selection() {
        // decelerating: peaks at 0.5 MB before reaching 1 MB remaining
        assert_eq!(PressurePredictor::minutes_to_limit(1.0, 1.0, -1.0), None);
        // two positive roots: the first crossing is taken
        let t = PressurePredictor::minutes_to_limit(0.375, 1.0, -1.0).unwrap();
        assert!((t - 0.5).abs() < 1e-9);
        // shrinking memory never reaches the limit
        assert_eq!(PressurePredictor::minutes_to_limit(10.0, -1.0, 0.0), None);
        assert_eq!(PressurePredictor::minutes_to_limit(10.0, 2.0, 0.0), Some(5.0));
    }

    #[test]
    fn test_recovering_growth_reaches_limit() {
        // shrinking at 10 MB/min but accelerating by 0.5 MB/min²
        let t = PressurePredictor::minutes_to_limit(500.0, -10.0, 0.5).unwrap();
        let expected = (10.0 + 600f64.sqrt()) / 0.5;
        assert!((t - expected).abs() < 1e-9);
        assert!(PressurePredictor::significant_acceleration(-10.0, 0.5));
        assert!(!PressurePredictor::significant_acceleration(10.0, 0.5));
    }

    #[test]
    fn test_set_config_keeps_history() {
        let mut predictor = PressurePredictor::default();
        feed(&mut predictor, std::iter::repeat(GB).take(12));
        assert_eq!(predictor.predict().unwrap().risk, RiskLevel::Low);

        predictor.set_config(PredictorConfig::new().with_memory_limit(GB + GB / 10));
        assert_eq!(predictor.len(), 12);
        assert_eq!(predictor.config().memory_limit, GB + GB / 10);
        assert_eq!(predictor.predict().unwrap().risk, RiskLevel::Critical);

        predictor.set_config(PredictorConfig::new().with_history_size(5));
        assert_eq!(predictor.len(), 5);
    }

    #[test]
    fn test_confidence_penalises_scarcity() {
        let mut short = PressurePredictor::default();
        feed(&mut short, std::iter::repeat(GB).take(10));
        let mut long = PressurePredictor::default();
        feed(&mut long, std::iter::repeat(GB).take(25));

        let short = short.predict().unwrap().confidence;
        let long = long.predict().unwrap().confidence;
        assert!((short - 0.8).abs() < 1e-9);
        assert!((long - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_assess_current() {
        let predictor = PressurePredictor::default();
        assert_eq!(predictor.assess_current(GB).risk, RiskLevel::Low);
        assert_eq!(predictor.assess_current(3 * GB + GB / 4).risk, RiskLevel::High);

        let critical = predictor.assess_current(4 * GB * 95 / 100);
        assert_eq!(critical.risk, RiskLevel::Critical);
        assert!(critical.recommendation.to_lowercase().contains("critical"));
    }

    #[test]
    fn test_high_recommendation_mentions_urgency() {
        let urgent = recommendation_for(RiskLevel::High, Some(7.2), 10.0);
        assert!(urgent.contains("7 minutes"));
        let later = recommendation_for(RiskLevel::High, Some(12.0), 10.0);
        assert!(!later.contains("minutes"));
    }

    #[test]
    fn test_reset() {
        let mut predictor = PressurePredictor::default();
        feed(&mut predictor, (0..10).map(|i| i * MB));
        predictor.reset();
        assert!(predictor.is_empty());
        assert!(predictor.predict().is_none());
    }
}
