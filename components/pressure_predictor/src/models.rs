//! Incrementally updated sub-models: trend, seasonality and anomalies

use chrono::{Datelike, Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// Direction of the smoothed memory curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Increasing => write!(f, "increasing"),
            Self::Decreasing => write!(f, "decreasing"),
            Self::Stable => write!(f, "stable"),
        }
    }
}

/// Exponential smoothing with a ±1% change threshold
#[derive(Debug, Clone)]
pub struct TrendModel {
    alpha: f64,
    smoothed: Option<f64>,
    trend: Trend,
}

impl TrendModel {
    const CHANGE_THRESHOLD: f64 = 0.01;

    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            smoothed: None,
            trend: Trend::Stable,
        }
    }

    pub fn update(&mut self, value: f64) {
        let previous = match self.smoothed {
            Some(previous) => previous,
            None => {
                self.smoothed = Some(value);
                return;
            }
        };

        let current = self.alpha.mul_add(value, (1.0 - self.alpha) * previous);
        self.smoothed = Some(current);

        if previous.abs() < f64::EPSILON {
            self.trend = if current > 0.0 {
                Trend::Increasing
            } else {
                Trend::Stable
            };
            return;
        }

        let change = (current - previous) / previous;
        self.trend = if change > Self::CHANGE_THRESHOLD {
            Trend::Increasing
        } else if change < -Self::CHANGE_THRESHOLD {
            Trend::Decreasing
        } else {
            Trend::Stable
        };
    }

    pub fn trend(&self) -> Trend {
        self.trend
    }

    pub fn smoothed(&self) -> Option<f64> {
        self.smoothed
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    average: f64,
    count: u64,
}

impl Bucket {
    fn add(&mut self, value: f64) {
        let n = self.count as f64;
        self.average = (self.average * n + value) / (n + 1.0);
        self.count += 1;
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then_some(self.average)
    }
}

/// Running averages bucketed by local hour-of-day and day-of-week
#[derive(Debug, Clone, Default)]
pub struct SeasonalModel {
    hourly: [Bucket; 24],
    daily: [Bucket; 7],
}

impl SeasonalModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(timestamp_ms: u64) -> Option<(usize, usize)> {
        let time = Local.timestamp_millis_opt(timestamp_ms as i64).single()?;
        Some((
            time.hour() as usize,
            time.weekday().num_days_from_monday() as usize,
        ))
    }

    pub fn update(&mut self, timestamp_ms: u64, value: f64) {
        if let Some((hour, day)) = Self::slots(timestamp_ms) {
            self.hourly[hour].add(value);
            self.daily[day].add(value);
        }
    }

    /// Expected value at `timestamp_ms`: mean of the matching hour and day buckets
    pub fn expected(&self, timestamp_ms: u64) -> Option<f64> {
        let (hour, day) = Self::slots(timestamp_ms)?;
        match (self.hourly[hour].value(), self.daily[day].value()) {
            (Some(h), Some(d)) => Some((h + d) / 2.0),
            (h, d) => h.or(d),
        }
    }

    /// Relative deviation of `value` from the expectation at `timestamp_ms`
    pub fn deviation(&self, timestamp_ms: u64, value: f64) -> f64 {
        match self.expected(timestamp_ms) {
            Some(expected) if expected.abs() > f64::EPSILON => (value - expected) / expected,
            _ => 0.0,
        }
    }
}

/// Welford online mean/variance with a z-score based anomaly score
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    count: u64,
    mean: f64,
    m2: f64,
    last_score: f64,
}

impl AnomalyDetector {
    const ANOMALY_THRESHOLD: f64 = 0.8;

    pub fn new() -> Self {
        Self::default()
    }

    /// Score `value` against the history so far, then absorb it
    pub fn update(&mut self, value: f64) {
        self.last_score = self.score(value);

        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample standard deviation; zero with fewer than two values
    pub fn std_dev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / (self.count - 1) as f64).sqrt()
    }

    /// `min(1, |z| / 3)`, zero while the deviation is degenerate
    pub fn score(&self, value: f64) -> f64 {
        let std_dev = self.std_dev();
        if std_dev < f64::EPSILON {
            return 0.0;
        }
        ((value - self.mean).abs() / std_dev / 3.0).min(1.0)
    }

    /// Score of the most recently absorbed value
    pub fn last_score(&self) -> f64 {
        self.last_score
    }

    pub fn is_anomaly(&self) -> bool {
        self.last_score > Self::ANOMALY_THRESHOLD
    }
}
