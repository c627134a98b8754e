//! Statistical memory-pressure prediction
//!
//! [`PressurePredictor`] keeps a bounded window of [`DataPoint`]s and three
//! incrementally updated models (trend, seasonality, anomalies). `predict`
//! combines a linear regression of recent growth with those models into a risk
//! level, a projected memory value and an estimated time until the limit.
//!
//! All computation is synchronous and allocation-light; callers own the
//! predictor and feed it from whatever sampling loop they run.

mod config;
mod models;
mod predictor;

pub use config::PredictorConfig;
pub use models::{AnomalyDetector, SeasonalModel, Trend, TrendModel};
pub use predictor::{
    recommendation_for, Assessment, DataPoint, PredictionFactors, PredictionResult,
    PressurePredictor,
};
