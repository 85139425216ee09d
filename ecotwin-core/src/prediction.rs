//! Prediction strategies fed from the score history.
//!
//! Strategies sit behind small traits so they can be swapped for heavier
//! models. The core only hands them history (baseline scores in insertion
//! order, or baseline records for the explainer) and relays their errors,
//! including [`Error::InsufficientHistory`], unchanged.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ExplainerConfig, ForecasterConfig, PredictionConfig, TrendConfig};
use crate::error::{ensure_reading, Error, Result};
use crate::history::{baseline_scores, HistoryStore, ScoreRecord};
use crate::scoring::{IMPACT_SCALE, MAX_SCORE};

/// Share of a baseline's total impact attributed to each feature when
/// building explainer training rows.
pub const ENERGY_SHARE: f64 = 0.5;
pub const WATER_SHARE: f64 = 0.3;
pub const TRAFFIC_SHARE: f64 = 0.2;

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Straight-line decline from a fixed starting score.
#[derive(Debug, Clone, Copy)]
pub struct TrendExtrapolation {
    pub base_score: f64,
    pub decline_per_day: f64,
}

impl From<TrendConfig> for TrendExtrapolation {
    fn from(c: TrendConfig) -> Self {
        Self { base_score: c.base_score, decline_per_day: c.decline_per_day }
    }
}

impl TrendExtrapolation {
    pub fn predict_future_score(&self, days_ahead: f64) -> Result<f64> {
        let days = ensure_reading("days", days_ahead)?;
        Ok(round2((self.base_score - days * self.decline_per_day).max(0.0)))
    }
}

pub trait ScoreForecaster: Send + Sync {
    /// Predicts the next score from historical scores in insertion order.
    fn predict_next_value(&self, scores: &[f64]) -> Result<f64>;
}

/// Extends a least-squares line through the most recent `window` scores by
/// one step.
#[derive(Debug, Clone, Copy)]
pub struct LinearWindowForecaster {
    pub window: usize,
    pub min_samples: usize,
}

impl From<ForecasterConfig> for LinearWindowForecaster {
    fn from(c: ForecasterConfig) -> Self {
        Self { window: c.window.max(1), min_samples: c.min_samples.max(1) }
    }
}

impl ScoreForecaster for LinearWindowForecaster {
    fn predict_next_value(&self, scores: &[f64]) -> Result<f64> {
        if scores.len() < self.min_samples {
            return Err(Error::InsufficientHistory { required: self.min_samples, available: scores.len() });
        }

        let tail = &scores[scores.len().saturating_sub(self.window.max(1))..];
        let n = tail.len() as f64;
        let x_mean = (n - 1.0) / 2.0;
        let y_mean = tail.iter().sum::<f64>() / n;

        let (mut cov, mut var) = (0.0, 0.0);
        for (i, y) in tail.iter().enumerate() {
            let dx = i as f64 - x_mean;
            cov += dx * (y - y_mean);
            var += dx * dx;
        }
        let slope = if var > 0.0 { cov / var } else { 0.0 };

        let next = y_mean + slope * (n - x_mean);
        debug!(window = tail.len(), slope, next, "forecast computed");
        Ok(round2(next.clamp(0.0, MAX_SCORE)))
    }
}

/// Per-feature contribution to a predicted score.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Attribution {
    pub energy_contribution: f64,
    pub water_contribution: f64,
    pub traffic_contribution: f64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ImpactFeatures {
    pub energy: f64,
    pub water: f64,
    pub traffic: f64,
}

pub trait ImpactExplainer: Send + Sync {
    fn explain(&self, training: &[ScoreRecord], features: ImpactFeatures) -> Result<Attribution>;
}

/// Fits `score ~ a + b * impact` over baseline records and attributes
/// `b * (x - mean(x))` to each feature, which is the exact Shapley value for
/// a linear model.
#[derive(Debug, Clone, Copy)]
pub struct LinearSurrogateExplainer {
    pub min_samples: usize,
}

impl From<ExplainerConfig> for LinearSurrogateExplainer {
    fn from(c: ExplainerConfig) -> Self {
        Self { min_samples: c.min_samples.max(1) }
    }
}

impl ImpactExplainer for LinearSurrogateExplainer {
    fn explain(&self, training: &[ScoreRecord], features: ImpactFeatures) -> Result<Attribution> {
        ensure_reading("energy", features.energy)?;
        ensure_reading("water", features.water)?;
        ensure_reading("traffic", features.traffic)?;

        let rows: Vec<(f64, f64)> = training
            .iter()
            .filter_map(|r| Some((r.total_impact()?, r.score()?)))
            .collect();
        if rows.len() < self.min_samples {
            return Err(Error::InsufficientHistory { required: self.min_samples, available: rows.len() });
        }

        let n = rows.len() as f64;
        let impact_mean = rows.iter().map(|(i, _)| i).sum::<f64>() / n;
        let score_mean = rows.iter().map(|(_, s)| s).sum::<f64>() / n;
        let (mut cov, mut var) = (0.0, 0.0);
        for (impact, score) in &rows {
            cov += (impact - impact_mean) * (score - score_mean);
            var += (impact - impact_mean).powi(2);
        }
        // All samples at one impact carry no slope information; fall back to
        // the scoring formula's own gradient.
        let slope = if var > 0.0 { cov / var } else { -1.0 / IMPACT_SCALE };

        Ok(Attribution {
            energy_contribution: round2(slope * (features.energy - ENERGY_SHARE * impact_mean)),
            water_contribution: round2(slope * (features.water - WATER_SHARE * impact_mean)),
            traffic_contribution: round2(slope * (features.traffic - TRAFFIC_SHARE * impact_mean)),
        })
    }
}

/// Runs the configured strategies against the live history.
#[derive(Clone)]
pub struct PredictionService {
    history: Arc<dyn HistoryStore>,
    trend: TrendExtrapolation,
    forecaster: Arc<dyn ScoreForecaster>,
    explainer: Arc<dyn ImpactExplainer>,
}

impl PredictionService {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        trend: TrendExtrapolation,
        forecaster: Arc<dyn ScoreForecaster>,
        explainer: Arc<dyn ImpactExplainer>,
    ) -> Self {
        Self { history, trend, forecaster, explainer }
    }

    pub fn from_config(history: Arc<dyn HistoryStore>, cfg: &PredictionConfig) -> Self {
        Self::new(
            history,
            cfg.trend.into(),
            Arc::new(LinearWindowForecaster::from(cfg.forecaster)),
            Arc::new(LinearSurrogateExplainer::from(cfg.explainer)),
        )
    }

    pub fn predict_future_score(&self, days_ahead: f64) -> Result<f64> {
        self.trend.predict_future_score(days_ahead)
    }

    pub async fn predict_next_value(&self) -> Result<f64> {
        let records = self.history.list_all().await?;
        self.forecaster.predict_next_value(&baseline_scores(&records))
    }

    pub async fn explain(&self, features: ImpactFeatures) -> Result<Attribution> {
        let records = self.history.list_all().await?;
        self.explainer.explain(&records, features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{MemoryHistoryStore, NewScoreRecord, UserId};
    use crate::scoring::score_for_impact;

    async fn history_with_impacts(impacts: &[f64]) -> Arc<dyn HistoryStore> {
        let store = Arc::new(MemoryHistoryStore::new());
        for &impact in impacts {
            store
                .append(NewScoreRecord::baseline(UserId::new("1"), impact, score_for_impact(impact)))
                .await
                .unwrap();
            // Simulation rows must be ignored by every strategy.
            store.append(NewScoreRecord::simulation(UserId::new("1"), 0.0, 100.0)).await.unwrap();
        }
        store
    }

    #[test]
    fn trend_declines_and_floors() {
        let t = TrendExtrapolation::from(TrendConfig::default());
        assert_eq!(t.predict_future_score(0.0).unwrap(), 85.0);
        assert_eq!(t.predict_future_score(2.0).unwrap(), 82.0);
        assert_eq!(t.predict_future_score(100.0).unwrap(), 0.0);
        assert!(t.predict_future_score(-1.0).is_err());
    }

    #[test]
    fn forecaster_needs_enough_samples() {
        let f = LinearWindowForecaster { window: 5, min_samples: 10 };
        let err = f.predict_next_value(&[80.0; 9]).unwrap_err();
        assert_eq!(err, Error::InsufficientHistory { required: 10, available: 9 });
    }

    #[test]
    fn forecaster_extends_recent_trend() {
        let f = LinearWindowForecaster { window: 5, min_samples: 3 };
        // Older samples are outside the window and must not matter.
        let scores = [10.0, 10.0, 90.0, 89.0, 88.0, 87.0, 86.0];
        assert_eq!(f.predict_next_value(&scores).unwrap(), 85.0);
        assert_eq!(f.predict_next_value(&[70.0, 70.0, 70.0]).unwrap(), 70.0);
    }

    #[test]
    fn explainer_attributes_deviation_from_mean() {
        let records: Vec<_> = [1000.0, 2000.0, 3000.0]
            .iter()
            .enumerate()
            .map(|(i, &impact)| ScoreRecord {
                id: i as u64 + 1,
                user_id: UserId::new("1"),
                timestamp: chrono::Utc::now(),
                event: crate::history::ScoreEvent::Baseline { total_impact: impact, score: score_for_impact(impact) },
            })
            .collect();

        // Mean impact 2000 splits into feature means 1000 / 600 / 400.
        let a = LinearSurrogateExplainer { min_samples: 3 }
            .explain(&records, ImpactFeatures { energy: 1500.0, water: 600.0, traffic: 0.0 })
            .unwrap();
        assert_eq!(a.energy_contribution, -5.0);
        assert_eq!(a.water_contribution, 0.0);
        assert_eq!(a.traffic_contribution, 4.0);
    }

    #[tokio::test]
    async fn service_relays_insufficient_history() {
        let svc = PredictionService::from_config(history_with_impacts(&[1330.0, 1400.0]).await, &PredictionConfig::default());
        let err = svc
            .explain(ImpactFeatures { energy: 1.0, water: 1.0, traffic: 1.0 })
            .await
            .unwrap_err();
        assert_eq!(err, Error::InsufficientHistory { required: 3, available: 2 });
        assert_eq!(
            svc.predict_next_value().await.unwrap_err(),
            Error::InsufficientHistory { required: 10, available: 2 }
        );
    }

    #[tokio::test]
    async fn service_forecasts_from_baseline_scores() {
        let impacts: Vec<f64> = (0..10).map(|i| 1000.0 + 100.0 * i as f64).collect();
        let svc = PredictionService::from_config(history_with_impacts(&impacts).await, &PredictionConfig::default());
        // Scores fall by one point per sample: 90, 89, ..., 81.
        assert_eq!(svc.predict_next_value().await.unwrap(), 80.0);
    }
}
