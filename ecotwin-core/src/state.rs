use std::sync::Arc;

use anyhow::Context;

use crate::config::Config;
use crate::digital_twin::TwinHandle;
use crate::history::{self, HistoryStore};
use crate::middleware::observability::Metrics;
use crate::middleware::rate_limit::CallerRateLimiter;
use crate::orchestrator::ComparisonOrchestrator;
use crate::prediction::PredictionService;

/// Everything the protocol surfaces share. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub project_name: Arc<str>,
    pub metrics_path: Arc<str>,
    pub orchestrator: ComparisonOrchestrator,
    pub predictions: PredictionService,
    pub metrics: Metrics,
    pub limiter: Arc<CallerRateLimiter>,
}

impl AppState {
    pub async fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let history = history::open_store(&cfg.history)
            .await
            .context("opening history store")?;
        Ok(Self::with_parts(cfg, TwinHandle::new(cfg.twin.clone()), history, Metrics::new()))
    }

    pub fn with_parts(cfg: &Config, twin: TwinHandle, history: Arc<dyn HistoryStore>, metrics: Metrics) -> Self {
        Self {
            project_name: cfg.project_name.as_str().into(),
            metrics_path: cfg.core.observability.metrics_path.as_str().into(),
            orchestrator: ComparisonOrchestrator::new(twin, history.clone(), metrics.clone()),
            predictions: PredictionService::from_config(history, &cfg.prediction),
            metrics,
            limiter: Arc::new(CallerRateLimiter::new_per_second(cfg.core.rate_limit_per_second)),
        }
    }
}
