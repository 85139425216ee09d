//! Baseline scoring and baseline-vs-scenario comparison.
//!
//! Each call is one linear pipeline. `run_comparison` writes two independent
//! history records (a fresh baseline, then the simulation); if the second
//! append fails the baseline stays recorded and the whole call reports the
//! error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::digital_twin::{TwinHandle, TwinState};
use crate::error::Result;
use crate::history::{HistoryStore, HistorySummary, NewScoreRecord, ScoreRecord, UserId};
use crate::middleware::observability::Metrics;
use crate::scenario::{self, ProjectedState, ScenarioFactors};
use crate::scoring::{self, BaselineResult};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ComparisonResult {
    pub base_impact: f64,
    pub simulated_impact: f64,
    /// `simulated_impact - base_impact`; negative means the scenario helps.
    pub impact_difference: f64,
    pub base_score: f64,
    pub simulated_score: f64,
}

#[derive(Clone)]
pub struct ComparisonOrchestrator {
    twin: TwinHandle,
    history: Arc<dyn HistoryStore>,
    metrics: Metrics,
}

impl ComparisonOrchestrator {
    pub fn new(twin: TwinHandle, history: Arc<dyn HistoryStore>, metrics: Metrics) -> Self {
        Self { twin, history, metrics }
    }

    pub fn twin(&self) -> &TwinHandle {
        &self.twin
    }

    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// Scores the live twin and records a baseline event.
    pub async fn run_baseline(&self, user_id: &UserId) -> Result<BaselineResult> {
        let snapshot = self.twin.read().await;
        self.record_baseline(user_id, &snapshot).await
    }

    /// Records a fresh baseline, then scores the scenario against the same
    /// snapshot and records it as a simulation event.
    pub async fn run_comparison(&self, user_id: &UserId, factors: &ScenarioFactors) -> Result<ComparisonResult> {
        factors.validate()?;

        let snapshot = self.twin.read().await;
        let base = self.record_baseline(user_id, &snapshot).await?;

        let projected = scenario::project(&snapshot, factors)?;
        let sim = scoring::score_projection(&projected);

        let stored = self
            .history
            .append(NewScoreRecord::simulation(
                user_id.clone(),
                sim.total_environmental_impact,
                sim.sustainability_score,
            ))
            .await?;
        self.metrics.record_score_event("simulation");
        info!(
            id = stored.id,
            user_id = %user_id,
            energy_factor = factors.energy_factor,
            water_factor = factors.water_factor,
            traffic_factor = factors.traffic_factor,
            simulated_score = sim.sustainability_score,
            "simulation recorded"
        );

        Ok(ComparisonResult {
            base_impact: base.total_environmental_impact,
            simulated_impact: sim.total_environmental_impact,
            impact_difference: sim.total_environmental_impact - base.total_environmental_impact,
            base_score: base.sustainability_score,
            simulated_score: sim.sustainability_score,
        })
    }

    /// Projects the live twin without recording anything.
    pub async fn simulate(&self, factors: &ScenarioFactors) -> Result<ProjectedState> {
        let snapshot = self.twin.read().await;
        scenario::project(&snapshot, factors)
    }

    pub async fn list_history(&self) -> Result<Vec<ScoreRecord>> {
        self.history.list_all().await
    }

    pub async fn summary(&self) -> Result<HistorySummary> {
        Ok(HistorySummary::from_records(&self.history.list_all().await?))
    }

    async fn record_baseline(&self, user_id: &UserId, snapshot: &TwinState) -> Result<BaselineResult> {
        let base = scoring::score(snapshot);
        let stored = self
            .history
            .append(NewScoreRecord::baseline(
                user_id.clone(),
                base.total_environmental_impact,
                base.sustainability_score,
            ))
            .await?;
        self.metrics.record_score_event("baseline");
        self.metrics.set_last_score(base.sustainability_score);
        info!(id = stored.id, user_id = %user_id, score = base.sustainability_score, "baseline recorded");
        Ok(base)
    }
}
