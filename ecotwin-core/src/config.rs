use serde::Deserialize;

use crate::digital_twin::TwinState;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_project_name")]
    pub project_name: String,
    pub core: CoreConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    /// Initial readings and labels of the twin.
    #[serde(default)]
    pub twin: TwinState,
    #[serde(default)]
    pub prediction: PredictionConfig,
}

fn default_project_name() -> String {
    "EcoTwin".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    pub bind_http: String,
    pub bind_grpc: String,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_second: u32,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_rate_limit() -> u32 {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics_path: default_metrics_path() }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HistoryBackend {
    #[default]
    Memory,
    Jsonl,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub backend: HistoryBackend,
    /// Log file for the `jsonl` backend.
    #[serde(default = "default_history_path")]
    pub path: String,
}

fn default_history_path() -> String {
    "./sustainability_history.jsonl".to_string()
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { backend: HistoryBackend::default(), path: default_history_path() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PredictionConfig {
    #[serde(default)]
    pub trend: TrendConfig,
    #[serde(default)]
    pub forecaster: ForecasterConfig,
    #[serde(default)]
    pub explainer: ExplainerConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TrendConfig {
    #[serde(default = "default_base_score")]
    pub base_score: f64,
    /// Score points lost per day ahead.
    #[serde(default = "default_decline_per_day")]
    pub decline_per_day: f64,
}

fn default_base_score() -> f64 {
    85.0
}

fn default_decline_per_day() -> f64 {
    1.5
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self { base_score: default_base_score(), decline_per_day: default_decline_per_day() }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ForecasterConfig {
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_forecaster_min_samples")]
    pub min_samples: usize,
}

fn default_window() -> usize {
    5
}

fn default_forecaster_min_samples() -> usize {
    10
}

impl Default for ForecasterConfig {
    fn default() -> Self {
        Self { window: default_window(), min_samples: default_forecaster_min_samples() }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ExplainerConfig {
    #[serde(default = "default_explainer_min_samples")]
    pub min_samples: usize,
}

fn default_explainer_min_samples() -> usize {
    3
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self { min_samples: default_explainer_min_samples() }
    }
}

impl Config {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
        let cfg: Self = serde_yaml::from_slice(bytes)?;
        cfg.twin.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = Config::from_slice(
            br#"
version: "1"
core:
  bind_http: "127.0.0.1:8080"
  bind_grpc: "127.0.0.1:50051"
"#,
        )
        .unwrap();
        assert_eq!(cfg.project_name, "EcoTwin");
        assert_eq!(cfg.core.rate_limit_per_second, 50);
        assert_eq!(cfg.core.observability.metrics_path, "/metrics");
        assert_eq!(cfg.history.backend, HistoryBackend::Memory);
        assert_eq!(cfg.twin, TwinState::default());
        assert_eq!(cfg.prediction.forecaster.window, 5);
        assert_eq!(cfg.prediction.trend.base_score, 85.0);
    }

    #[test]
    fn twin_and_history_sections_override_defaults() {
        let cfg = Config::from_slice(
            br#"
version: "1"
core:
  bind_http: "0.0.0.0:8080"
  bind_grpc: "0.0.0.0:50051"
history:
  backend: jsonl
  path: /var/lib/ecotwin/history.jsonl
twin:
  energy_system: { current_usage_kwh: 1200, peak_demand_kwh: 1500, status: strained }
  water_system: { current_usage_liters: 40000, leakage_detected: true }
  traffic_system: { avg_vehicle_count: 900, congestion_level: low }
"#,
        )
        .unwrap();
        assert_eq!(cfg.history.backend, HistoryBackend::Jsonl);
        assert_eq!(cfg.twin.energy_system.current_usage_kwh, 1200.0);
        assert!(cfg.twin.water_system.leakage_detected);
        assert_eq!(cfg.twin.traffic_system.congestion_level, crate::digital_twin::CongestionLevel::Low);
    }

    #[test]
    fn negative_initial_reading_is_rejected() {
        let res = Config::from_slice(
            br#"
version: "1"
core: { bind_http: "a", bind_grpc: "b" }
twin:
  energy_system: { current_usage_kwh: -1, peak_demand_kwh: 0 }
  water_system: { current_usage_liters: 0 }
  traffic_system: { avg_vehicle_count: 0 }
"#,
        );
        assert!(res.is_err());
    }
}
