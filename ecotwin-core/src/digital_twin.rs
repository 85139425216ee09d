//! Live state of the municipal twin.
//!
//! One `TwinState` exists per process. It is shared through a [`TwinHandle`],
//! which callers clone and pass around explicitly; every read and write goes
//! through a single lock so a `read()` never observes a half-applied update.
//!
//! Status labels and the congestion level are descriptive only. They are set
//! when the twin is created and are not recomputed when readings change.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{ensure_reading, Result};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnergyStatus {
    #[default]
    Stable,
    Strained,
    Overloaded,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaterStatus {
    #[default]
    Normal,
    Restricted,
    Critical,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CongestionLevel {
    Low,
    #[default]
    Moderate,
    High,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrafficStatus {
    #[default]
    Controlled,
    Congested,
    Gridlocked,
}

macro_rules! label_str {
    ($($ty:ty { $($variant:ident => $s:literal),+ $(,)? })+) => {
        $(
            impl $ty {
                pub fn as_str(&self) -> &'static str {
                    match self {
                        $(Self::$variant => $s,)+
                    }
                }
            }
        )+
    };
}

label_str! {
    EnergyStatus { Stable => "stable", Strained => "strained", Overloaded => "overloaded" }
    WaterStatus { Normal => "normal", Restricted => "restricted", Critical => "critical" }
    CongestionLevel { Low => "low", Moderate => "moderate", High => "high" }
    TrafficStatus { Controlled => "controlled", Congested => "congested", Gridlocked => "gridlocked" }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EnergySystem {
    pub current_usage_kwh: f64,
    pub peak_demand_kwh: f64,
    #[serde(default)]
    pub status: EnergyStatus,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WaterSystem {
    pub current_usage_liters: f64,
    #[serde(default)]
    pub leakage_detected: bool,
    #[serde(default)]
    pub status: WaterStatus,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TrafficSystem {
    pub avg_vehicle_count: f64,
    #[serde(default)]
    pub congestion_level: CongestionLevel,
    #[serde(default)]
    pub status: TrafficStatus,
}

/// Snapshot of all three subsystems.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TwinState {
    pub energy_system: EnergySystem,
    pub water_system: WaterSystem,
    pub traffic_system: TrafficSystem,
}

impl Default for TwinState {
    fn default() -> Self {
        Self {
            energy_system: EnergySystem {
                current_usage_kwh: 5000.0,
                peak_demand_kwh: 1500.0,
                status: EnergyStatus::Stable,
            },
            water_system: WaterSystem {
                current_usage_liters: 50000.0,
                leakage_detected: false,
                status: WaterStatus::Normal,
            },
            traffic_system: TrafficSystem {
                avg_vehicle_count: 3200.0,
                congestion_level: CongestionLevel::Moderate,
                status: TrafficStatus::Controlled,
            },
        }
    }
}

impl TwinState {
    /// Rejects negative or non-finite readings; used when the initial
    /// state comes from configuration.
    pub fn validate(&self) -> Result<()> {
        ensure_reading("energy_system.current_usage_kwh", self.energy_system.current_usage_kwh)?;
        ensure_reading("energy_system.peak_demand_kwh", self.energy_system.peak_demand_kwh)?;
        ensure_reading("water_system.current_usage_liters", self.water_system.current_usage_liters)?;
        ensure_reading("traffic_system.avg_vehicle_count", self.traffic_system.avg_vehicle_count)?;
        Ok(())
    }
}

/// Shared handle to the process-wide twin.
#[derive(Clone, Debug)]
pub struct TwinHandle {
    inner: Arc<RwLock<TwinState>>,
}

impl Default for TwinHandle {
    fn default() -> Self {
        Self::new(TwinState::default())
    }
}

impl TwinHandle {
    pub fn new(initial: TwinState) -> Self {
        Self { inner: Arc::new(RwLock::new(initial)) }
    }

    /// Returns a copy of the current readings.
    pub async fn read(&self) -> TwinState {
        self.inner.read().await.clone()
    }

    pub async fn set_energy(&self, value: f64) -> Result<EnergySystem> {
        let value = ensure_reading("current_usage_kwh", value)?;
        let mut twin = self.inner.write().await;
        twin.energy_system.current_usage_kwh = value;
        info!(current_usage_kwh = value, "energy reading updated");
        Ok(twin.energy_system.clone())
    }

    pub async fn set_water(&self, value: f64) -> Result<WaterSystem> {
        let value = ensure_reading("current_usage_liters", value)?;
        let mut twin = self.inner.write().await;
        twin.water_system.current_usage_liters = value;
        info!(current_usage_liters = value, "water reading updated");
        Ok(twin.water_system.clone())
    }

    pub async fn set_traffic(&self, value: f64) -> Result<TrafficSystem> {
        let value = ensure_reading("avg_vehicle_count", value)?;
        let mut twin = self.inner.write().await;
        twin.traffic_system.avg_vehicle_count = value;
        info!(avg_vehicle_count = value, "traffic reading updated");
        Ok(twin.traffic_system.clone())
    }
}
