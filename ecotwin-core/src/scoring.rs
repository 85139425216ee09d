//! Sustainability scoring.
//!
//! A fixed linear formula over the three readings:
//!
//! ```text
//! energy_emission  = kwh      * 0.2
//! traffic_emission = vehicles * 0.1
//! water_index      = liters   / 5000
//! total_impact     = energy_emission + traffic_emission + water_index
//! score            = max(0, 100 - total_impact / 100)
//! ```
//!
//! Readings are non-negative, so the score always lies in `[0, 100]`.

use serde::{Deserialize, Serialize};

use crate::digital_twin::TwinState;
use crate::scenario::ProjectedState;

/// kg CO2 per kWh.
pub const ENERGY_EMISSION_FACTOR: f64 = 0.2;
/// kg CO2 per vehicle.
pub const TRAFFIC_EMISSION_FACTOR: f64 = 0.1;
pub const WATER_INDEX_DIVISOR: f64 = 5000.0;
pub const IMPACT_SCALE: f64 = 100.0;
pub const MAX_SCORE: f64 = 100.0;

/// Intermediate terms and final values of one scoring pass.
///
/// This is also the result of a baseline run, so the field names follow the
/// report callers receive.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ImpactBreakdown {
    pub energy_emission_kg: f64,
    pub traffic_emission_kg: f64,
    pub water_impact_index: f64,
    pub total_environmental_impact: f64,
    pub sustainability_score: f64,
}

pub type BaselineResult = ImpactBreakdown;

pub fn score_readings(energy_kwh: f64, water_liters: f64, vehicle_count: f64) -> ImpactBreakdown {
    let energy_emission_kg = energy_kwh * ENERGY_EMISSION_FACTOR;
    let traffic_emission_kg = vehicle_count * TRAFFIC_EMISSION_FACTOR;
    let water_impact_index = water_liters / WATER_INDEX_DIVISOR;

    let total_environmental_impact = energy_emission_kg + traffic_emission_kg + water_impact_index;

    ImpactBreakdown {
        energy_emission_kg,
        traffic_emission_kg,
        water_impact_index,
        total_environmental_impact,
        sustainability_score: score_for_impact(total_environmental_impact),
    }
}

pub fn score_for_impact(total_impact: f64) -> f64 {
    (MAX_SCORE - total_impact / IMPACT_SCALE).max(0.0)
}

/// Scores the twin's actual readings.
pub fn score(snapshot: &TwinState) -> ImpactBreakdown {
    score_readings(
        snapshot.energy_system.current_usage_kwh,
        snapshot.water_system.current_usage_liters,
        snapshot.traffic_system.avg_vehicle_count,
    )
}

/// Scores a hypothetical projection with the same formula.
pub fn score_projection(projected: &ProjectedState) -> ImpactBreakdown {
    score_readings(
        projected.energy_system.projected_usage_kwh,
        projected.water_system.projected_usage_liters,
        projected.traffic_system.projected_vehicle_count,
    )
}
