//! What-if projections of the twin under scaling factors.
//!
//! A projection is hypothetical: it only carries the projected readings and
//! never feeds back into the live twin. Projected values are truncated toward
//! zero to whole kWh, liters and vehicles, and kept as `f64` so readings of
//! any finite magnitude project without saturating.

use serde::{Deserialize, Serialize};

use crate::digital_twin::TwinState;
use crate::error::{ensure_factor, Result};

fn unit_factor() -> f64 {
    1.0
}

/// Multipliers applied to each subsystem; `1.0` leaves a reading unchanged.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ScenarioFactors {
    #[serde(default = "unit_factor")]
    pub energy_factor: f64,
    #[serde(default = "unit_factor")]
    pub water_factor: f64,
    #[serde(default = "unit_factor")]
    pub traffic_factor: f64,
}

impl Default for ScenarioFactors {
    fn default() -> Self {
        Self { energy_factor: 1.0, water_factor: 1.0, traffic_factor: 1.0 }
    }
}

impl ScenarioFactors {
    pub fn new(energy_factor: f64, water_factor: f64, traffic_factor: f64) -> Self {
        Self { energy_factor, water_factor, traffic_factor }
    }

    pub fn validate(&self) -> Result<()> {
        ensure_factor("energy_factor", self.energy_factor)?;
        ensure_factor("water_factor", self.water_factor)?;
        ensure_factor("traffic_factor", self.traffic_factor)?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ProjectedEnergy {
    pub projected_usage_kwh: f64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ProjectedWater {
    pub projected_usage_liters: f64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ProjectedTraffic {
    pub projected_vehicle_count: f64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ProjectedState {
    pub energy_system: ProjectedEnergy,
    pub water_system: ProjectedWater,
    pub traffic_system: ProjectedTraffic,
}

fn scaled(reading: f64, factor: f64) -> f64 {
    (reading * factor).trunc()
}

pub fn project(snapshot: &TwinState, factors: &ScenarioFactors) -> Result<ProjectedState> {
    factors.validate()?;

    Ok(ProjectedState {
        energy_system: ProjectedEnergy {
            projected_usage_kwh: scaled(snapshot.energy_system.current_usage_kwh, factors.energy_factor),
        },
        water_system: ProjectedWater {
            projected_usage_liters: scaled(snapshot.water_system.current_usage_liters, factors.water_factor),
        },
        traffic_system: ProjectedTraffic {
            projected_vehicle_count: scaled(snapshot.traffic_system.avg_vehicle_count, factors.traffic_factor),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn scales_each_subsystem() {
        let p = project(&TwinState::default(), &ScenarioFactors::new(2.0, 1.0, 0.5)).unwrap();
        assert_eq!(p.energy_system.projected_usage_kwh, 10_000.0);
        assert_eq!(p.water_system.projected_usage_liters, 50_000.0);
        assert_eq!(p.traffic_system.projected_vehicle_count, 1_600.0);
    }

    #[test]
    fn truncates_toward_zero() {
        let mut snap = TwinState::default();
        snap.energy_system.current_usage_kwh = 10.0;
        let p = project(&snap, &ScenarioFactors::new(0.99, 0.0, 1.0)).unwrap();
        assert_eq!(p.energy_system.projected_usage_kwh, 9.0);
        assert_eq!(p.water_system.projected_usage_liters, 0.0);
    }

    #[test]
    fn readings_beyond_integer_range_do_not_saturate() {
        let mut snap = TwinState::default();
        snap.energy_system.current_usage_kwh = 1e20;
        let p = project(&snap, &ScenarioFactors::default()).unwrap();
        assert_eq!(p.energy_system.projected_usage_kwh, 1e20);

        let p = project(&snap, &ScenarioFactors::new(3.0, 1.0, 1.0)).unwrap();
        assert_eq!(p.energy_system.projected_usage_kwh, 3e20);
    }

    #[test]
    fn negative_factor_is_rejected() {
        let err = project(&TwinState::default(), &ScenarioFactors::new(-1.0, 1.0, 1.0)).unwrap_err();
        assert_eq!(err, Error::InvalidFactor { factor: "energy_factor", value: -1.0 });
        assert!(project(&TwinState::default(), &ScenarioFactors::new(1.0, 1.0, f64::NAN)).is_err());
    }

    #[test]
    fn missing_factors_default_to_one() {
        let f: ScenarioFactors = serde_json::from_str(r#"{"energy_factor": 1.5}"#).unwrap();
        assert_eq!(f, ScenarioFactors::new(1.5, 1.0, 1.0));
    }

    #[test]
    fn projection_exposes_only_projected_fields() {
        let p = project(&TwinState::default(), &ScenarioFactors::default()).unwrap();
        let v = serde_json::to_value(p).unwrap();
        assert_eq!(v["energy_system"].as_object().unwrap().len(), 1);
        assert_eq!(v["traffic_system"]["projected_vehicle_count"], 3200.0);
    }
}
