// Experiment Definition
//
// One experiment = one parameter grid sharing a climate setup, an rfast
// template and the gas whose detectability is being tested.

use crate::domain::error::{DomainError, Result};
use crate::domain::grid::species_key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

const DEFAULT_SURFACE_TEMPERATURE: f64 = 288.0;
const DEFAULT_DISTANCE_AU: f64 = 1.0;

/// Upper bound on the values one range axis may produce
pub const MAX_AXIS_VALUES: usize = 100_000;
/// Upper bound on the points of a whole grid
pub const MAX_GRID_POINTS: usize = 1_000_000;

/// Full description of a retrieval experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub name: String,
    pub save_dir: PathBuf,
    /// rfast `.scr` template rewritten for every grid point
    pub template: PathBuf,
    /// Gas removed in the second retrieval hypothesis (e.g. "H2O")
    pub tested_gas: String,
    /// Planet/star contrast used as the reference signal for noise
    pub fpfs_err: f64,
    #[serde(default)]
    pub noise_seed: Option<u64>,
    #[serde(default)]
    pub baseline: Baseline,
    pub climate: ClimateSpec,
    pub grid: GridSpec,
}

/// Values used for axes that are not varied by the grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    #[serde(default = "Baseline::default_surface_temperature")]
    pub surface_temperature: f64,
    #[serde(default = "Baseline::default_distance_au")]
    pub distance_au: f64,
}

impl Baseline {
    const fn default_surface_temperature() -> f64 {
        DEFAULT_SURFACE_TEMPERATURE
    }

    const fn default_distance_au() -> f64 {
        DEFAULT_DISTANCE_AU
    }
}

impl Default for Baseline {
    fn default() -> Self {
        Self {
            surface_temperature: DEFAULT_SURFACE_TEMPERATURE,
            distance_au: DEFAULT_DISTANCE_AU,
        }
    }
}

/// Climate model settings shared by every grid point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateSpec {
    pub surface_albedo: f64,
    pub relative_humidity: f64,
    /// Pressure at the model top (dyn/cm^2)
    pub top_pressure: f64,
    #[serde(default)]
    pub tropopause_temperature: Option<f64>,
    pub atmosphere: AtmosphereSpec,
}

/// How the atmosphere of each point is constructed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AtmosphereSpec {
    /// Profile at the point's surface temperature from prescribed mixing ratios
    FixedProfile {
        /// Surface pressure (dyn/cm^2)
        surface_pressure: f64,
        background_gas: String,
        mixing_ratios: BTreeMap<String, f64>,
        #[serde(default)]
        partial_pressure_overrides: BTreeMap<String, f64>,
    },
    /// CO2 column and tropopause temperature solved for radiative balance
    StableClimate {
        /// Column inventories (mol/cm^2) of every gas other than CO2
        column_inventories: BTreeMap<String, f64>,
        #[serde(default)]
        co2_guess: Option<f64>,
        #[serde(default)]
        tropopause_guess: Option<f64>,
    },
}

/// Parameter grid axes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub snr: AxisValues,
    #[serde(default)]
    pub surface_temperature: Option<AxisValues>,
    #[serde(default)]
    pub distance_au: Option<AxisValues>,
    #[serde(default)]
    pub mixing_ratio: Option<MixingAxis>,
}

/// Mixing ratio axis for a single gas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixingAxis {
    pub gas: String,
    pub values: AxisValues,
}

/// Axis values: explicit list or arange-style range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisValues {
    List(Vec<f64>),
    Range {
        start: f64,
        stop: f64,
        step: f64,
        #[serde(default = "AxisValues::default_scale")]
        scale: f64,
    },
}

impl AxisValues {
    fn default_scale() -> f64 {
        1.0
    }

    /// Materialize the axis
    ///
    /// Ranges follow half-open arange semantics: `scale * (start + i * step)`
    /// for every `start + i * step < stop`.
    pub fn values(&self, axis: &str) -> Result<Vec<f64>> {
        match self {
            AxisValues::List(values) => {
                if values.is_empty() {
                    return Err(DomainError::InvalidAxis {
                        axis: axis.to_string(),
                        reason: "empty value list".to_string(),
                    });
                }
                Ok(values.clone())
            }
            AxisValues::Range {
                start,
                stop,
                step,
                scale,
            } => {
                if !(step.is_finite() && *step > 0.0) {
                    return Err(DomainError::InvalidAxis {
                        axis: axis.to_string(),
                        reason: format!("step must be positive, got {}", step),
                    });
                }
                if !(start.is_finite() && stop.is_finite()) || stop <= start {
                    return Err(DomainError::InvalidAxis {
                        axis: axis.to_string(),
                        reason: format!("empty range [{}, {})", start, stop),
                    });
                }
                let count = ((stop - start) / step).ceil();
                if count > MAX_AXIS_VALUES as f64 {
                    return Err(DomainError::InvalidAxis {
                        axis: axis.to_string(),
                        reason: format!(
                            "range [{}, {}) with step {} exceeds {} values",
                            start, stop, step, MAX_AXIS_VALUES
                        ),
                    });
                }
                let count = count as usize;
                Ok((0..count)
                    .map(|i| scale * (start + i as f64 * step))
                    .collect())
            }
        }
    }
}

impl ExperimentSpec {
    /// Number of grid points, saturating on overflow
    fn grid_point_count(&self) -> Result<usize> {
        let mut count = self.grid.snr.values("snr")?.len();
        if let Some(axis) = &self.grid.surface_temperature {
            count = count.saturating_mul(axis.values("surface_temperature")?.len());
        }
        if let Some(axis) = &self.grid.distance_au {
            count = count.saturating_mul(axis.values("distance_au")?.len());
        }
        if let Some(mixing) = &self.grid.mixing_ratio {
            count = count.saturating_mul(mixing.values.values("mixing_ratio")?.len());
        }
        Ok(count)
    }

    /// Validate the experiment before any work is planned
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.tested_gas.trim().is_empty() {
            return Err(invalid("tested_gas must not be empty"));
        }
        if !(self.fpfs_err.is_finite() && self.fpfs_err > 0.0) {
            return Err(invalid(format!("fpfs_err must be positive, got {}", self.fpfs_err)));
        }

        require_positive("snr", &self.grid.snr.values("snr")?)?;
        if let Some(axis) = &self.grid.surface_temperature {
            require_positive("surface_temperature", &axis.values("surface_temperature")?)?;
        }
        if let Some(axis) = &self.grid.distance_au {
            require_positive("distance_au", &axis.values("distance_au")?)?;
        }
        require_positive("baseline.surface_temperature", &[self.baseline.surface_temperature])?;
        require_positive("baseline.distance_au", &[self.baseline.distance_au])?;

        if let Some(mixing) = &self.grid.mixing_ratio {
            let values = mixing.values.values("mixing_ratio")?;
            if let Some(bad) = values.iter().find(|f| !(0.0..=1.0).contains(*f)) {
                return Err(DomainError::InvalidAxis {
                    axis: "mixing_ratio".to_string(),
                    reason: format!("mixing ratio {} outside [0, 1]", bad),
                });
            }
            match &self.climate.atmosphere {
                AtmosphereSpec::FixedProfile { mixing_ratios, .. } => {
                    let gas = species_key(&mixing.gas);
                    if !mixing_ratios.keys().any(|k| species_key(k) == gas) {
                        return Err(invalid(format!(
                            "mixing ratio axis gas {} is not part of the composition",
                            gas
                        )));
                    }
                }
                AtmosphereSpec::StableClimate { .. } => {
                    return Err(invalid(
                        "mixing_ratio axis requires the fixed_profile atmosphere mode",
                    ));
                }
            }
        }

        let points = self.grid_point_count()?;
        if points > MAX_GRID_POINTS {
            return Err(invalid(format!(
                "grid has {} points, more than {}",
                points, MAX_GRID_POINTS
            )));
        }

        match &self.climate.atmosphere {
            AtmosphereSpec::FixedProfile {
                surface_pressure,
                background_gas,
                mixing_ratios,
                ..
            } => {
                require_positive("surface_pressure", &[*surface_pressure])?;
                if background_gas.trim().is_empty() {
                    return Err(invalid("background_gas must not be empty"));
                }
                if mixing_ratios.is_empty() {
                    return Err(invalid("mixing_ratios must not be empty"));
                }
            }
            AtmosphereSpec::StableClimate {
                column_inventories,
                co2_guess,
                tropopause_guess,
            } => {
                if column_inventories.is_empty() {
                    return Err(invalid("column_inventories must not be empty"));
                }
                if let Some(guess) = co2_guess {
                    require_positive("co2_guess", &[*guess])?;
                }
                if let Some(guess) = tropopause_guess {
                    require_positive("tropopause_guess", &[*guess])?;
                }
            }
        }

        Ok(())
    }

    /// Upper-cased tested gas, used for file suffixes and hypothesis labels
    pub fn tested_gas_key(&self) -> String {
        species_key(&self.tested_gas)
    }
}

fn invalid(reason: impl Into<String>) -> DomainError {
    DomainError::InvalidExperiment(reason.into())
}

fn require_positive(axis: &str, values: &[f64]) -> Result<()> {
    match values.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
        Some(bad) => Err(DomainError::InvalidAxis {
            axis: axis.to_string(),
            reason: format!("value {} must be positive", bad),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Temperature sweep with water as the tested gas
    pub fn temperature_experiment(save_dir: impl Into<PathBuf>) -> ExperimentSpec {
        let mut mixing_ratios = BTreeMap::new();
        mixing_ratios.insert("H2O".to_string(), 1.0);
        mixing_ratios.insert("CO2".to_string(), 400.0e-6);
        mixing_ratios.insert("N2".to_string(), 1.0);
        mixing_ratios.insert("O2".to_string(), 0.21);
        mixing_ratios.insert("CH4".to_string(), 1.8e-6);
        let mut overrides = BTreeMap::new();
        overrides.insert("H2O".to_string(), 200.0e6);

        ExperimentSpec {
            name: "temperature".to_string(),
            save_dir: save_dir.into(),
            template: PathBuf::from("input/inputs.scr"),
            tested_gas: "H2O".to_string(),
            fpfs_err: 3.55e-10,
            noise_seed: Some(7),
            baseline: Baseline::default(),
            climate: ClimateSpec {
                surface_albedo: 0.24,
                relative_humidity: 0.8,
                top_pressure: 1.0,
                tropopause_temperature: Some(215.0),
                atmosphere: AtmosphereSpec::FixedProfile {
                    surface_pressure: 1.035e6,
                    background_gas: "N2".to_string(),
                    mixing_ratios,
                    partial_pressure_overrides: overrides,
                },
            },
            grid: GridSpec {
                snr: AxisValues::List(vec![5.0, 10.0]),
                surface_temperature: Some(AxisValues::List(vec![273.0, 276.0])),
                distance_au: None,
                mixing_ratio: None,
            },
        }
    }

    /// Habitable-zone sweep solving for a stable CO2 column
    pub fn habitable_zone_experiment(save_dir: impl Into<PathBuf>) -> ExperimentSpec {
        let mut columns = BTreeMap::new();
        columns.insert("H2O".to_string(), 10.0e3);
        columns.insert("CO2".to_string(), 400.0e-6 * 23.0);
        columns.insert("N2".to_string(), 36.0);

        ExperimentSpec {
            name: "habitable_zone".to_string(),
            save_dir: save_dir.into(),
            template: PathBuf::from("input/inputs.scr"),
            tested_gas: "H2O".to_string(),
            fpfs_err: 3.55e-10,
            noise_seed: Some(11),
            baseline: Baseline::default(),
            climate: ClimateSpec {
                surface_albedo: 0.22,
                relative_humidity: 0.8,
                top_pressure: 1.0,
                tropopause_temperature: None,
                atmosphere: AtmosphereSpec::StableClimate {
                    column_inventories: columns,
                    co2_guess: None,
                    tropopause_guess: None,
                },
            },
            grid: GridSpec {
                snr: AxisValues::List(vec![2.5]),
                surface_temperature: None,
                distance_au: Some(AxisValues::List(vec![1.0, 1.2])),
                mixing_ratio: None,
            },
        }
    }
}
