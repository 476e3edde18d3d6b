// Grid Points and Artifact Naming

use crate::domain::error::Result;
use crate::domain::experiment::ExperimentSpec;
use crate::domain::job::Hypothesis;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Normalized species identifier (upper case, trimmed)
pub fn species_key(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Format a float in C printf `%.Ne` style (`5.00000e-04`)
///
/// Rust's `{:e}` omits the exponent sign and padding, which would change
/// every artifact name and template value written by the tool.
pub fn format_scientific(value: f64, precision: usize) -> String {
    let raw = format!("{:.*e}", precision, value);
    match raw.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => raw,
    }
}

/// Mixing ratio of one gas at a grid point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasAbundance {
    pub gas: String,
    pub value: f64,
}

/// One point of the experiment grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub index: usize,
    pub snr: f64,
    pub surface_temperature: f64,
    pub distance_au: f64,
    pub mixing_ratio: Option<GasAbundance>,
    pub varies_temperature: bool,
    pub varies_distance: bool,
}

impl GridPoint {
    /// Expand the experiment grid
    ///
    /// SNR is the outer loop, followed by surface temperature, distance and
    /// mixing ratio. Axes that are not varied take the baseline value.
    pub fn expand(spec: &ExperimentSpec) -> Result<Vec<GridPoint>> {
        let snrs = spec.grid.snr.values("snr")?;
        let temperatures = match &spec.grid.surface_temperature {
            Some(axis) => axis.values("surface_temperature")?,
            None => vec![spec.baseline.surface_temperature],
        };
        let distances = match &spec.grid.distance_au {
            Some(axis) => axis.values("distance_au")?,
            None => vec![spec.baseline.distance_au],
        };
        let mixing: Vec<Option<GasAbundance>> = match &spec.grid.mixing_ratio {
            Some(axis) => {
                let gas = species_key(&axis.gas);
                axis.values
                    .values("mixing_ratio")?
                    .into_iter()
                    .map(|value| {
                        Some(GasAbundance {
                            gas: gas.clone(),
                            value,
                        })
                    })
                    .collect()
            }
            None => vec![None],
        };

        let varies_temperature = spec.grid.surface_temperature.is_some();
        let varies_distance = spec.grid.distance_au.is_some();

        let mut points =
            Vec::with_capacity(snrs.len() * temperatures.len() * distances.len() * mixing.len());
        for &snr in &snrs {
            for &surface_temperature in &temperatures {
                for &distance_au in &distances {
                    for abundance in &mixing {
                        points.push(GridPoint {
                            index: points.len(),
                            snr,
                            surface_temperature,
                            distance_au,
                            mixing_ratio: abundance.clone(),
                            varies_temperature,
                            varies_distance,
                        });
                    }
                }
            }
        }
        Ok(points)
    }

    /// Artifact file stem, e.g. `Ts=288.00000_SNR=2.50000_fCH4=5.00000e-04`
    pub fn file_stem(&self) -> String {
        let mut stem = if self.varies_distance && !self.varies_temperature {
            format!("AU={:.5}", self.distance_au)
        } else if self.varies_distance {
            format!("Ts={:.5}_AU={:.5}", self.surface_temperature, self.distance_au)
        } else {
            format!("Ts={:.5}", self.surface_temperature)
        };
        stem.push_str(&format!("_SNR={:.5}", self.snr));
        if let Some(abundance) = &self.mixing_ratio {
            stem.push_str(&format!(
                "_f{}={}",
                abundance.gas,
                format_scientific(abundance.value, 5)
            ));
        }
        stem
    }
}

/// Files produced for a single grid point
#[derive(Debug, Clone, PartialEq)]
pub struct PointPaths {
    pub data: PathBuf,
    pub all_gases: PathBuf,
    pub gas_removed: PathBuf,
    pub atmosphere: PathBuf,
    pub scr: PathBuf,
    pub log_dir: PathBuf,
    stem: String,
}

impl PointPaths {
    pub fn new(save_dir: &Path, stem: &str, tested_gas: &str) -> Self {
        let scratch = save_dir.join("scratch");
        Self {
            data: save_dir.join(format!("{}_data.json", stem)),
            all_gases: save_dir.join(format!("{}_{}.json", stem, Hypothesis::AllGases.suffix(tested_gas))),
            gas_removed: save_dir.join(format!(
                "{}_{}.json",
                stem,
                Hypothesis::GasRemoved.suffix(tested_gas)
            )),
            atmosphere: scratch.join(format!("{}_atmosphere.txt", stem)),
            scr: scratch.join(format!("{}.scr", stem)),
            log_dir: save_dir.join("logs"),
            stem: stem.to_string(),
        }
    }

    pub fn for_point(spec: &ExperimentSpec, point: &GridPoint) -> Self {
        Self::new(&spec.save_dir, &point.file_stem(), &spec.tested_gas_key())
    }

    pub fn output(&self, hypothesis: Hypothesis) -> &Path {
        match hypothesis {
            Hypothesis::AllGases => &self.all_gases,
            Hypothesis::GasRemoved => &self.gas_removed,
        }
    }

    pub fn log(&self, hypothesis: Hypothesis, tested_gas: &str) -> PathBuf {
        self.log_dir
            .join(format!("{}_{}.log", self.stem, hypothesis.suffix(tested_gas)))
    }
}
