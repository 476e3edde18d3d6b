// Climate Model Port
// External radiative-convective model producing TOA fluxes and atmosphere profiles

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors raised by external model adapters
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to start model: {0}")]
    Spawn(String),

    #[error("Model IO error: {0}")]
    Io(String),

    #[error("Invalid model response: {0}")]
    Protocol(String),

    #[error("Model exited with code {exit_code:?}: {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
}

/// Settings shared by every climate call of an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateSettings {
    pub surface_albedo: f64,
    pub relative_humidity: f64,
    /// dyn/cm^2
    pub top_pressure: f64,
}

/// Flux evaluation for a column-inventory atmosphere
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxRequest {
    #[serde(flatten)]
    pub settings: ClimateSettings,
    pub surface_temperature: f64,
    pub tropopause_temperature: f64,
    /// mol/cm^2 per species
    pub column_inventories: BTreeMap<String, f64>,
}

/// Top-of-atmosphere fluxes returned by the model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToaFluxes {
    /// Incoming solar radiation at 1 AU
    pub isr: f64,
    /// Outgoing longwave radiation
    pub olr: f64,
    /// Upward shortwave flux at the top layer
    pub fup_top: f64,
    /// Downward shortwave flux at the top layer
    pub fdn_top: f64,
}

/// Atmosphere composition handed to the profile builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProfileComposition {
    ColumnInventories {
        column_inventories: BTreeMap<String, f64>,
    },
    PartialPressures {
        /// dyn/cm^2 per species
        partial_pressures: BTreeMap<String, f64>,
        surface_pressure: f64,
        background_gas: String,
    },
}

/// Request to build and write an atmosphere profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRequest {
    #[serde(flatten)]
    pub settings: ClimateSettings,
    pub surface_temperature: f64,
    pub tropopause_temperature: Option<f64>,
    pub composition: ProfileComposition,
}

/// Description of the atmosphere file written by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateProfile {
    /// Species known to the climate model (upper case)
    pub species_names: Vec<String>,
    /// dyn/cm^2
    pub surface_pressure: f64,
    pub surface_temperature: f64,
}

/// Climate model interface
#[async_trait]
pub trait ClimateModel: Send + Sync {
    /// Evaluate TOA fluxes for a column-inventory atmosphere
    async fn toa_fluxes(&self, request: &FluxRequest) -> Result<ToaFluxes, ModelError>;

    /// Build a profile and write it as a whitespace-separated table to `atmosphere_out`
    async fn write_profile(
        &self,
        request: &ProfileRequest,
        atmosphere_out: &Path,
    ) -> Result<ClimateProfile, ModelError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Analytic grey-atmosphere stand-in
    ///
    /// OLR grows with surface temperature and shrinks with log CO2 so the
    /// stable-climate solve has a well defined root.
    pub struct MockClimateModel {
        pub species_names: Vec<String>,
        pub isr: f64,
        pub albedo: f64,
        flux_calls: AtomicUsize,
        profile_calls: AtomicUsize,
        fail_profiles: bool,
    }

    impl MockClimateModel {
        pub fn new() -> Self {
            Self {
                species_names: ["H2O", "CO2", "N2", "O2", "CH4"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                isr: 340.0,
                albedo: 0.3,
                flux_calls: AtomicUsize::new(0),
                profile_calls: AtomicUsize::new(0),
                fail_profiles: false,
            }
        }

        /// Make every profile call fail with a model error
        pub fn failing() -> Self {
            Self {
                fail_profiles: true,
                ..Self::new()
            }
        }

        pub fn flux_calls(&self) -> usize {
            self.flux_calls.load(Ordering::SeqCst)
        }

        pub fn profile_calls(&self) -> usize {
            self.profile_calls.load(Ordering::SeqCst)
        }
    }

    impl Default for MockClimateModel {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ClimateModel for MockClimateModel {
        async fn toa_fluxes(&self, request: &FluxRequest) -> Result<ToaFluxes, ModelError> {
            self.flux_calls.fetch_add(1, Ordering::SeqCst);
            let co2 = request
                .column_inventories
                .get("CO2")
                .copied()
                .ok_or_else(|| ModelError::Protocol("CO2 column missing".to_string()))?;
            let olr = 240.0 * (request.surface_temperature / 288.0).powi(4) - 10.0 * co2.ln();
            let fdn_top = 1000.0 * self.isr / 4.0;
            Ok(ToaFluxes {
                isr: self.isr * (1.0 - self.albedo),
                olr,
                fup_top: self.albedo * fdn_top,
                fdn_top,
            })
        }

        async fn write_profile(
            &self,
            request: &ProfileRequest,
            atmosphere_out: &Path,
        ) -> Result<ClimateProfile, ModelError> {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_profiles {
                return Err(ModelError::Failed {
                    exit_code: Some(1),
                    stderr: "profile did not converge".to_string(),
                });
            }

            let mut header = format!("{:27}{:27}{:27}{:27}", "alt", "press", "den", "temp");
            for sp in &self.species_names {
                header.push_str(&format!("{:27}", sp));
            }
            let mut table = header;
            table.push('\n');
            for layer in 0..3 {
                let mut row = String::new();
                for value in [layer as f64, 1.0 / (layer + 1) as f64, 1.0e19, request.surface_temperature] {
                    row.push_str(&format!("{:<27e}", value));
                }
                for _ in &self.species_names {
                    row.push_str(&format!("{:<27e}", 1.0e-3));
                }
                table.push_str(row.trim_end());
                table.push('\n');
            }
            std::fs::write(atmosphere_out, table).map_err(|e| ModelError::Io(e.to_string()))?;

            let surface_pressure = match &request.composition {
                ProfileComposition::PartialPressures {
                    surface_pressure, ..
                } => *surface_pressure,
                ProfileComposition::ColumnInventories { .. } => 1.0e6,
            };
            Ok(ClimateProfile {
                species_names: self.species_names.clone(),
                surface_pressure,
                surface_temperature: request.surface_temperature,
            })
        }
    }
}
