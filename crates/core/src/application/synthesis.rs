// Fake observation synthesis
//
// climate profile -> atmosphere table -> rendered .scr -> spectrum -> noise

use crate::application::atmosphere_file::extend_atmosphere_file;
use crate::application::guess::{nearest_guess, ClimateGuess};
use crate::application::noise::{inject_noise, point_rng};
use crate::application::scr_template::{render_scr, rfast_species, ScrValues};
use crate::application::stable_climate::{solve_stable_climate, SolverOptions, StableClimate};
use crate::domain::{
    species_key, AtmosphereSpec, ExperimentSpec, FakeObservation, GridPoint, PointPaths,
};
use crate::error::{AppError, Result};
use crate::port::{
    ClimateModel, ClimateSettings, ObservationSource, ProfileComposition, ProfileRequest,
    SpectrumModel,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds fake observations through the external climate and spectrum models
pub struct DataSynthesizer {
    climate: Arc<dyn ClimateModel>,
    spectrum: Arc<dyn SpectrumModel>,
    solver: SolverOptions,
}

impl DataSynthesizer {
    pub fn new(climate: Arc<dyn ClimateModel>, spectrum: Arc<dyn SpectrumModel>) -> Self {
        Self {
            climate,
            spectrum,
            solver: SolverOptions::default(),
        }
    }

    pub fn with_solver_options(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }

    /// Profile request for a point, solving for a stable climate when required
    async fn profile_request(
        &self,
        spec: &ExperimentSpec,
        point: &GridPoint,
    ) -> Result<(ProfileRequest, Option<StableClimate>)> {
        let settings = ClimateSettings {
            surface_albedo: spec.climate.surface_albedo,
            relative_humidity: spec.climate.relative_humidity,
            top_pressure: spec.climate.top_pressure,
        };

        match &spec.climate.atmosphere {
            AtmosphereSpec::FixedProfile {
                surface_pressure,
                background_gas,
                mixing_ratios,
                partial_pressure_overrides,
            } => {
                let mut partial_pressures: BTreeMap<String, f64> = mixing_ratios
                    .iter()
                    .map(|(gas, f)| (species_key(gas), f * surface_pressure))
                    .collect();
                if let Some(abundance) = &point.mixing_ratio {
                    partial_pressures.insert(abundance.gas.clone(), abundance.value * surface_pressure);
                }
                for (gas, pressure) in partial_pressure_overrides {
                    partial_pressures.insert(species_key(gas), *pressure);
                }

                Ok((
                    ProfileRequest {
                        settings,
                        surface_temperature: point.surface_temperature,
                        tropopause_temperature: spec.climate.tropopause_temperature,
                        composition: ProfileComposition::PartialPressures {
                            partial_pressures,
                            surface_pressure: *surface_pressure,
                            background_gas: species_key(background_gas),
                        },
                    },
                    None,
                ))
            }
            AtmosphereSpec::StableClimate {
                column_inventories,
                co2_guess,
                tropopause_guess,
            } => {
                let table = nearest_guess(point.distance_au);
                let guess = ClimateGuess {
                    co2_column: co2_guess.unwrap_or(table.co2_column),
                    tropopause_temperature: tropopause_guess.unwrap_or(table.tropopause_temperature),
                };
                let solution = solve_stable_climate(
                    self.climate.as_ref(),
                    &settings,
                    column_inventories,
                    point.distance_au,
                    point.surface_temperature,
                    guess,
                    &self.solver,
                )
                .await?;

                let mut columns: BTreeMap<String, f64> = column_inventories
                    .iter()
                    .map(|(gas, n)| (species_key(gas), *n))
                    .collect();
                columns.insert("CO2".to_string(), solution.co2_column);

                Ok((
                    ProfileRequest {
                        settings,
                        surface_temperature: point.surface_temperature,
                        tropopause_temperature: Some(solution.tropopause_temperature),
                        composition: ProfileComposition::ColumnInventories {
                            column_inventories: columns,
                        },
                    },
                    Some(solution),
                ))
            }
        }
    }
}

#[async_trait]
impl ObservationSource for DataSynthesizer {
    async fn prepare(&self, spec: &ExperimentSpec, point: &GridPoint) -> Result<FakeObservation> {
        let paths = PointPaths::for_point(spec, point);
        info!(
            experiment = %spec.name,
            point = point.index,
            stem = %point.file_stem(),
            "Preparing observation"
        );

        if let Some(scratch) = paths.atmosphere.parent() {
            tokio::fs::create_dir_all(scratch).await?;
        }
        let template = tokio::fs::read_to_string(&spec.template).await.map_err(|e| {
            AppError::Template(format!("cannot read {}: {}", spec.template.display(), e))
        })?;
        let retrieved_species = rfast_species(&template)?;

        let (request, solution) = self.profile_request(spec, point).await?;
        let profile = self
            .climate
            .write_profile(&request, &paths.atmosphere)
            .await?;
        debug!(
            point = point.index,
            species = ?profile.species_names,
            surface_pressure = profile.surface_pressure,
            "Climate profile written"
        );

        let labels =
            extend_atmosphere_file(&paths.atmosphere, &retrieved_species, &profile.species_names)
                .await?;
        let atmosphere_file = paths.atmosphere.display().to_string();
        let scr = render_scr(
            &template,
            &ScrValues {
                surface_pressure: profile.surface_pressure,
                surface_temperature: profile.surface_temperature,
                distance_au: point.distance_au,
                atmosphere_file: &atmosphere_file,
                atmosphere_labels: &labels,
            },
        )?;
        tokio::fs::write(&paths.scr, scr).await?;

        let spectrum = self.spectrum.generate(&paths.scr).await?;
        let mut rng = point_rng(spec.noise_seed, point.index);
        let noisy = inject_noise(&spectrum, point.snr, spec.fpfs_err, &mut rng)?;

        let observation = FakeObservation {
            lam: spectrum.lam,
            dlam: spectrum.dlam,
            dat: noisy.dat,
            err: noisy.err,
            snr: point.snr,
            surface_temperature: point.surface_temperature,
            distance_au: point.distance_au,
            mixing_ratio: point.mixing_ratio.clone(),
            co2_column: solution.as_ref().map(|s| s.co2_column),
            tropopause_temperature: solution.as_ref().map(|s| s.tropopause_temperature),
        };
        tokio::fs::write(&paths.data, serde_json::to_vec_pretty(&observation)?).await?;

        info!(
            point = point.index,
            data = %paths.data.display(),
            bins = observation.lam.len(),
            "Observation written"
        );
        Ok(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::test_support::*;
    use crate::port::climate_model::mocks::MockClimateModel;
    use crate::port::spectrum_model::mocks::MockSpectrumModel;

    const TEMPLATE: &str = "\
pmax = 1.e5
species_r = h2o,co2,o2,o3
rdgas = False
fnatm = x
skpatm = 0
colr = 1
colpr = 1
psclr = 1.
imix = 1
t0 = 250.
rdtmp = False
fntmp = x
skptmp = 0
colt = 2
colpt = 1
psclt = 1.
a = 1.0
";

    fn synthesizer(climate: Arc<MockClimateModel>) -> DataSynthesizer {
        DataSynthesizer::new(climate, Arc::new(MockSpectrumModel::new()))
    }

    #[tokio::test]
    async fn test_prepare_writes_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = temperature_experiment(dir.path().join("results"));
        spec.template = dir.path().join("inputs.scr");
        std::fs::write(&spec.template, TEMPLATE).unwrap();

        let climate = Arc::new(MockClimateModel::new());
        let points = GridPoint::expand(&spec).unwrap();
        let observation = synthesizer(Arc::clone(&climate))
            .prepare(&spec, &points[1])
            .await
            .unwrap();

        let paths = PointPaths::for_point(&spec, &points[1]);
        assert!(paths.data.exists());
        assert!(paths.scr.exists());
        assert_eq!(observation.surface_temperature, 276.0);
        assert_eq!(observation.err[0], spec.fpfs_err / 5.0);
        assert!(observation.co2_column.is_none());
        assert_eq!(climate.flux_calls(), 0);

        // O3 is not tracked by the climate model and gets a trace column
        let atmosphere = std::fs::read_to_string(&paths.atmosphere).unwrap();
        assert!(atmosphere.lines().next().unwrap().contains("O3"));
        let scr = std::fs::read_to_string(&paths.scr).unwrap();
        assert!(scr.contains("t0 = 276.0\n"));
        assert!(scr.contains("colr = 5,6,8,10\n"));

        let stored: FakeObservation =
            serde_json::from_slice(&std::fs::read(&paths.data).unwrap()).unwrap();
        assert_eq!(stored.dat.len(), observation.dat.len());
        assert_eq!(stored.snr, 5.0);
    }

    #[tokio::test]
    async fn test_stable_climate_point_records_solution() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = habitable_zone_experiment(dir.path().join("results"));
        spec.template = dir.path().join("inputs.scr");
        std::fs::write(&spec.template, TEMPLATE).unwrap();

        let climate = Arc::new(MockClimateModel::new());
        let points = GridPoint::expand(&spec).unwrap();
        let observation = synthesizer(Arc::clone(&climate))
            .prepare(&spec, &points[0])
            .await
            .unwrap();

        assert!(observation.co2_column.unwrap() > 0.0);
        assert!(observation.tropopause_temperature.unwrap() > 100.0);
        assert!(climate.flux_calls() > 0);
        assert_eq!(climate.profile_calls(), 1);
    }

    #[tokio::test]
    async fn test_unconverged_solve_fails_point() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = habitable_zone_experiment(dir.path().join("results"));
        spec.template = dir.path().join("inputs.scr");
        std::fs::write(&spec.template, TEMPLATE).unwrap();

        let climate = Arc::new(MockClimateModel::new());
        let points = GridPoint::expand(&spec).unwrap();
        let result = synthesizer(Arc::clone(&climate))
            .with_solver_options(SolverOptions {
                max_iterations: 0,
                ..SolverOptions::default()
            })
            .prepare(&spec, &points[0])
            .await;

        assert!(matches!(result, Err(AppError::Solver(_))));
        assert_eq!(climate.profile_calls(), 0);
        assert!(!PointPaths::for_point(&spec, &points[0]).data.exists());
    }

    #[tokio::test]
    async fn test_same_seed_reproduces_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = temperature_experiment(dir.path().join("results"));
        spec.template = dir.path().join("inputs.scr");
        std::fs::write(&spec.template, TEMPLATE).unwrap();

        let points = GridPoint::expand(&spec).unwrap();
        let synth = synthesizer(Arc::new(MockClimateModel::new()));
        let first = synth.prepare(&spec, &points[0]).await.unwrap();
        let second = synth.prepare(&spec, &points[0]).await.unwrap();
        assert_eq!(first.dat, second.dat);
    }

    #[tokio::test]
    async fn test_climate_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = temperature_experiment(dir.path().join("results"));
        spec.template = dir.path().join("inputs.scr");
        std::fs::write(&spec.template, TEMPLATE).unwrap();

        let points = GridPoint::expand(&spec).unwrap();
        let result = synthesizer(Arc::new(MockClimateModel::failing()))
            .prepare(&spec, &points[0])
            .await;
        assert!(matches!(result, Err(AppError::Model(_))));
    }
}
