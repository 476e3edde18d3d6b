// Observation Source Port

use crate::domain::{ExperimentSpec, FakeObservation, GridPoint};
use crate::error::Result;
use async_trait::async_trait;

/// Produces the fake observation of a grid point and writes it to `<stem>_data.json`
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn prepare(&self, spec: &ExperimentSpec, point: &GridPoint) -> Result<FakeObservation>;
}

pub mod mocks {
    use super::*;
    use crate::domain::PointPaths;
    use crate::error::AppError;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Writes a tiny observation, optionally failing for chosen point indices
    #[derive(Default)]
    pub struct MockObservationSource {
        failing: HashSet<usize>,
        prepared: Mutex<Vec<usize>>,
    }

    impl MockObservationSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_at(indices: impl IntoIterator<Item = usize>) -> Self {
            Self {
                failing: indices.into_iter().collect(),
                prepared: Mutex::new(Vec::new()),
            }
        }

        /// Point indices prepared so far, in call order
        pub fn prepared(&self) -> Vec<usize> {
            self.prepared.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObservationSource for MockObservationSource {
        async fn prepare(&self, spec: &ExperimentSpec, point: &GridPoint) -> Result<FakeObservation> {
            self.prepared.lock().unwrap().push(point.index);
            if self.failing.contains(&point.index) {
                return Err(AppError::Solver(format!(
                    "root solve failed for point {}",
                    point.index
                )));
            }

            let observation = FakeObservation {
                lam: vec![0.5, 0.6],
                dlam: vec![0.1, 0.1],
                dat: vec![1.0e-10, 1.1e-10],
                err: vec![spec.fpfs_err / point.snr; 2],
                snr: point.snr,
                surface_temperature: point.surface_temperature,
                distance_au: point.distance_au,
                mixing_ratio: point.mixing_ratio.clone(),
                co2_column: None,
                tropopause_temperature: None,
            };
            let paths = PointPaths::for_point(spec, point);
            if let Some(parent) = paths.data.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&paths.data, serde_json::to_vec(&observation)?)?;
            Ok(observation)
        }
    }
}
