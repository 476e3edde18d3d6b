// Planner Service - turns an experiment into ledger jobs

pub mod plan;

pub use plan::{PlanOptions, PlannedPoint, RunPlan};

use crate::domain::ExperimentSpec;
use crate::error::Result;
use crate::port::{IdProvider, JobRepository, TimeProvider};
use std::sync::Arc;

/// Planner Service
pub struct PlannerService {
    job_repo: Arc<dyn JobRepository>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl PlannerService {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            job_repo,
            id_provider,
            time_provider,
        }
    }

    /// Expand the grid and record both jobs of every point
    pub async fn plan(&self, spec: &ExperimentSpec, options: &PlanOptions) -> Result<RunPlan> {
        plan::execute(
            self.job_repo.as_ref(),
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            spec,
            options,
        )
        .await
    }
}
