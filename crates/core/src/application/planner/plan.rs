// Plan Use Case

use crate::domain::{
    DomainError, ExperimentSpec, GridPoint, Hypothesis, JobState, PointPaths, RetrievalJob,
};
use crate::error::Result;
use crate::port::{IdProvider, JobRepository, TimeProvider};
use std::collections::HashSet;
use tracing::{debug, info};

/// Plan options
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Keep finished points and reuse existing observations
    pub resume: bool,
    pub max_attempts: i32,
    pub backoff_factor: f64,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            resume: false,
            max_attempts: 1,
            backoff_factor: 2.0,
        }
    }
}

/// A grid point with outstanding work
#[derive(Debug, Clone)]
pub struct PlannedPoint {
    pub point: GridPoint,
    /// One queued job per hypothesis
    pub jobs: Vec<RetrievalJob>,
    /// False when a resumed run can reuse the observation on disk
    pub needs_data: bool,
}

/// Work for one run of an experiment
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub experiment: String,
    pub points: Vec<PlannedPoint>,
    /// Points already finished by an earlier run
    pub skipped: usize,
}

impl RunPlan {
    pub fn job_count(&self) -> usize {
        self.points.iter().map(|p| p.jobs.len()).sum()
    }
}

/// Execute plan use case
///
/// # Arguments
///
/// * `job_repo` - Job ledger
/// * `id_provider` - ID generator (injected for determinism)
/// * `time_provider` - Time provider (injected for determinism)
/// * `spec` - Validated or unvalidated experiment
/// * `options` - Resume and retry settings
pub async fn execute(
    job_repo: &dyn JobRepository,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    spec: &ExperimentSpec,
    options: &PlanOptions,
) -> Result<RunPlan> {
    spec.validate()?;
    let points = GridPoint::expand(spec)?;

    let mut stems = HashSet::with_capacity(points.len());
    for point in &points {
        if !stems.insert(point.file_stem()) {
            return Err(DomainError::InvalidExperiment(format!(
                "grid contains duplicate point {}",
                point.file_stem()
            ))
            .into());
        }
    }

    tokio::fs::create_dir_all(spec.save_dir.join("logs")).await?;

    let tested_gas = spec.tested_gas_key();
    let now = time_provider.now_millis();
    let mut planned = Vec::with_capacity(points.len());
    let mut skipped = 0;

    for point in points {
        let stem = point.file_stem();
        let paths = PointPaths::for_point(spec, &point);
        let existing = job_repo.find_by_point(&spec.name, &stem).await?;

        let finished = existing.len() == Hypothesis::BOTH.len()
            && existing.iter().all(|j| {
                j.state == JobState::Done && std::path::Path::new(&j.output_path).exists()
            });
        if options.resume && finished {
            debug!(stem = %stem, "Point already finished, skipping");
            skipped += 1;
            continue;
        }

        let mut jobs = Vec::with_capacity(Hypothesis::BOTH.len());
        for hypothesis in Hypothesis::BOTH {
            let mut job = match existing.iter().find(|j| j.hypothesis == hypothesis) {
                Some(job) => {
                    let mut job = job.clone();
                    job.reset();
                    job
                }
                None => RetrievalJob::new(
                    id_provider.generate_id(),
                    now,
                    spec.name.clone(),
                    point.index as i64,
                    stem.clone(),
                    hypothesis,
                ),
            };
            job.point_index = point.index as i64;
            job.tested_gas = tested_gas.clone();
            job.distance_au = point.distance_au;
            job.data_path = paths.data.display().to_string();
            job.output_path = paths.output(hypothesis).display().to_string();
            job.log_path = Some(paths.log(hypothesis, &tested_gas).display().to_string());
            job.max_attempts = options.max_attempts.max(1);
            job.backoff_factor = options.backoff_factor;

            if existing.iter().any(|j| j.id == job.id) {
                job_repo.update(&job).await?;
            } else {
                job_repo.insert(&job).await?;
            }
            jobs.push(job);
        }

        planned.push(PlannedPoint {
            needs_data: !(options.resume && paths.data.exists()),
            point,
            jobs,
        });
    }

    let plan = RunPlan {
        experiment: spec.name.clone(),
        points: planned,
        skipped,
    };
    info!(
        experiment = %plan.experiment,
        points = plan.points.len(),
        jobs = plan.job_count(),
        skipped = plan.skipped,
        resume = options.resume,
        "Run planned"
    );
    Ok(plan)
}
