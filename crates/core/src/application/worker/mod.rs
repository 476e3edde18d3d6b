// Retrieval Pool - capped process pool driving one experiment run

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::planner::{PlannedPoint, RunPlan};
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::{ExperimentSpec, JobState, RetrievalJob};
use crate::error::{AppError, Result};
use crate::port::{
    ExecutionResult, ExecutionStatus, JobRepository, ObservationSource, ProcessHandle,
    TaskExecutor, TimeProvider,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Pool settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Process slots including the orchestrator
    pub max_processes: usize,
    pub poll_interval: Duration,
    /// Kill retrievals running longer than this
    pub job_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_processes: DEFAULT_MAX_PROCESSES,
            poll_interval: DEFAULT_POLL_INTERVAL,
            job_timeout: None,
        }
    }
}

/// Grid point whose observation could not be produced
#[derive(Debug, Clone, Serialize)]
pub struct DataFailure {
    pub point_index: usize,
    pub file_stem: String,
    pub error: String,
}

/// Outcome of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub total_jobs: usize,
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub data_failures: Vec<DataFailure>,
    pub elapsed_secs: f64,
    pub interrupted: bool,
}

impl RunReport {
    pub fn completed(&self) -> usize {
        self.done + self.failed + self.cancelled
    }
}

struct RunningJob {
    job: RetrievalJob,
    handle: Box<dyn ProcessHandle>,
    timed_out: bool,
}

/// Process pool running the retrievals of a plan
///
/// Each tick reaps finished processes, enforces the optional timeout and
/// starts at most one unit of work: a due retry or the next grid point
/// (observation first, then both retrievals).
pub struct RetrievalPool {
    job_repo: Arc<dyn JobRepository>,
    task_executor: Arc<dyn TaskExecutor>,
    observation_source: Arc<dyn ObservationSource>,
    retry_policy: Arc<RetryPolicy>,
    time_provider: Arc<dyn TimeProvider>,
    config: PoolConfig,
}

impl RetrievalPool {
    /// Create a new pool
    ///
    /// # Errors
    /// - AppError::Config if `max_processes` leaves no room for a whole point
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        task_executor: Arc<dyn TaskExecutor>,
        observation_source: Arc<dyn ObservationSource>,
        retry_policy: Arc<RetryPolicy>,
        time_provider: Arc<dyn TimeProvider>,
        config: PoolConfig,
    ) -> Result<Self> {
        let jobs_per_point = crate::domain::Hypothesis::BOTH.len();
        if config.max_processes < jobs_per_point + ORCHESTRATOR_SLOTS {
            return Err(AppError::Config(format!(
                "max_processes must be at least {} (one orchestrator slot plus {} retrievals per point), got {}",
                jobs_per_point + ORCHESTRATOR_SLOTS,
                jobs_per_point,
                config.max_processes
            )));
        }
        if config.poll_interval.is_zero() {
            return Err(AppError::Config("poll_interval must be positive".to_string()));
        }
        Ok(Self {
            job_repo,
            task_executor,
            observation_source,
            retry_policy,
            time_provider,
            config,
        })
    }

    /// Run every job of the plan to a terminal state
    pub async fn run(
        &self,
        spec: &ExperimentSpec,
        plan: RunPlan,
        mut shutdown: ShutdownToken,
    ) -> Result<RunReport> {
        let started = Instant::now();
        let mut report = RunReport {
            total_jobs: plan.job_count(),
            ..RunReport::default()
        };
        let mut pending: VecDeque<PlannedPoint> = plan.points.into();
        let mut waiting_retries: Vec<RetrievalJob> = Vec::new();
        let mut running: Vec<RunningJob> = Vec::new();

        info!(
            experiment = %spec.name,
            points = pending.len(),
            jobs = report.total_jobs,
            max_processes = self.config.max_processes,
            "Pool started"
        );

        loop {
            if shutdown.is_shutdown() {
                self.stop(&mut running, &mut pending, &mut waiting_retries, &mut report)
                    .await?;
                break;
            }

            self.reap(&mut running, &mut waiting_retries, &mut report)
                .await?;

            if report.completed() >= report.total_jobs {
                break;
            }

            self.spawn_next(spec, &mut running, &mut pending, &mut waiting_retries, &mut report)
                .await?;

            info!(
                running = running.len(),
                completed = report.completed(),
                total = report.total_jobs,
                minutes = %format!("{:.2}", started.elapsed().as_secs_f64() / 60.0),
                "Pool progress"
            );

            if report.completed() >= report.total_jobs {
                break;
            }

            tokio::select! {
                _ = sleep(self.config.poll_interval) => {},
                _ = shutdown.wait() => {
                    info!("Pool interrupted during poll");
                }
            }
        }

        report.elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            experiment = %spec.name,
            done = report.done,
            failed = report.failed,
            cancelled = report.cancelled,
            data_failures = report.data_failures.len(),
            elapsed_secs = report.elapsed_secs,
            "Pool finished"
        );
        Ok(report)
    }

    fn has_capacity(&self, running: usize, needed: usize) -> bool {
        running + needed + ORCHESTRATOR_SLOTS <= self.config.max_processes
    }

    /// Collect finished processes and settle their jobs
    async fn reap(
        &self,
        running: &mut Vec<RunningJob>,
        waiting_retries: &mut Vec<RetrievalJob>,
        report: &mut RunReport,
    ) -> Result<()> {
        let timeout_ms = self.config.job_timeout.map(|t| t.as_millis() as i64);
        let mut finished = Vec::new();

        let mut i = 0;
        while i < running.len() {
            let entry = &mut running[i];
            match entry.handle.try_wait() {
                Ok(Some(result)) => {
                    let entry = running.swap_remove(i);
                    finished.push((entry.job, Ok(result), entry.timed_out));
                    continue;
                }
                Ok(None) => {
                    if let Some(timeout_ms) = timeout_ms {
                        if !entry.timed_out && self.retry_policy.is_overdue(&entry.job, timeout_ms) {
                            entry.timed_out = true;
                            if let Err(e) = entry.handle.start_kill() {
                                error!(job_id = %entry.job.id, error = %e, "Failed to kill overdue retrieval");
                            }
                        }
                    }
                }
                Err(e) => {
                    let entry = running.swap_remove(i);
                    finished.push((entry.job, Err(e), entry.timed_out));
                    continue;
                }
            }
            i += 1;
        }

        for (job, outcome, timed_out) in finished {
            match outcome {
                Ok(result) => self.settle(job, result, timed_out, waiting_retries, report).await?,
                Err(e) => {
                    let reason = format!("lost track of process: {}", e);
                    self.handle_failure(job, reason, waiting_retries, report).await?;
                }
            }
        }
        Ok(())
    }

    async fn settle(
        &self,
        mut job: RetrievalJob,
        result: ExecutionResult,
        timed_out: bool,
        waiting_retries: &mut Vec<RetrievalJob>,
        report: &mut RunReport,
    ) -> Result<()> {
        let output_exists = Path::new(&job.output_path).exists();
        if result.status == ExecutionStatus::Success && output_exists {
            job.complete(self.time_provider.now_millis(), result.exit_code)?;
            job.pid = None;
            self.job_repo.update(&job).await?;
            report.done += 1;
            info!(
                job_id = %job.id,
                stem = %job.file_stem,
                hypothesis = %job.hypothesis,
                duration_ms = result.duration_ms,
                "Retrieval finished"
            );
            return Ok(());
        }

        job.exit_code = result.exit_code;
        let reason = if timed_out {
            format!("timed out after {}ms", result.duration_ms)
        } else {
            match result.status {
                ExecutionStatus::Success => format!("output {} missing", job.output_path),
                ExecutionStatus::Failed => match result.exit_code {
                    Some(code) => format!("exit code {}", code),
                    None => "exit code unknown".to_string(),
                },
                ExecutionStatus::Killed => "killed by signal".to_string(),
            }
        };
        self.handle_failure(job, reason, waiting_retries, report).await
    }

    /// Retry or fail a job whose run did not succeed
    async fn handle_failure(
        &self,
        mut job: RetrievalJob,
        reason: String,
        waiting_retries: &mut Vec<RetrievalJob>,
        report: &mut RunReport,
    ) -> Result<()> {
        match self.retry_policy.should_retry(&job) {
            RetryDecision::Retry(delay_ms) => {
                warn!(
                    job_id = %job.id,
                    attempt = %job.attempts,
                    delay_ms = %delay_ms,
                    reason = %reason,
                    "Retrying retrieval after failure"
                );
                job.last_error = Some(reason);
                self.retry_policy.prepare_for_retry(&mut job, delay_ms)?;
                self.job_repo.update(&job).await?;
                waiting_retries.push(job);
            }
            RetryDecision::Failed => {
                error!(
                    job_id = %job.id,
                    stem = %job.file_stem,
                    hypothesis = %job.hypothesis,
                    reason = %reason,
                    "Retrieval failed"
                );
                job.fail(self.time_provider.now_millis(), reason)?;
                job.pid = None;
                self.job_repo.update(&job).await?;
                report.failed += 1;
            }
        }
        Ok(())
    }

    /// Start one unit of work if a slot is free
    async fn spawn_next(
        &self,
        spec: &ExperimentSpec,
        running: &mut Vec<RunningJob>,
        pending: &mut VecDeque<PlannedPoint>,
        waiting_retries: &mut Vec<RetrievalJob>,
        report: &mut RunReport,
    ) -> Result<()> {
        if let Some(pos) = waiting_retries
            .iter()
            .position(|job| self.retry_policy.is_due(job))
        {
            if self.has_capacity(running.len(), 1) {
                let job = waiting_retries.remove(pos);
                self.launch(job, running, waiting_retries, report).await?;
            }
            return Ok(());
        }

        let Some(next) = pending.front() else {
            return Ok(());
        };
        if !self.has_capacity(running.len(), next.jobs.len()) {
            return Ok(());
        }
        let Some(planned) = pending.pop_front() else {
            return Ok(());
        };

        if planned.needs_data {
            if let Err(e) = self.observation_source.prepare(spec, &planned.point).await {
                let stem = planned.point.file_stem();
                error!(
                    point = planned.point.index,
                    stem = %stem,
                    error = %e,
                    "Observation preparation failed, skipping point"
                );
                let now = self.time_provider.now_millis();
                for mut job in planned.jobs {
                    job.fail(now, format!("data preparation failed: {}", e))?;
                    self.job_repo.update(&job).await?;
                    report.failed += 1;
                }
                report.data_failures.push(DataFailure {
                    point_index: planned.point.index,
                    file_stem: stem,
                    error: e.to_string(),
                });
                return Ok(());
            }
        }

        for job in planned.jobs {
            self.launch(job, running, waiting_retries, report).await?;
        }
        Ok(())
    }

    async fn launch(
        &self,
        mut job: RetrievalJob,
        running: &mut Vec<RunningJob>,
        waiting_retries: &mut Vec<RetrievalJob>,
        report: &mut RunReport,
    ) -> Result<()> {
        let now = self.time_provider.now_millis();
        match self.task_executor.spawn(&job) {
            Ok(handle) => {
                job.start(now, handle.pid())?;
                self.job_repo.update(&job).await?;
                info!(
                    job_id = %job.id,
                    stem = %job.file_stem,
                    hypothesis = %job.hypothesis,
                    pid = ?job.pid,
                    attempt = job.attempts,
                    "Retrieval started"
                );
                running.push(RunningJob {
                    job,
                    handle,
                    timed_out: false,
                });
                Ok(())
            }
            Err(e) => {
                job.start(now, None)?;
                self.handle_failure(job, format!("spawn failed: {}", e), waiting_retries, report)
                    .await
            }
        }
    }

    /// Kill running children and cancel everything else
    async fn stop(
        &self,
        running: &mut Vec<RunningJob>,
        pending: &mut VecDeque<PlannedPoint>,
        waiting_retries: &mut Vec<RetrievalJob>,
        report: &mut RunReport,
    ) -> Result<()> {
        warn!(
            running = running.len(),
            pending_points = pending.len(),
            "Shutdown requested, stopping retrievals"
        );
        report.interrupted = true;
        let now = self.time_provider.now_millis();

        for mut entry in running.drain(..) {
            if let Err(e) = entry.handle.start_kill() {
                error!(job_id = %entry.job.id, error = %e, "Failed to kill retrieval");
            }
            entry.job.cancel(now)?;
            entry.job.pid = None;
            self.job_repo.update(&entry.job).await?;
            report.cancelled += 1;
        }

        let queued = waiting_retries
            .drain(..)
            .chain(pending.drain(..).flat_map(|p| p.jobs));
        for mut job in queued.collect::<Vec<_>>() {
            job.cancel(now)?;
            self.job_repo.update(&job).await?;
            report.cancelled += 1;
        }
        Ok(())
    }
}
