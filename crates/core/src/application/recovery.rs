// Crash recovery for retrieval runs
use crate::domain::{JobState, RetrievalJob};
use crate::port::{JobRepository, TaskExecutor, TimeProvider};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Reason recorded on jobs found RUNNING at startup
pub const ORPHANED_JOB_REASON: &str = "orchestrator exited while the retrieval was running";

/// Crash recovery service
///
/// Before a run starts, detects retrievals that were RUNNING when a previous
/// orchestrator died. Their processes are killed and the jobs marked FAILED so
/// a resumed run schedules them again.
pub struct RecoveryService {
    job_repo: Arc<dyn JobRepository>,
    task_executor: Arc<dyn TaskExecutor>,
    time_provider: Arc<dyn TimeProvider>,
}

impl RecoveryService {
    /// Create a new recovery service
    ///
    /// # Example
    /// ```ignore
    /// let recovery = RecoveryService::new(job_repo, task_executor, time_provider);
    /// recovery.recover_orphaned_jobs("experiment1").await?;
    /// ```
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        task_executor: Arc<dyn TaskExecutor>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            job_repo,
            task_executor,
            time_provider,
        }
    }

    /// Recover orphaned jobs of one experiment
    ///
    /// Algorithm:
    /// 1. Find all RUNNING jobs of the experiment
    /// 2. For jobs with a PID that is still alive, kill the process
    /// 3. Mark every job FAILED with `ORPHANED_JOB_REASON`
    ///
    /// # Returns
    /// Number of jobs recovered
    pub async fn recover_orphaned_jobs(&self, experiment: &str) -> crate::error::Result<usize> {
        info!(experiment = %experiment, "Starting orphaned job recovery");

        let running_jobs = self
            .job_repo
            .find_by_state(experiment, JobState::Running)
            .await?;
        let mut recovered_count = 0;

        for mut job in running_jobs {
            info!(
                job_id = %job.id,
                started_at = ?job.started_at,
                pid = ?job.pid,
                "Recovering orphaned job"
            );
            self.recover_single_job(&mut job).await?;
            recovered_count += 1;
        }

        info!(recovered_count = %recovered_count, "Orphaned job recovery complete");
        Ok(recovered_count)
    }

    async fn recover_single_job(&self, job: &mut RetrievalJob) -> crate::error::Result<()> {
        let now = self.time_provider.now_millis();

        if let Some(pid) = job.pid.and_then(|p| u32::try_from(p).ok()) {
            if self.task_executor.is_alive(pid) {
                warn!(
                    job_id = %job.id,
                    pid = %pid,
                    "Orphaned retrieval still alive, killing"
                );

                if let Err(e) = self.task_executor.kill(pid).await {
                    error!(
                        job_id = %job.id,
                        pid = %pid,
                        error = %e,
                        "Failed to kill orphaned process"
                    );
                }
            }
        } else {
            warn!(job_id = %job.id, "RUNNING job without pid");
        }

        job.fail(now, ORPHANED_JOB_REASON)?;
        job.pid = None;
        self.job_repo.update(job).await?;

        info!(job_id = %job.id, "Orphaned job marked as FAILED");
        Ok(())
    }
}
