// Retry logic for failed retrieval runs
use crate::domain::error::Result as DomainResult;
use crate::domain::RetrievalJob;
use crate::port::TimeProvider;
use std::sync::Arc;
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the job (with backoff delay in ms)
    Retry(i64),
    /// Do not retry, job has failed permanently
    Failed,
}

/// Retry policy
///
/// Determines if a job should be retried based on:
/// - Number of runs already started
/// - Maximum attempts allowed
/// - Backoff factor for exponential delay
pub struct RetryPolicy {
    time_provider: Arc<dyn TimeProvider>,
    base_delay_ms: i64,
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    /// * `time_provider` - Time provider for current time
    /// * `base_delay_ms` - Base delay in milliseconds, scaled by `backoff_factor^attempts`
    ///
    /// # Example
    /// ```text
    /// let policy = RetryPolicy::new(Arc::new(SystemTimeProvider), 1000);
    /// ```
    pub fn new(time_provider: Arc<dyn TimeProvider>, base_delay_ms: i64) -> Self {
        Self {
            time_provider,
            base_delay_ms,
        }
    }

    /// Determine if a failed job should be retried
    ///
    /// Returns:
    /// - `RetryDecision::Retry(delay_ms)` if job should be retried with calculated backoff
    /// - `RetryDecision::Failed` if max attempts reached
    ///
    /// Backoff formula:
    /// delay = base_delay * (backoff_factor ^ attempts) * jitter
    ///
    /// # Example
    /// ```text
    /// match policy.should_retry(&job) {
    ///     RetryDecision::Retry(delay_ms) => policy.prepare_for_retry(&mut job, delay_ms)?,
    ///     RetryDecision::Failed => job.fail(now, reason)?,
    /// }
    /// ```
    pub fn should_retry(&self, job: &RetrievalJob) -> RetryDecision {
        if job.attempts >= job.max_attempts {
            warn!(
                job_id = %job.id,
                attempts = %job.attempts,
                max_attempts = %job.max_attempts,
                "Max retry attempts reached"
            );
            return RetryDecision::Failed;
        }

        let exponent = job.attempts.max(0);
        let base_delay_ms = self.base_delay_ms as f64 * job.backoff_factor.powi(exponent);

        // ±10% jitter, deterministic per job id
        let jitter_seed = job.id.chars().map(|c| c as u32).sum::<u32>();
        let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0); // 0.9 to 1.1

        let delay_ms = (base_delay_ms * jitter_factor) as i64;

        info!(
            job_id = %job.id,
            attempt = %job.attempts,
            max_attempts = %job.max_attempts,
            delay_ms = %delay_ms,
            "Scheduling retry"
        );

        RetryDecision::Retry(delay_ms)
    }

    /// Put a failed job back in the queue, eligible after `delay_ms`
    ///
    /// # Errors
    /// - DomainError::InvalidStateTransition unless the job is RUNNING or FAILED
    pub fn prepare_for_retry(&self, job: &mut RetrievalJob, delay_ms: i64) -> DomainResult<()> {
        job.requeue(self.time_provider.now_millis() + delay_ms)?;

        info!(
            job_id = %job.id,
            attempt = %job.attempts,
            retry_at = ?job.retry_at,
            "Job prepared for retry"
        );
        Ok(())
    }

    /// True once a queued job's backoff has elapsed
    pub fn is_due(&self, job: &RetrievalJob) -> bool {
        job.retry_at
            .map_or(true, |at| self.time_provider.now_millis() >= at)
    }

    /// Check if a running job has exceeded its time budget
    pub fn is_overdue(&self, job: &RetrievalJob, timeout_ms: i64) -> bool {
        if let Some(started_at) = job.started_at {
            let now = self.time_provider.now_millis();
            let elapsed_ms = now - started_at;
            if elapsed_ms > timeout_ms {
                warn!(
                    job_id = %job.id,
                    timeout_ms = %timeout_ms,
                    elapsed_ms = %elapsed_ms,
                    "Job timeout exceeded"
                );
                return true;
            }
        }
        false
    }
}
