// Retrieval Job Domain Model

use serde::{Deserialize, Serialize};

/// Job ID (UUID v4)
pub type JobId = String;

/// Job State
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(JobState::Queued),
            "RUNNING" => Some(JobState::Running),
            "DONE" => Some(JobState::Done),
            "FAILED" => Some(JobState::Failed),
            "CANCELLED" => Some(JobState::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "QUEUED"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Done => write!(f, "DONE"),
            JobState::Failed => write!(f, "FAILED"),
            JobState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Retrieval hypothesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Hypothesis {
    /// Every gas of the template is retrieved
    AllGases,
    /// The tested gas is removed from the retrieval
    GasRemoved,
}

impl Hypothesis {
    pub const BOTH: [Hypothesis; 2] = [Hypothesis::AllGases, Hypothesis::GasRemoved];

    /// File suffix: `all` or `no<GAS>`
    pub fn suffix(&self, tested_gas: &str) -> String {
        match self {
            Hypothesis::AllGases => "all".to_string(),
            Hypothesis::GasRemoved => format!("no{}", tested_gas),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ALL_GASES" => Some(Hypothesis::AllGases),
            "GAS_REMOVED" => Some(Hypothesis::GasRemoved),
            _ => None,
        }
    }
}

impl std::fmt::Display for Hypothesis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hypothesis::AllGases => write!(f, "ALL_GASES"),
            Hypothesis::GasRemoved => write!(f, "GAS_REMOVED"),
        }
    }
}

/// One nested-sampling retrieval run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalJob {
    // Identity
    pub id: JobId,
    pub experiment: String,
    pub point_index: i64,
    pub file_stem: String,
    pub hypothesis: Hypothesis,
    pub tested_gas: String,
    pub distance_au: f64,

    pub state: JobState,
    pub created_at: i64, // epoch ms
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,

    // Artifacts
    pub data_path: String,
    pub output_path: String,
    pub log_path: Option<String>,

    // Execution
    pub pid: Option<i64>,
    pub exit_code: Option<i32>,
    pub last_error: Option<String>,

    // Retry (attempts counts started runs)
    pub attempts: i32,
    pub max_attempts: i32,
    pub backoff_factor: f64,
    pub retry_at: Option<i64>, // epoch ms
}

impl RetrievalJob {
    /// Create a new queued job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `experiment` - Experiment name
    /// * `point_index` - Index of the grid point
    /// * `file_stem` - Artifact stem of the grid point
    /// * `hypothesis` - Which retrieval hypothesis this job runs
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        experiment: impl Into<String>,
        point_index: i64,
        file_stem: impl Into<String>,
        hypothesis: Hypothesis,
    ) -> Self {
        Self {
            id: id.into(),
            experiment: experiment.into(),
            point_index,
            file_stem: file_stem.into(),
            hypothesis,
            tested_gas: String::new(),
            distance_au: 1.0,
            state: JobState::Queued,
            created_at,
            started_at: None,
            finished_at: None,
            data_path: String::new(),
            output_path: String::new(),
            log_path: None,
            pid: None,
            exit_code: None,
            last_error: None,
            attempts: 0,
            max_attempts: 1,
            backoff_factor: 2.0,
            retry_at: None,
        }
    }

    /// Create a test job with deterministic ID and timestamp.
    ///
    /// Uses a simple counter for deterministic test IDs (test-1, test-2, ...).
    /// Timestamps start at 1000 and increment by 1000.
    pub fn new_test(experiment: impl Into<String>, hypothesis: Hypothesis) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let mut job = Self::new(
            format!("test-{}", counter),
            (counter * 1000) as i64,
            experiment,
            counter as i64,
            format!("Ts=288.00000_SNR={:.5}", counter as f64),
            hypothesis,
        );
        job.tested_gas = "H2O".to_string();
        job.data_path = format!("/tmp/test-{}_data.json", counter);
        job.output_path = format!("/tmp/test-{}_{}.json", counter, hypothesis.suffix("H2O"));
        job
    }

    /// Transition to Running state with explicit timestamp
    pub fn start(&mut self, now_millis: i64, pid: Option<u32>) -> crate::domain::error::Result<()> {
        if self.state != JobState::Queued {
            return Err(self.transition_error("RUNNING"));
        }
        self.state = JobState::Running;
        self.attempts += 1;
        self.started_at = Some(now_millis);
        self.finished_at = None;
        self.pid = pid.map(i64::from);
        self.retry_at = None;
        Ok(())
    }

    /// Transition to Done state with explicit timestamp
    pub fn complete(&mut self, now_millis: i64, exit_code: Option<i32>) -> crate::domain::error::Result<()> {
        if self.state != JobState::Running {
            return Err(self.transition_error("DONE"));
        }
        self.state = JobState::Done;
        self.finished_at = Some(now_millis);
        self.exit_code = exit_code;
        self.last_error = None;
        Ok(())
    }

    /// Mark as Failed with explicit timestamp
    ///
    /// Queued jobs can fail when their point's observation could not be made.
    pub fn fail(&mut self, now_millis: i64, reason: impl Into<String>) -> crate::domain::error::Result<()> {
        if !matches!(self.state, JobState::Running | JobState::Queued) {
            return Err(self.transition_error("FAILED"));
        }
        self.state = JobState::Failed;
        self.finished_at = Some(now_millis);
        self.last_error = Some(reason.into());
        Ok(())
    }

    /// Queue a failed run again, eligible from `retry_at`
    ///
    /// Attempts and the last error are kept for the retry policy.
    pub fn requeue(&mut self, retry_at: i64) -> crate::domain::error::Result<()> {
        if !matches!(self.state, JobState::Running | JobState::Failed) {
            return Err(self.transition_error("QUEUED"));
        }
        self.state = JobState::Queued;
        self.started_at = None;
        self.finished_at = None;
        self.pid = None;
        self.retry_at = Some(retry_at);
        Ok(())
    }

    /// Mark as Cancelled with explicit timestamp
    pub fn cancel(&mut self, now_millis: i64) -> crate::domain::error::Result<()> {
        if self.state.is_terminal() {
            return Err(self.transition_error("CANCELLED"));
        }
        self.state = JobState::Cancelled;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// Put the job back in the queue for a fresh run
    pub fn reset(&mut self) {
        self.state = JobState::Queued;
        self.started_at = None;
        self.finished_at = None;
        self.pid = None;
        self.exit_code = None;
        self.last_error = None;
        self.attempts = 0;
        self.retry_at = None;
    }

    fn transition_error(&self, to: &str) -> crate::domain::DomainError {
        crate::domain::DomainError::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lifecycle() {
        let mut job = RetrievalJob::new_test("exp", Hypothesis::AllGases);
        assert_eq!(job.state, JobState::Queued);

        job.start(2000, Some(42)).unwrap();
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.pid, Some(42));
        assert_eq!(job.attempts, 1);

        job.complete(3000, Some(0)).unwrap();
        assert_eq!(job.state, JobState::Done);
        assert_eq!(job.finished_at, Some(3000));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut job = RetrievalJob::new_test("exp", Hypothesis::GasRemoved);
        assert!(job.complete(1000, Some(0)).is_err());

        job.start(1000, None).unwrap();
        assert!(job.start(2000, None).is_err());

        job.fail(3000, "exit code 1").unwrap();
        assert!(job.cancel(4000).is_err());
    }

    #[test]
    fn test_fail_rejected_after_done() {
        let mut job = RetrievalJob::new_test("exp", Hypothesis::AllGases);
        job.start(1, Some(1)).unwrap();
        job.complete(2, Some(0)).unwrap();

        assert!(matches!(
            job.fail(3, "late failure"),
            Err(crate::domain::DomainError::InvalidStateTransition { .. })
        ));
        assert_eq!(job.state, JobState::Done);
        assert!(job.last_error.is_none());
        assert_eq!(job.finished_at, Some(2));
    }

    #[test]
    fn test_queued_job_can_fail() {
        let mut job = RetrievalJob::new_test("exp", Hypothesis::GasRemoved);
        job.fail(5, "data preparation failed: no spectrum").unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn test_requeue_after_failed_run() {
        let mut job = RetrievalJob::new_test("exp", Hypothesis::AllGases);
        job.start(1000, Some(9)).unwrap();
        job.fail(2000, "exit code 1").unwrap();

        job.requeue(2500).unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.retry_at, Some(2500));
        assert!(job.pid.is_none());
        assert!(job.finished_at.is_none());
        assert_eq!(job.attempts, 1);
        assert_eq!(job.last_error.as_deref(), Some("exit code 1"));
    }

    #[test]
    fn test_requeue_rejected_for_finished_jobs() {
        let mut cancelled = RetrievalJob::new_test("exp", Hypothesis::AllGases);
        cancelled.cancel(1000).unwrap();
        assert!(cancelled.requeue(2000).is_err());
        assert_eq!(cancelled.state, JobState::Cancelled);

        let mut done = RetrievalJob::new_test("exp", Hypothesis::GasRemoved);
        done.start(1000, None).unwrap();
        done.complete(2000, Some(0)).unwrap();
        assert!(done.requeue(3000).is_err());
        assert_eq!(done.state, JobState::Done);

        let mut queued = RetrievalJob::new_test("exp", Hypothesis::AllGases);
        assert!(queued.requeue(3000).is_err());
    }

    #[test]
    fn test_reset_clears_execution_fields() {
        let mut job = RetrievalJob::new_test("exp", Hypothesis::AllGases);
        job.start(1000, Some(7)).unwrap();
        job.fail(2000, "boom").unwrap();

        job.reset();
        assert_eq!(job.state, JobState::Queued);
        assert!(job.pid.is_none());
        assert!(job.last_error.is_none());
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn test_hypothesis_suffix_and_parse() {
        assert_eq!(Hypothesis::AllGases.suffix("CH4"), "all");
        assert_eq!(Hypothesis::GasRemoved.suffix("CH4"), "noCH4");
        for h in Hypothesis::BOTH {
            assert_eq!(Hypothesis::parse(&h.to_string()), Some(h));
        }
        assert_eq!(JobState::parse("DONE"), Some(JobState::Done));
        assert_eq!(JobState::parse("???"), None);
    }
}
