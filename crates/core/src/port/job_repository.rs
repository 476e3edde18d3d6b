// Job Repository Port (Interface)

use crate::domain::{JobId, JobState, RetrievalJob};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for retrieval job persistence
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job
    async fn insert(&self, job: &RetrievalJob) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &JobId) -> Result<Option<RetrievalJob>>;

    /// Update job
    async fn update(&self, job: &RetrievalJob) -> Result<()>;

    /// Jobs belonging to one grid point (both hypotheses)
    async fn find_by_point(&self, experiment: &str, file_stem: &str) -> Result<Vec<RetrievalJob>>;

    /// Jobs of an experiment in a given state, ordered by point index
    async fn find_by_state(&self, experiment: &str, state: JobState) -> Result<Vec<RetrievalJob>>;

    /// Every job of an experiment, ordered by point index then hypothesis
    async fn find_by_experiment(&self, experiment: &str) -> Result<Vec<RetrievalJob>>;

    /// Count jobs by state
    async fn count_by_state(&self, experiment: &str, state: JobState) -> Result<i64>;

    /// Names of every experiment with recorded jobs
    async fn list_experiments(&self) -> Result<Vec<String>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::Mutex;

    /// In-memory repository keeping insertion order
    #[derive(Default)]
    pub struct InMemoryJobRepository {
        jobs: Mutex<Vec<RetrievalJob>>,
    }

    impl InMemoryJobRepository {
        pub fn new() -> Self {
            Self::default()
        }

        /// Snapshot of every stored job
        pub fn all(&self) -> Vec<RetrievalJob> {
            self.jobs.lock().unwrap().clone()
        }

        fn select(&self, filter: impl Fn(&RetrievalJob) -> bool) -> Vec<RetrievalJob> {
            let mut jobs: Vec<RetrievalJob> = self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .filter(|job| filter(job))
                .cloned()
                .collect();
            jobs.sort_by_key(|job| (job.point_index, job.hypothesis.to_string()));
            jobs
        }
    }

    #[async_trait]
    impl JobRepository for InMemoryJobRepository {
        async fn insert(&self, job: &RetrievalJob) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let duplicate = jobs.iter().any(|j| {
                j.id == job.id
                    || (j.experiment == job.experiment
                        && j.file_stem == job.file_stem
                        && j.hypothesis == job.hypothesis)
            });
            if duplicate {
                return Err(AppError::Database(format!("duplicate job {}", job.id)));
            }
            jobs.push(job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<RetrievalJob>> {
            Ok(self.jobs.lock().unwrap().iter().find(|j| &j.id == id).cloned())
        }

        async fn update(&self, job: &RetrievalJob) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.iter_mut().find(|j| j.id == job.id) {
                Some(slot) => {
                    *slot = job.clone();
                    Ok(())
                }
                None => Err(AppError::NotFound(job.id.clone())),
            }
        }

        async fn find_by_point(&self, experiment: &str, file_stem: &str) -> Result<Vec<RetrievalJob>> {
            Ok(self.select(|j| j.experiment == experiment && j.file_stem == file_stem))
        }

        async fn find_by_state(&self, experiment: &str, state: JobState) -> Result<Vec<RetrievalJob>> {
            Ok(self.select(|j| j.experiment == experiment && j.state == state))
        }

        async fn find_by_experiment(&self, experiment: &str) -> Result<Vec<RetrievalJob>> {
            Ok(self.select(|j| j.experiment == experiment))
        }

        async fn count_by_state(&self, experiment: &str, state: JobState) -> Result<i64> {
            Ok(self.select(|j| j.experiment == experiment && j.state == state).len() as i64)
        }

        async fn list_experiments(&self) -> Result<Vec<String>> {
            let mut names: Vec<String> = self
                .jobs
                .lock()
                .unwrap()
                .iter()
                .map(|j| j.experiment.clone())
                .collect();
            names.sort();
            names.dedup();
            Ok(names)
        }
    }
}
