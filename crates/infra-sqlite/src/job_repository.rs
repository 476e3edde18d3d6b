// SQLite JobRepository Implementation

use async_trait::async_trait;
use retrieval_core::domain::{Hypothesis, JobId, JobState, RetrievalJob};
use retrieval_core::error::{AppError, Result};
use retrieval_core::port::JobRepository;
use sqlx::SqlitePool;

const ORDERING: &str = "ORDER BY point_index ASC, hypothesis ASC";

// Helper to convert sqlx::Error to AppError with structured information
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => AppError::Database(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "5" => AppError::Database(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        _ => AppError::Database(err.to_string()),
    }
}

/// Job ledger stored in the `retrieval_jobs` table
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_jobs(&self, sql: &str, binds: &[&str]) -> Result<Vec<RetrievalJob>> {
        let mut query = sqlx::query_as::<_, JobRow>(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(map_sqlx_error)?;
        rows.into_iter().map(JobRow::into_job).collect()
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &RetrievalJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO retrieval_jobs (
                id, experiment, point_index, file_stem, hypothesis,
                tested_gas, distance_au, state, created_at, started_at, finished_at,
                data_path, output_path, log_path,
                pid, exit_code, last_error,
                attempts, max_attempts, backoff_factor, retry_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.experiment)
        .bind(job.point_index)
        .bind(&job.file_stem)
        .bind(job.hypothesis.to_string())
        .bind(&job.tested_gas)
        .bind(job.distance_au)
        .bind(job.state.to_string())
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(&job.data_path)
        .bind(&job.output_path)
        .bind(&job.log_path)
        .bind(job.pid)
        .bind(job.exit_code)
        .bind(&job.last_error)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.backoff_factor)
        .bind(job.retry_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<RetrievalJob>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM retrieval_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn update(&self, job: &RetrievalJob) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE retrieval_jobs
            SET point_index = ?, tested_gas = ?, distance_au = ?,
                state = ?, started_at = ?, finished_at = ?,
                data_path = ?, output_path = ?, log_path = ?,
                pid = ?, exit_code = ?, last_error = ?,
                attempts = ?, max_attempts = ?, backoff_factor = ?, retry_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.point_index)
        .bind(&job.tested_gas)
        .bind(job.distance_au)
        .bind(job.state.to_string())
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(&job.data_path)
        .bind(&job.output_path)
        .bind(&job.log_path)
        .bind(job.pid)
        .bind(job.exit_code)
        .bind(&job.last_error)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.backoff_factor)
        .bind(job.retry_at)
        .bind(&job.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Job {} not found", job.id)));
        }
        Ok(())
    }

    async fn find_by_point(&self, experiment: &str, file_stem: &str) -> Result<Vec<RetrievalJob>> {
        let sql = format!(
            "SELECT * FROM retrieval_jobs WHERE experiment = ? AND file_stem = ? {}",
            ORDERING
        );
        self.fetch_jobs(&sql, &[experiment, file_stem]).await
    }

    async fn find_by_state(&self, experiment: &str, state: JobState) -> Result<Vec<RetrievalJob>> {
        let sql = format!(
            "SELECT * FROM retrieval_jobs WHERE experiment = ? AND state = ? {}",
            ORDERING
        );
        let state = state.to_string();
        self.fetch_jobs(&sql, &[experiment, &state]).await
    }

    async fn find_by_experiment(&self, experiment: &str) -> Result<Vec<RetrievalJob>> {
        let sql = format!("SELECT * FROM retrieval_jobs WHERE experiment = ? {}", ORDERING);
        self.fetch_jobs(&sql, &[experiment]).await
    }

    async fn count_by_state(&self, experiment: &str, state: JobState) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM retrieval_jobs WHERE experiment = ? AND state = ?",
        )
        .bind(experiment)
        .bind(state.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(count)
    }

    async fn list_experiments(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT DISTINCT experiment FROM retrieval_jobs ORDER BY experiment")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    experiment: String,
    point_index: i64,
    file_stem: String,
    hypothesis: String,
    tested_gas: String,
    distance_au: f64,
    state: String,
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    data_path: String,
    output_path: String,
    log_path: Option<String>,
    pid: Option<i64>,
    exit_code: Option<i32>,
    last_error: Option<String>,
    attempts: i32,
    max_attempts: i32,
    backoff_factor: f64,
    retry_at: Option<i64>,
}

impl JobRow {
    fn into_job(self) -> Result<RetrievalJob> {
        let state = JobState::parse(&self.state).ok_or_else(|| {
            AppError::Database(format!("job {} has unknown state {}", self.id, self.state))
        })?;
        let hypothesis = Hypothesis::parse(&self.hypothesis).ok_or_else(|| {
            AppError::Database(format!(
                "job {} has unknown hypothesis {}",
                self.id, self.hypothesis
            ))
        })?;

        Ok(RetrievalJob {
            id: self.id,
            experiment: self.experiment,
            point_index: self.point_index,
            file_stem: self.file_stem,
            hypothesis,
            tested_gas: self.tested_gas,
            distance_au: self.distance_au,
            state,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            data_path: self.data_path,
            output_path: self.output_path,
            log_path: self.log_path,
            pid: self.pid,
            exit_code: self.exit_code,
            last_error: self.last_error,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            backoff_factor: self.backoff_factor,
            retry_at: self.retry_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use tempfile::TempDir;

    async fn setup_repo() -> (TempDir, SqliteJobRepository) {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("ledger.db");
        let pool = create_pool(db.to_str().unwrap()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        (dir, SqliteJobRepository::new(pool))
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let (_dir, repo) = setup_repo().await;
        let mut job = RetrievalJob::new_test("exp", Hypothesis::GasRemoved);
        job.log_path = Some("/tmp/exp/logs/x.log".to_string());
        repo.insert(&job).await.unwrap();

        let found = repo.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(found.id, job.id);
        assert_eq!(found.hypothesis, Hypothesis::GasRemoved);
        assert_eq!(found.state, JobState::Queued);
        assert_eq!(found.output_path, job.output_path);
        assert_eq!(found.log_path, job.log_path);
        assert!(repo.find_by_id(&"missing".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_persists_lifecycle() {
        let (_dir, repo) = setup_repo().await;
        let mut job = RetrievalJob::new_test("exp", Hypothesis::AllGases);
        repo.insert(&job).await.unwrap();

        job.start(2000, Some(4242)).unwrap();
        repo.update(&job).await.unwrap();
        job.fail(3000, "exit code 2").unwrap();
        job.exit_code = Some(2);
        repo.update(&job).await.unwrap();

        let stored = repo.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.pid, Some(4242));
        assert_eq!(stored.exit_code, Some(2));
        assert_eq!(stored.last_error.as_deref(), Some("exit code 2"));
        assert_eq!(stored.finished_at, Some(3000));
    }

    #[tokio::test]
    async fn test_update_missing_job_is_not_found() {
        let (_dir, repo) = setup_repo().await;
        let job = RetrievalJob::new_test("exp", Hypothesis::AllGases);
        assert!(matches!(
            repo.update(&job).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_point_hypothesis_rejected() {
        let (_dir, repo) = setup_repo().await;
        let job = RetrievalJob::new_test("exp", Hypothesis::AllGases);
        repo.insert(&job).await.unwrap();

        let mut twin = job.clone();
        twin.id = "another-id".to_string();
        let err = repo.insert(&twin).await.unwrap_err();
        assert!(err.to_string().contains("Unique constraint"));
    }

    #[tokio::test]
    async fn test_queries_scoped_and_ordered() {
        let (_dir, repo) = setup_repo().await;

        let mut removed = RetrievalJob::new("b", 1, "exp", 1, "stem1", Hypothesis::GasRemoved);
        removed.state = JobState::Done;
        let all = RetrievalJob::new("a", 1, "exp", 1, "stem1", Hypothesis::AllGases);
        let first = RetrievalJob::new("c", 1, "exp", 0, "stem0", Hypothesis::AllGases);
        let other = RetrievalJob::new("d", 1, "other", 0, "stem0", Hypothesis::AllGases);
        for job in [&removed, &all, &first, &other] {
            repo.insert(job).await.unwrap();
        }

        let ids: Vec<String> = repo
            .find_by_experiment("exp")
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);

        let point = repo.find_by_point("exp", "stem1").await.unwrap();
        assert_eq!(point.len(), 2);
        assert_eq!(point[0].hypothesis, Hypothesis::AllGases);

        let queued = repo.find_by_state("exp", JobState::Queued).await.unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(repo.count_by_state("exp", JobState::Done).await.unwrap(), 1);
        assert_eq!(repo.count_by_state("other", JobState::Done).await.unwrap(), 0);

        assert_eq!(repo.list_experiments().await.unwrap(), vec!["exp", "other"]);
    }

    #[tokio::test]
    async fn test_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("ledger.db");
        let job = RetrievalJob::new_test("exp", Hypothesis::AllGases);
        {
            let pool = create_pool(db.to_str().unwrap()).await.unwrap();
            run_migrations(&pool).await.unwrap();
            SqliteJobRepository::new(pool.clone()).insert(&job).await.unwrap();
            pool.close().await;
        }

        let pool = create_pool(db.to_str().unwrap()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repo = SqliteJobRepository::new(pool);
        assert!(repo.find_by_id(&job.id).await.unwrap().is_some());
    }
}
