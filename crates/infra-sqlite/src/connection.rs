// SQLite Connection Pool Setup

use retrieval_core::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Create a SQLite connection pool with WAL mode
///
/// Accepts either a `sqlite:` URL or a plain file path. The parent directory
/// of a file database is created when missing.
///
/// # Errors
///
/// Returns `AppError::Database` when the URL is malformed or the file cannot
/// be opened.
pub async fn create_pool(database: &str) -> Result<SqlitePool> {
    let url = if database.starts_with("sqlite:") {
        database.to_string()
    } else {
        if let Some(parent) = Path::new(database).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        format!("sqlite://{}", database)
    };

    let options = SqliteConnectOptions::from_str(&url)
        .map_err(|e| AppError::Database(e.to_string()))?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    // The ledger is written by one orchestrator; a handful of readers is enough
    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_pool_in_memory() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_create_pool_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("state/ledger.db");
        let pool = create_pool(db.to_str().unwrap()).await.unwrap();
        assert!(pool.acquire().await.is_ok());
        assert!(db.exists());
    }
}
