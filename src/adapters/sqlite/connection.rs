//! SQLite connection pool management.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::errors::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(3),
        }
    }
}

/// Open a WAL-mode pool against `database_url`, creating the file and its
/// parent directory when missing.
///
/// In-memory databases are pinned to a single connection: every pooled
/// connection would otherwise see its own empty database.
pub async fn create_pool(database_url: &str, config: Option<PoolConfig>) -> CoreResult<SqlitePool> {
    let mut config = config.unwrap_or_default();
    ensure_database_directory(database_url)?;

    let in_memory = database_url.contains(":memory:");
    if in_memory {
        config.max_connections = 1;
        config.min_connections = 1;
    }

    let connect_options = SqliteConnectOptions::from_str(database_url)
        .map_err(|_| CoreError::Validation(format!("invalid database URL: {database_url}")))?
        .create_if_missing(true)
        .journal_mode(if in_memory {
            SqliteJournalMode::Memory
        } else {
            SqliteJournalMode::Wal
        })
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(connect_options)
        .await?;

    Ok(pool)
}

/// In-memory pool for tests. Single connection: every query sees the same
/// transient database.
pub async fn create_test_pool() -> CoreResult<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|_| CoreError::Validation("invalid in-memory URL".into()))?
        .foreign_keys(true)
        .shared_cache(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await?;

    Ok(pool)
}

/// In-memory pool with the full schema applied.
pub async fn create_migrated_test_pool() -> CoreResult<SqlitePool> {
    let pool = create_test_pool().await?;
    super::migrations::run_migrations(&pool).await?;
    Ok(pool)
}

fn ensure_database_directory(database_url: &str) -> CoreResult<()> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);

    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::Database(format!("create {}: {e}", parent.display())))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_answers_queries() {
        let pool = create_test_pool().await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(row.0, 1);
    }

    #[tokio::test]
    async fn migrated_pool_has_jobs_table() {
        let pool = create_migrated_test_pool().await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }
}
