//! Embedded schema migrations.

use sqlx::SqlitePool;

use crate::domain::errors::{CoreError, CoreResult};

struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "initial schema",
    sql: include_str!("../../../migrations/001_initial_schema.sql"),
}];

/// Apply all pending migrations. Returns the number applied.
pub async fn run_migrations(pool: &SqlitePool) -> CoreResult<usize> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now')),
            description TEXT
        )",
    )
    .execute(pool)
    .await?;

    let current: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
        .fetch_one(pool)
        .await?;

    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current.0) {
        sqlx::raw_sql(migration.sql).execute(pool).await.map_err(|e| {
            CoreError::Database(format!("migration {} failed: {e}", migration.version))
        })?;
        sqlx::query("INSERT OR IGNORE INTO schema_migrations (version, description) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.description)
            .execute(pool)
            .await?;
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "applied migration"
        );
        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;

    #[tokio::test]
    async fn migrations_apply_once() {
        let pool = create_test_pool().await.unwrap();
        assert_eq!(run_migrations(&pool).await.unwrap(), MIGRATIONS.len());
        assert_eq!(run_migrations(&pool).await.unwrap(), 0);
    }
}
