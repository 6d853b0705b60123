//! Database initialization and migration logic for the storefront.
//!
//! Provides `init_db_pool` for creating a connection pool and `run_migrations`
//! for applying the SQL files in the migrations directory, in name order.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use app_config::AppConfig;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio::fs;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::info;

/// Creates the PostgreSQL connection pool.
///
/// # Errors
/// Returns an error if the DSN is invalid or the pool cannot be built.
pub fn init_db_pool(cfg: &AppConfig) -> Result<Pool> {
    let pg_config: PgConfig = cfg
        .database_dsn()
        .parse()
        .context("Failed to parse Postgres DSN")?;

    let mgr = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    Pool::builder(mgr)
        .max_size(cfg.db_pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .context("Failed to create database pool")
}

/// Takes one pooled connection and applies every migration with it.
pub async fn migrate(pool: &Pool, migrations_dir: &str) -> Result<usize> {
    let client = pool
        .get()
        .await
        .context("Failed to get DB connection for migrations")?;
    run_migrations(&client, migrations_dir).await
}

/// `.sql` files in `dir`, sorted by file name.
pub async fn migration_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read migrations directory {}", dir.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Applies all SQL migrations from the given directory to the provided database client.
///
/// Migration files must be idempotent (`CREATE ... IF NOT EXISTS`); they are
/// re-run on every start. Returns how many files were applied.
///
/// # Errors
/// Returns an error if migration files cannot be read or applied.
pub async fn run_migrations(client: &Client, migrations_dir: &str) -> Result<usize> {
    let files = migration_files(migrations_dir).await?;
    for path in &files {
        let file_name = path.display().to_string();
        info!("Applying migration: {}", file_name);
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read migration file {file_name}"))?;

        client
            .batch_execute(&content)
            .await
            .with_context(|| format!("Failed to execute migration {file_name}"))?;
    }
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migration_files_are_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["002_reviews.sql", "001_init.sql", "README.md"] {
            std::fs::write(dir.path().join(name), "SELECT 1;").unwrap();
        }

        let files = migration_files(dir.path()).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["001_init.sql", "002_reviews.sql"]);
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        assert!(migration_files("/definitely/not/here").await.is_err());
    }
}
