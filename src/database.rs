//! SQLite pool setup and schema migration.

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr, time::Duration};

const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Open the metadata database, creating the file and its directory if
/// they do not exist yet.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    let db_path = db_path.split('?').next().unwrap_or(db_path);
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if !db_path.is_empty() && !db_path.starts_with(":memory:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {:?}", parent))?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database url `{}`", database_url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", database_url))?;
    Ok(pool)
}

/// Apply the bundled schema. Every statement is idempotent, so this runs on
/// each start as well as from `--migrate`.
pub async fn run_migrations(db: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}

/// Single-connection in-memory database with the schema applied. Each
/// connection to `sqlite::memory:` is its own database, hence the cap.
#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    run_migrations(&pool).await.expect("apply schema");
    pool
}
