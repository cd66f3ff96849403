use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod database;
mod errors;
mod handlers;
mod models;
mod repository;
mod routes;
mod services;
mod storage;

use repository::FileRepository;
use services::{FileService, PasswordHasher, sweeper};
use storage::{StorageBackend, StorageConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!(
        addr = %cfg.addr(),
        database = %cfg.database_url,
        slug_charset = %cfg.slug_charset,
        cleanup_secs = cfg.cleanup_interval.as_secs(),
        max_upload_bytes = cfg.max_upload_bytes,
        "starting file-drop"
    );

    // --- Initialize SQLite and schema ---
    let db = Arc::new(database::connect(&cfg.database_url).await?);
    database::run_migrations(&db)
        .await
        .context("running database migrations")?;

    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Storage backend, chosen once ---
    match &cfg.storage {
        StorageConfig::Local { root } => {
            tracing::info!("Using local storage at {}", root.display())
        }
        StorageConfig::ObjectStore(s3) => tracing::info!(
            "Using object storage bucket `{}` (region {})",
            s3.bucket,
            s3.region
        ),
    }
    let storage = StorageBackend::from_config(&cfg.storage)
        .await
        .context("initializing storage backend")?;

    // --- Core service + background sweep ---
    let service = FileService::new(
        FileRepository::new(db.clone()),
        Arc::new(storage),
        cfg.slug_charset,
        PasswordHasher::new(cfg.bcrypt_cost),
    );
    sweeper::spawn(service.clone(), cfg.cleanup_interval);

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes).with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
