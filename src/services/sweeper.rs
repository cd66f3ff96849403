//! Background task that purges expired files on a fixed interval.

use super::file_service::FileService;
use std::time::Duration;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{error, info};

/// Spawn the sweep loop. The first sweep runs immediately; later ones wait
/// for the previous sweep to finish, so two never overlap.
pub fn spawn(service: FileService, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = every.as_secs(), "expiry sweeper started");
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(err) = service.cleanup_expired().await {
                error!(error = %err, "expiry sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        database::memory_pool,
        repository::{FileRepository, NewFile},
        services::{password::PasswordHasher, slug_service::SlugCharset},
        storage::{LocalStorage, StorageBackend},
    };
    use chrono::Utc;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_sweep_runs_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageBackend::Local(LocalStorage::new(dir.path()).await.unwrap());
        let repo = FileRepository::new(Arc::new(memory_pool().await));
        let record = repo
            .insert(NewFile {
                storage_key: "aa/bb/missing.txt".into(),
                stored_name: "missing.txt".into(),
                display_name: "missing.txt".into(),
                slug: "missing".into(),
                size_bytes: 0,
                content_type: "text/plain".into(),
                password_hash: None,
                expires_at: Some(Utc::now() - chrono::Duration::seconds(5)),
            })
            .await
            .unwrap();

        let service = FileService::new(
            repo.clone(),
            Arc::new(storage),
            SlugCharset::Strict,
            PasswordHasher::new(4),
        );
        let handle = spawn(service, Duration::from_secs(3600));

        let mut purged = false;
        for _ in 0..50 {
            if repo.find_by_id(record.id).await.unwrap().is_none() {
                purged = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();
        assert!(purged);
    }
}
