//! Byte-blob persistence behind a single enum.
//!
//! The backend is chosen once from [`StorageConfig`] at startup and injected
//! into the file service; nothing branches on the backend per request.

pub mod local;
pub mod s3;

use bytes::Bytes;
use futures::Stream;
use std::{io, path::PathBuf, pin::Pin};
use thiserror::Error;
use tokio::io::AsyncRead;

pub use local::LocalStorage;
pub use s3::{S3Config, S3Storage};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid storage key `{0}`")]
    InvalidKey(String),
    #[error("object store error: {0}")]
    ObjectStore(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Reader handed back by [`StorageBackend::get`]. The caller owns it and
/// drops it when done streaming.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Result of a completed save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedBlob {
    pub storage_key: String,
    pub size_bytes: i64,
}

/// Deployment-time backend selection.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local { root: PathBuf },
    ObjectStore(S3Config),
}

#[derive(Clone)]
pub enum StorageBackend {
    Local(LocalStorage),
    ObjectStore(S3Storage),
}

impl StorageBackend {
    pub async fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        match config {
            StorageConfig::Local { root } => Ok(Self::Local(LocalStorage::new(root).await?)),
            StorageConfig::ObjectStore(cfg) => Ok(Self::ObjectStore(S3Storage::new(cfg)?)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::ObjectStore(_) => "s3",
        }
    }

    /// Key a payload saved under `name` will be addressed by.
    pub fn key_for(&self, name: &str) -> String {
        match self {
            Self::Local(local) => local.key_for(name),
            Self::ObjectStore(_) => name.to_string(),
        }
    }

    /// Write the whole stream under `name`. On error nothing is left behind
    /// that a record could point at.
    pub async fn save<S, E>(
        &self,
        stream: S,
        name: &str,
        size_hint: Option<u64>,
    ) -> StorageResult<SavedBlob>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Into<io::Error>,
    {
        match self {
            Self::Local(local) => local.save(stream, name).await,
            Self::ObjectStore(s3) => s3.save(stream, name, size_hint).await,
        }
    }

    pub async fn get(&self, key: &str) -> StorageResult<BlobReader> {
        match self {
            Self::Local(local) => local.get(key).await,
            Self::ObjectStore(s3) => s3.get(key).await,
        }
    }

    /// Remove an object. Deleting a missing object succeeds.
    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        match self {
            Self::Local(local) => local.delete(key).await,
            Self::ObjectStore(s3) => s3.delete(key).await,
        }
    }

    /// Existence check. The object store reports `false` on any transport
    /// or permission failure.
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self {
            Self::Local(local) => local.exists(key).await,
            Self::ObjectStore(s3) => Ok(s3.exists(key).await),
        }
    }
}
