//! Local-filesystem backend.
//!
//! Payloads are sharded beneath `root/{shard}/{shard}/{name}` where the shards
//! are the first two bytes of MD5(name). Storage keys are the relative path,
//! so the root directory can move without rewriting records.

use super::{BlobReader, SavedBlob, StorageError, StorageResult};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_KEY_LEN: usize = 1024;

#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Open the backend, creating `root` if needed.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!("local storage rooted at {}", root.display());
        Ok(Self { root })
    }

    fn shards(name: &str) -> (String, String) {
        let digest = md5::compute(name);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    pub fn key_for(&self, name: &str) -> String {
        let (shard_a, shard_b) = Self::shards(name);
        format!("{shard_a}/{shard_b}/{name}")
    }

    /// Resolve a storage key to a path under the root.
    ///
    /// Rejects empty or oversized keys, absolute paths, parent components,
    /// backslashes and control bytes.
    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        let invalid = || StorageError::InvalidKey(key.to_string());
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(invalid());
        }
        if key.starts_with('/')
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(invalid());
        }

        let mut path = self.root.clone();
        for component in Path::new(key).components() {
            match component {
                Component::Normal(part) => path.push(part),
                _ => return Err(invalid()),
            }
        }
        Ok(path)
    }

    /// Stream a payload into a temp file next to its final location, fsync,
    /// then rename into place.
    pub async fn save<S, E>(&self, stream: S, name: &str) -> StorageResult<SavedBlob>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Into<io::Error>,
    {
        if name.contains('/') {
            return Err(StorageError::InvalidKey(name.to_string()));
        }
        let key = self.key_for(name);
        let file_path = self.resolve(&key)?;
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StorageError::InvalidKey(key.clone()))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err.into()));
                }
            };
            size_bytes += chunk.len() as i64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        debug!("stored {} bytes at {}", size_bytes, file_path.display());
        Ok(SavedBlob {
            storage_key: key,
            size_bytes,
        })
    }

    pub async fn get(&self, key: &str) -> StorageResult<BlobReader> {
        let path = self.resolve(key)?;
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok(Box::pin(file))
    }

    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("{} already missing", path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.resolve(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Walk upwards removing empty shard directories, stopping at the root
    /// or at the first directory that is not empty.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}
