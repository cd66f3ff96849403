//! S3-compatible object-store backend (AWS, MinIO, R2, ...).
//!
//! Object keys are the stored name itself. Payloads are buffered in memory
//! for both PUT and GET; uploads are already bounded by the request body
//! limit.

use super::{BlobReader, SavedBlob, StorageError, StorageResult};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use s3::{Bucket, Region, creds::Credentials, error::S3Error};
use std::io::{self, Cursor};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct S3Config {
    /// Custom endpoint URL; empty means the standard AWS endpoint for `region`.
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub use_path_style: bool,
}

#[derive(Clone)]
pub struct S3Storage {
    bucket: Box<Bucket>,
}

/// Only an HTTP 404 from the store counts; transport and auth failures stay errors.
fn is_not_found(err: &S3Error) -> bool {
    matches!(err, S3Error::HttpFailWithBody(404, _))
}

impl S3Storage {
    pub fn new(config: &S3Config) -> StorageResult<Self> {
        let credentials = Credentials::new(
            Some(&config.access_key_id),
            Some(&config.secret_access_key),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::ObjectStore(format!("invalid credentials: {e}")))?;

        let region = if config.endpoint.is_empty() {
            config
                .region
                .parse::<Region>()
                .map_err(|e| StorageError::ObjectStore(format!("invalid region: {e}")))?
        } else {
            Region::Custom {
                region: config.region.clone(),
                endpoint: config.endpoint.clone(),
            }
        };

        let mut bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| StorageError::ObjectStore(format!("invalid bucket: {e}")))?;
        if config.use_path_style {
            bucket.set_path_style();
        }

        debug!(
            "object store ready: bucket={}, region={}, endpoint={}",
            config.bucket, config.region, config.endpoint
        );
        Ok(Self { bucket })
    }

    pub async fn save<S, E>(
        &self,
        stream: S,
        key: &str,
        size_hint: Option<u64>,
    ) -> StorageResult<SavedBlob>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Into<io::Error>,
    {
        let capacity = size_hint
            .and_then(|hint| usize::try_from(hint).ok())
            .unwrap_or_default();
        let mut body = Vec::with_capacity(capacity);
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.map_err(|e| StorageError::Io(e.into()))?);
        }

        let response = self
            .bucket
            .put_object(key, &body)
            .await
            .map_err(|e| StorageError::ObjectStore(format!("upload of `{key}` failed: {e}")))?;
        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(StorageError::ObjectStore(format!(
                "upload of `{key}` returned status {status}"
            )));
        }

        debug!("uploaded {} bytes to {}", body.len(), key);
        Ok(SavedBlob {
            storage_key: key.to_string(),
            size_bytes: body.len() as i64,
        })
    }

    pub async fn get(&self, key: &str) -> StorageResult<BlobReader> {
        let response = match self.bucket.get_object(key).await {
            Ok(response) => response,
            Err(err) if is_not_found(&err) => return Err(StorageError::NotFound(key.to_string())),
            Err(err) => {
                return Err(StorageError::ObjectStore(format!(
                    "download of `{key}` failed: {err}"
                )));
            }
        };
        match response.status_code() {
            200..=299 => Ok(Box::pin(Cursor::new(response.to_vec()))),
            404 => Err(StorageError::NotFound(key.to_string())),
            status => Err(StorageError::ObjectStore(format!(
                "download of `{key}` returned status {status}"
            ))),
        }
    }

    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        match self.bucket.delete_object(key).await {
            Ok(response) => match response.status_code() {
                200..=299 | 404 => Ok(()),
                status => Err(StorageError::ObjectStore(format!(
                    "delete of `{key}` returned status {status}"
                ))),
            },
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(StorageError::ObjectStore(format!(
                "delete of `{key}` failed: {err}"
            ))),
        }
    }

    /// HEAD request. Any failure, including auth or network errors, reads as
    /// "absent".
    pub async fn exists(&self, key: &str) -> bool {
        match self.bucket.head_object(key).await {
            Ok((_, status)) => (200..300).contains(&status),
            Err(err) => {
                if !is_not_found(&err) {
                    warn!("exists check for `{}` failed: {}", key, err);
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3Config {
        S3Config {
            endpoint: "http://127.0.0.1:9".into(),
            bucket: "drops".into(),
            region: "us-east-1".into(),
            access_key_id: "minio".into(),
            secret_access_key: "minio-secret".into(),
            use_path_style: true,
        }
    }

    #[test]
    fn builds_against_custom_endpoint() {
        assert!(S3Storage::new(&config()).is_ok());
    }

    #[test]
    fn builds_against_named_region() {
        let cfg = S3Config {
            endpoint: String::new(),
            region: "eu-west-1".into(),
            ..config()
        };
        assert!(S3Storage::new(&cfg).is_ok());
    }

    #[test]
    fn recognises_missing_objects() {
        assert!(is_not_found(&S3Error::HttpFailWithBody(404, "NoSuchKey".into())));
        assert!(!is_not_found(&S3Error::HttpFailWithBody(403, "AccessDenied".into())));
    }

    #[test]
    fn error_text_mentioning_404_is_not_a_miss() {
        let transport = S3Error::HttpFailWithBody(
            503,
            "error sending request for url (http://minio:9000/drops/a1404b.pdf)".into(),
        );
        assert!(!is_not_found(&transport));
        let throttled = S3Error::HttpFailWithBody(500, "<Code>NoSuchKey</Code> retry".into());
        assert!(!is_not_found(&throttled));
    }
}
