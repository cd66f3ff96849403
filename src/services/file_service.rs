//! File lifecycle: upload, lookup, update, delete, access resolution and the
//! expiry sweep.
//!
//! Payload bytes are always written before the record that points at them,
//! and removed before the record is tombstoned. A crash between the two
//! steps can leave an orphaned blob but never a record without one.

use super::{
    error::{FileError, FileResult},
    password::PasswordHasher,
    slug_service::{MAX_GENERATION_ATTEMPTS, SlugCharset, SlugService, short_extension},
};
use crate::{
    models::file::FileRecord,
    repository::{FileChanges, FileRepository, NewFile, RecordStoreError, UniqueField},
    storage::{BlobReader, StorageBackend, StorageError},
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use std::{io, sync::Arc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Everything an upload carries besides the bytes themselves.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub filename: String,
    pub content_type: Option<String>,
    pub expires_at: Option<chrono::DateTime<Utc>>,
    pub password: Option<String>,
    pub slug: Option<String>,
    pub size_hint: Option<u64>,
}

/// Partial update. Fields left as `None` are not touched.
///
/// `password: Some("")` is the one place an empty string means something:
/// it removes password protection.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub expires_at: Option<chrono::DateTime<Utc>>,
    pub password: Option<String>,
    pub slug: Option<String>,
}

/// How a caller identifies a file.
#[derive(Debug, Clone, Copy)]
pub enum Lookup<'a> {
    Id(Uuid),
    Slug(&'a str),
    DisplayName(&'a str),
}

/// A record that passed the access checks, with its payload opened.
pub struct ResolvedFile {
    pub record: FileRecord,
    pub reader: BlobReader,
}

/// Outcome of one expiry sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub purged: usize,
    pub blob_failures: usize,
    pub record_failures: usize,
}

#[derive(Clone)]
pub struct FileService {
    repo: FileRepository,
    storage: Arc<StorageBackend>,
    slugs: SlugService,
    hasher: PasswordHasher,
}

impl FileService {
    pub fn new(
        repo: FileRepository,
        storage: Arc<StorageBackend>,
        charset: SlugCharset,
        hasher: PasswordHasher,
    ) -> Self {
        let slugs = SlugService::new(repo.clone(), charset);
        Self {
            repo,
            storage,
            slugs,
            hasher,
        }
    }

    pub fn storage(&self) -> &StorageBackend {
        &self.storage
    }

    /// Store `body` and create its record.
    ///
    /// Slug and display name are settled before any bytes are written, so
    /// format and uniqueness errors leave nothing behind. The unique indexes
    /// still decide races between concurrent uploads: generated identifiers
    /// are re-derived and the insert retried, while a lost custom slug
    /// removes the blob and reports `AlreadyTaken`.
    pub async fn upload<S, E>(&self, request: UploadRequest, body: S) -> FileResult<FileRecord>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Into<io::Error>,
    {
        let filename = sanitize_filename(&request.filename);
        let slug = self
            .slugs
            .resolve(request.slug.as_deref(), &filename)
            .await?;
        let display_name = self.slugs.unique_display_name(&filename).await?;
        let password_hash = match request.password.filter(|p| !p.is_empty()) {
            Some(password) => Some(self.hasher.hash(password).await?),
            None => None,
        };
        let stored_name = self.generate_stored_name(&filename).await?;

        let saved = self
            .storage
            .save(body, &stored_name, request.size_hint)
            .await?;

        let new_file = NewFile {
            storage_key: saved.storage_key.clone(),
            stored_name,
            display_name,
            slug,
            size_bytes: saved.size_bytes,
            content_type: request
                .content_type
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            password_hash,
            expires_at: request.expires_at,
        };

        let custom_slug = request.slug.is_some();
        match self.insert_with_retry(new_file, &filename, custom_slug).await {
            Ok(record) => {
                info!(
                    id = %record.id,
                    slug = %record.slug,
                    size = record.size_bytes,
                    "file uploaded"
                );
                Ok(record)
            }
            Err(FileError::AlreadyTaken(UniqueField::StoredName)) => {
                // The key now belongs to another live record; its blob stays.
                error!(key = %saved.storage_key, "stored name claimed by a concurrent upload");
                Err(FileError::GenerationExhausted {
                    what: "stored name",
                    attempts: 1,
                })
            }
            Err(err) => {
                if let Err(cleanup) = self.storage.delete(&saved.storage_key).await {
                    warn!(
                        key = %saved.storage_key,
                        error = %cleanup,
                        "failed to remove blob after rejected upload"
                    );
                }
                Err(err)
            }
        }
    }

    /// Insert `new_file`, re-deriving a generated slug or display name each
    /// time a concurrent insert claims it first. A conflict on a custom slug
    /// or on the stored name is returned as is.
    async fn insert_with_retry(
        &self,
        mut new_file: NewFile,
        filename: &str,
        custom_slug: bool,
    ) -> FileResult<FileRecord> {
        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            match self.repo.insert(new_file.clone()).await {
                Ok(record) => return Ok(record),
                Err(RecordStoreError::Conflict(UniqueField::Slug)) if !custom_slug => {
                    debug!(attempt, slug = %new_file.slug, "generated slug lost a race");
                    new_file.slug = self.slugs.derive_from_name(filename).await?;
                }
                Err(RecordStoreError::Conflict(UniqueField::DisplayName)) => {
                    debug!(attempt, name = %new_file.display_name, "display name lost a race");
                    new_file.display_name = self.slugs.unique_display_name(filename).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(FileError::GenerationExhausted {
            what: "record identifiers",
            attempts: MAX_GENERATION_ATTEMPTS,
        })
    }

    /// `<uuid hex><ext>`, free in both the record store and the backend.
    async fn generate_stored_name(&self, filename: &str) -> FileResult<String> {
        let ext: String = short_extension(filename)
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '.')
            .collect::<String>()
            .to_ascii_lowercase();
        let ext = if ext.len() > 1 { ext } else { String::new() };

        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let candidate = format!("{}{ext}", Uuid::new_v4().simple());
            if self.repo.stored_name_taken(&candidate).await? {
                continue;
            }
            if self.storage.exists(&self.storage.key_for(&candidate)).await? {
                continue;
            }
            return Ok(candidate);
        }
        Err(FileError::GenerationExhausted {
            what: "stored name",
            attempts: MAX_GENERATION_ATTEMPTS,
        })
    }

    pub async fn get(&self, id: Uuid) -> FileResult<FileRecord> {
        self.lookup(Lookup::Id(id)).await
    }

    pub async fn get_by_slug(&self, slug: &str) -> FileResult<FileRecord> {
        self.lookup(Lookup::Slug(slug)).await
    }

    pub async fn get_by_display_name(&self, name: &str) -> FileResult<FileRecord> {
        self.lookup(Lookup::DisplayName(name)).await
    }

    /// Find a live record, reporting `Expired` rather than `NotFound` for
    /// records whose expiry has passed but that are not purged yet.
    pub async fn lookup(&self, lookup: Lookup<'_>) -> FileResult<FileRecord> {
        let record = match lookup {
            Lookup::Id(id) => self.repo.find_by_id(id).await?,
            Lookup::Slug(slug) => self.repo.find_by_slug(slug).await?,
            Lookup::DisplayName(name) => self.repo.find_by_display_name(name).await?,
        }
        .ok_or(FileError::NotFound)?;

        if record.is_expired() {
            return Err(FileError::Expired);
        }
        Ok(record)
    }

    /// Live, unexpired records, newest first.
    pub async fn list(&self) -> FileResult<Vec<FileRecord>> {
        Ok(self.repo.list_active(Utc::now()).await?)
    }

    pub async fn update(&self, id: Uuid, request: UpdateRequest) -> FileResult<FileRecord> {
        let current = self.get(id).await?;
        let mut changes = FileChanges {
            expires_at: request.expires_at,
            ..FileChanges::default()
        };

        if let Some(password) = request.password {
            changes.password_hash = if password.is_empty() {
                Some(None)
            } else {
                Some(Some(self.hasher.hash(password).await?))
            };
        }

        if let Some(slug) = request.slug {
            self.slugs.validate(&slug)?;
            if slug != current.slug {
                self.slugs.check_unique(&slug, Some(id)).await?;
                changes.slug = Some(slug);
            }
        }

        if changes.is_empty() {
            return Ok(current);
        }

        let updated = self
            .repo
            .update_fields(id, changes)
            .await?
            .ok_or(FileError::NotFound)?;
        info!(id = %id, slug = %updated.slug, "file updated");
        Ok(updated)
    }

    /// Remove the payload, then tombstone the record. Works on expired
    /// records that the sweep has not reached yet.
    pub async fn delete(&self, id: Uuid) -> FileResult<()> {
        let record = self.repo.find_by_id(id).await?.ok_or(FileError::NotFound)?;
        self.storage.delete(&record.storage_key).await?;
        if !self.repo.soft_delete(id).await? {
            return Err(FileError::NotFound);
        }
        info!(id = %id, slug = %record.slug, "file deleted");
        Ok(())
    }

    /// Apply the password gate and open the payload.
    ///
    /// A missing payload behind a record that still exists is reported as an
    /// inconsistency. If the record vanished meanwhile, a concurrent delete
    /// won the race and the caller just sees `NotFound`.
    pub async fn resolve(
        &self,
        lookup: Lookup<'_>,
        password: Option<&str>,
    ) -> FileResult<ResolvedFile> {
        let record = self.lookup(lookup).await?;

        if let Some(hash) = record.password_hash.as_deref().filter(|h| !h.is_empty()) {
            let supplied = password
                .filter(|p| !p.is_empty())
                .ok_or(FileError::PasswordRequired)?;
            if !self
                .hasher
                .verify(supplied.to_string(), hash.to_string())
                .await?
            {
                return Err(FileError::PasswordInvalid);
            }
        }

        self.open_payload(record).await
    }

    /// Open the payload of a record that already passed the access checks.
    async fn open_payload(&self, record: FileRecord) -> FileResult<ResolvedFile> {
        match self.storage.get(&record.storage_key).await {
            Ok(reader) => Ok(ResolvedFile { record, reader }),
            Err(StorageError::NotFound(_)) => {
                if self.repo.find_by_id(record.id).await?.is_none() {
                    return Err(FileError::NotFound);
                }
                error!(
                    id = %record.id,
                    key = %record.storage_key,
                    "record has no payload in storage"
                );
                Err(FileError::Inconsistency {
                    id: record.id,
                    key: record.storage_key,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Purge every record whose expiry is at or before now. Each record is
    /// handled on its own; failures are logged and counted, never returned.
    pub async fn cleanup_expired(&self) -> FileResult<SweepReport> {
        let expired = self.repo.find_expired(Utc::now()).await?;
        let mut report = SweepReport {
            scanned: expired.len(),
            ..SweepReport::default()
        };

        for record in &expired {
            self.purge_one(record, &mut report).await;
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                purged = report.purged,
                blob_failures = report.blob_failures,
                record_failures = report.record_failures,
                "expiry sweep finished"
            );
        }
        Ok(report)
    }

    /// Remove one expired record's payload, then tombstone the record.
    async fn purge_one(&self, record: &FileRecord, report: &mut SweepReport) {
        if let Err(err) = self.storage.delete(&record.storage_key).await {
            report.blob_failures += 1;
            warn!(
                id = %record.id,
                key = %record.storage_key,
                error = %err,
                "failed to delete expired blob"
            );
        }
        match self.repo.soft_delete(record.id).await {
            Ok(true) => report.purged += 1,
            Ok(false) => debug!(id = %record.id, "expired record already deleted"),
            Err(err) => {
                report.record_failures += 1;
                warn!(id = %record.id, error = %err, "failed to delete expired record");
            }
        }
    }

    pub async fn check_database(&self) -> FileResult<()> {
        Ok(self.repo.ping().await?)
    }

    /// Write, check and remove a tiny blob on the active backend.
    pub async fn check_storage(&self) -> FileResult<()> {
        let name = format!("readyz-{}", Uuid::new_v4().simple());
        let body = futures::stream::once(async { Ok::<_, io::Error>(Bytes::from_static(b"ok")) });
        let saved = self.storage.save(body, &name, Some(2)).await?;
        let present = self.storage.exists(&saved.storage_key).await?;
        self.storage.delete(&saved.storage_key).await?;
        if !present {
            return Err(StorageError::NotFound(saved.storage_key).into());
        }
        Ok(())
    }
}

/// Keep only the last path component of a client-supplied filename and
/// drop control characters.
fn sanitize_filename(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}
