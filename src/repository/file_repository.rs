//! SQLite-backed record store for [`FileRecord`] rows.
//!
//! Every query filters out soft-deleted rows. The partial unique indexes on
//! `slug`, `stored_name` and `display_name` are the final word on
//! uniqueness; the `*_taken` checks only let callers fail early.

use crate::models::file::FileRecord;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{fmt, sync::Arc};
use thiserror::Error;
use uuid::Uuid;

const FILE_COLUMNS: &str = "id, storage_key, stored_name, display_name, slug, size_bytes, \
     content_type, password_hash, expires_at, created_at, updated_at, deleted_at";

/// Column guarded by a uniqueness rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Slug,
    StoredName,
    DisplayName,
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UniqueField::Slug => "slug",
            UniqueField::StoredName => "stored_name",
            UniqueField::DisplayName => "display_name",
        })
    }
}

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("{0} is already taken")]
    Conflict(UniqueField),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RecordStoreResult<T> = Result<T, RecordStoreError>;

/// Values for a new row; id and timestamps are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub storage_key: String,
    pub stored_name: String,
    pub display_name: String,
    pub slug: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub password_hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Partial update. `None` leaves a column untouched; for the password,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct FileChanges {
    pub expires_at: Option<DateTime<Utc>>,
    pub password_hash: Option<Option<String>>,
    pub slug: Option<String>,
}

impl FileChanges {
    pub fn is_empty(&self) -> bool {
        self.expires_at.is_none() && self.password_hash.is_none() && self.slug.is_none()
    }
}

#[derive(Clone)]
pub struct FileRepository {
    pub db: Arc<SqlitePool>,
}

impl FileRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn insert(&self, new: NewFile) -> RecordStoreResult<FileRecord> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO files (
                id, storage_key, stored_name, display_name, slug, size_bytes,
                content_type, password_hash, expires_at, created_at, updated_at, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
            RETURNING {FILE_COLUMNS}"
        );
        sqlx::query_as::<_, FileRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.storage_key)
            .bind(&new.stored_name)
            .bind(&new.display_name)
            .bind(&new.slug)
            .bind(new.size_bytes)
            .bind(&new.content_type)
            .bind(&new.password_hash)
            .bind(new.expires_at)
            .bind(now)
            .bind(now)
            .fetch_one(&*self.db)
            .await
            .map_err(map_conflict)
    }

    pub async fn find_by_id(&self, id: Uuid) -> RecordStoreResult<Option<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ? AND deleted_at IS NULL");
        let record = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(record)
    }

    pub async fn find_by_slug(&self, slug: &str) -> RecordStoreResult<Option<FileRecord>> {
        self.find_by_column("slug", slug).await
    }

    pub async fn find_by_display_name(&self, name: &str) -> RecordStoreResult<Option<FileRecord>> {
        self.find_by_column("display_name", name).await
    }

    async fn find_by_column(
        &self,
        column: &str,
        value: &str,
    ) -> RecordStoreResult<Option<FileRecord>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE {column} = ? AND deleted_at IS NULL"
        );
        let record = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(value)
            .fetch_optional(&*self.db)
            .await?;
        Ok(record)
    }

    /// Rows that are not deleted and not expired at `now`, newest first.
    pub async fn list_active(&self, now: DateTime<Utc>) -> RecordStoreResult<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE deleted_at IS NULL AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(now)
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }

    /// Rows whose expiry is at or before `now` and that are not purged yet.
    pub async fn find_expired(&self, now: DateTime<Utc>) -> RecordStoreResult<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE deleted_at IS NULL AND expires_at IS NOT NULL AND expires_at <= ?
             ORDER BY expires_at ASC"
        );
        let rows = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(now)
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }

    /// Whether `candidate` is used as a slug (and optionally as a display
    /// name) by any live row other than `exclude`.
    pub async fn slug_taken(
        &self,
        candidate: &str,
        also_display_name: bool,
        exclude: Option<Uuid>,
    ) -> RecordStoreResult<bool> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM files WHERE deleted_at IS NULL AND (slug = ");
        builder.push_bind(candidate);
        if also_display_name {
            builder.push(" OR display_name = ");
            builder.push_bind(candidate);
        }
        builder.push(")");
        if let Some(id) = exclude {
            builder.push(" AND id != ");
            builder.push_bind(id);
        }

        let count: i64 = builder.build_query_scalar().fetch_one(&*self.db).await?;
        Ok(count > 0)
    }

    pub async fn display_name_taken(&self, name: &str) -> RecordStoreResult<bool> {
        self.count_live("display_name", name).await.map(|n| n > 0)
    }

    pub async fn stored_name_taken(&self, name: &str) -> RecordStoreResult<bool> {
        self.count_live("stored_name", name).await.map(|n| n > 0)
    }

    async fn count_live(&self, column: &str, value: &str) -> RecordStoreResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM files WHERE {column} = ? AND deleted_at IS NULL");
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(value)
            .fetch_one(&*self.db)
            .await?;
        Ok(count)
    }

    /// Apply `changes` to a live row. Returns `None` when no live row has
    /// that id.
    pub async fn update_fields(
        &self,
        id: Uuid,
        changes: FileChanges,
    ) -> RecordStoreResult<Option<FileRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE files SET updated_at = ");
        builder.push_bind(Utc::now());
        if let Some(expires_at) = changes.expires_at {
            builder.push(", expires_at = ");
            builder.push_bind(expires_at);
        }
        if let Some(password_hash) = changes.password_hash {
            builder.push(", password_hash = ");
            builder.push_bind(password_hash);
        }
        if let Some(slug) = changes.slug {
            builder.push(", slug = ");
            builder.push_bind(slug);
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id);
        builder.push(" AND deleted_at IS NULL RETURNING ");
        builder.push(FILE_COLUMNS);

        builder
            .build_query_as::<FileRecord>()
            .fetch_optional(&*self.db)
            .await
            .map_err(map_conflict)
    }

    /// Tombstone a live row. Returns false when nothing was live under `id`.
    pub async fn soft_delete(&self, id: Uuid) -> RecordStoreResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE files SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn ping(&self) -> RecordStoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

/// Turn a unique-index violation into a typed conflict naming the column.
fn map_conflict(err: sqlx::Error) -> RecordStoreError {
    let field = match &err {
        sqlx::Error::Database(db_err)
            if db_err.message().to_ascii_lowercase().contains("unique") =>
        {
            let message = db_err.message();
            if message.contains("files.slug") {
                Some(UniqueField::Slug)
            } else if message.contains("files.stored_name") {
                Some(UniqueField::StoredName)
            } else if message.contains("files.display_name") {
                Some(UniqueField::DisplayName)
            } else {
                None
            }
        }
        _ => None,
    };
    match field {
        Some(field) => RecordStoreError::Conflict(field),
        None => RecordStoreError::Sqlx(err),
    }
}
