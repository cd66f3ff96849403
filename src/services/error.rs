use crate::{
    repository::{RecordStoreError, UniqueField},
    storage::StorageError,
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("file not found")]
    NotFound,
    #[error("file has expired")]
    Expired,
    #[error("password required")]
    PasswordRequired,
    #[error("invalid password")]
    PasswordInvalid,
    #[error("slug `{slug}` invalid: {reason}")]
    InvalidSlug { slug: String, reason: &'static str },
    #[error("{0} is already taken")]
    AlreadyTaken(UniqueField),
    #[error("no free {what} found after {attempts} attempts")]
    GenerationExhausted { what: &'static str, attempts: usize },
    #[error("payload `{key}` for file {id} is missing from storage")]
    Inconsistency { id: Uuid, key: String },
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<RecordStoreError> for FileError {
    fn from(err: RecordStoreError) -> Self {
        match err {
            RecordStoreError::Conflict(field) => FileError::AlreadyTaken(field),
            RecordStoreError::Sqlx(err) => FileError::Database(err),
        }
    }
}

pub type FileResult<T> = Result<T, FileError>;
