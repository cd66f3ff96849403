//! Persistence for file records.

pub mod file_repository;

pub use file_repository::{FileChanges, FileRepository, NewFile, RecordStoreError, UniqueField};
