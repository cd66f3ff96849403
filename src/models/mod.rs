//! Data models for stored files.
//!
//! Rows map to structs via `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod file;
