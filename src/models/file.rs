//! Represents a shared file and the public view of it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A stored file and its access rules.
///
/// The row only describes the payload; the bytes live in the configured
/// storage backend under `storage_key`.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Internal UUID assigned when the row is created.
    pub id: Uuid,

    /// Backend locator for the payload (relative path or object key).
    #[serde(skip_serializing)]
    pub storage_key: String,

    /// Generated unique name the payload was saved under.
    pub stored_name: String,

    /// Name shown to recipients, derived from the uploaded filename.
    pub display_name: String,

    /// Public short-link token.
    pub slug: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Content type (MIME type).
    pub content_type: String,

    /// Bcrypt hash; `None` means the link is not password protected.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,

    /// After this instant the file is no longer served.
    pub expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Tombstone for soft-deleted rows.
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// Whether the record is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn has_password(&self) -> bool {
        self.password_hash
            .as_deref()
            .is_some_and(|hash| !hash.is_empty())
    }
}

/// JSON shape returned by the admin API.
#[derive(Serialize, Debug)]
pub struct FileResponse {
    pub id: Uuid,
    pub stored_name: String,
    pub display_name: String,
    pub slug: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub has_password: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<FileRecord> for FileResponse {
    fn from(record: FileRecord) -> Self {
        let has_password = record.has_password();
        Self {
            id: record.id,
            stored_name: record.stored_name,
            display_name: record.display_name,
            slug: record.slug,
            size_bytes: record.size_bytes,
            content_type: record.content_type,
            has_password,
            expires_at: record.expires_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(expires_at: Option<DateTime<Utc>>, password_hash: Option<&str>) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: Uuid::new_v4(),
            storage_key: "ab/cd/0123.pdf".into(),
            stored_name: "0123.pdf".into(),
            display_name: "doc.pdf".into(),
            slug: "doc".into(),
            size_bytes: 3,
            content_type: "application/pdf".into(),
            password_hash: password_hash.map(str::to_string),
            expires_at,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn expiry_boundary() {
        let now = Utc::now();
        assert!(record(Some(now - Duration::seconds(1)), None).is_expired_at(now));
        assert!(!record(Some(now + Duration::hours(1)), None).is_expired_at(now));
        assert!(!record(Some(now), None).is_expired_at(now));
        assert!(!record(None, None).is_expired_at(now));
    }

    #[test]
    fn empty_hash_is_not_a_password() {
        assert!(!record(None, None).has_password());
        assert!(!record(None, Some("")).has_password());
        assert!(record(None, Some("$2b$04$abc")).has_password());
    }

    #[test]
    fn response_hides_secrets() {
        let json = serde_json::to_value(FileResponse::from(record(None, Some("$2b$04$abc"))))
            .unwrap();
        assert_eq!(json["has_password"], true);
        assert!(json.get("password_hash").is_none());
        assert!(json.get("storage_key").is_none());

        let raw = serde_json::to_value(record(None, Some("$2b$04$abc"))).unwrap();
        assert!(raw.get("password_hash").is_none());
        assert!(raw.get("deleted_at").is_none());
    }
}
