//! Public link tokens: validation, derivation from filenames, and
//! collision handling.
//!
//! Two character sets are supported, picked once per deployment:
//!
//! - `strict`: `a-z`, `0-9` and `-`. Derived slugs drop the file extension.
//! - `permissive`: any Unicode letter or digit plus `.`, `_` and `-`. Derived
//!   slugs keep the extension and collision suffixes go in front of it.
//!   Since such a slug can look exactly like a filename, uniqueness is also
//!   checked against display names.

use super::error::{FileError, FileResult};
use crate::repository::{FileRepository, UniqueField};
use rand::{RngCore, rngs::OsRng};
use std::{fmt, str::FromStr};
use uuid::Uuid;

pub const MAX_SLUG_LEN: usize = 100;
pub const MAX_GENERATION_ATTEMPTS: usize = 100;

/// Longest extension (without the dot) carried into derived slugs and
/// stored names. Longer ones are dropped.
pub const MAX_EXTENSION_LEN: usize = 16;

/// Strict-mode derived slugs shorter than this fall back to a random token.
const STRICT_MIN_DERIVED_LEN: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SlugCharset {
    #[default]
    Strict,
    Permissive,
}

impl SlugCharset {
    fn allows(self, c: char) -> bool {
        match self {
            SlugCharset::Strict => matches!(c, 'a'..='z' | '0'..='9' | '-'),
            SlugCharset::Permissive => c.is_alphanumeric() || matches!(c, '.' | '_' | '-'),
        }
    }

    fn keeps_extension(self) -> bool {
        self == SlugCharset::Permissive
    }

    fn reason(self) -> &'static str {
        match self {
            SlugCharset::Strict => "use 1-100 lowercase letters, digits and hyphens",
            SlugCharset::Permissive => "use 1-100 letters, digits, dots, underscores and hyphens",
        }
    }

    /// Check a caller-supplied slug.
    pub fn validate(self, candidate: &str) -> FileResult<()> {
        let invalid = || FileError::InvalidSlug {
            slug: candidate.to_string(),
            reason: self.reason(),
        };
        let len = candidate.chars().count();
        if len == 0 || len > MAX_SLUG_LEN {
            return Err(invalid());
        }
        if !candidate.chars().all(|c| self.allows(c)) {
            return Err(invalid());
        }
        if candidate.chars().all(|c| c == '.') {
            return Err(invalid());
        }
        Ok(())
    }

    /// Turn a filename into a slug base: lower-case, spaces and underscores
    /// become hyphens, disallowed characters are dropped, hyphen runs are
    /// collapsed and trimmed. Falls back to `file-<hex>` when little or
    /// nothing survives.
    pub fn normalize(self, filename: &str) -> String {
        let (stem, ext) = split_extension(filename);
        let mut stem = self.clean(stem);
        let ext = if self.keeps_extension() {
            let cleaned = self.clean(ext.trim_start_matches('.'));
            let cleaned = cleaned.trim_matches('.');
            if cleaned.is_empty() || cleaned.chars().count() > MAX_EXTENSION_LEN {
                String::new()
            } else {
                format!(".{cleaned}")
            }
        } else {
            String::new()
        };

        // Leave room for a `-xxxx` collision suffix.
        let budget = MAX_SLUG_LEN
            .saturating_sub(5)
            .saturating_sub(ext.chars().count());
        if stem.chars().count() > budget {
            stem = stem.chars().take(budget).collect();
            stem = stem.trim_end_matches('-').to_string();
        }

        let min_len = match self {
            SlugCharset::Strict => STRICT_MIN_DERIVED_LEN,
            SlugCharset::Permissive => 1,
        };
        if stem.chars().count() < min_len || stem.chars().all(|c| c == '.') {
            stem = format!("file-{}", random_hex(4));
        }

        let slug = format!("{stem}{ext}");
        debug_assert!(self.validate(&slug).is_ok(), "derived slug `{slug}` is invalid");
        slug
    }

    fn clean(self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        for c in raw.to_lowercase().chars() {
            let c = if c == ' ' || c == '_' { '-' } else { c };
            if !self.allows(c) {
                continue;
            }
            if c == '-' && out.ends_with('-') {
                continue;
            }
            out.push(c);
        }
        out.trim_matches('-').to_string()
    }
}

impl FromStr for SlugCharset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(SlugCharset::Strict),
            "permissive" => Ok(SlugCharset::Permissive),
            other => Err(format!(
                "unknown slug charset `{other}` (expected `strict` or `permissive`)"
            )),
        }
    }
}

impl fmt::Display for SlugCharset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SlugCharset::Strict => "strict",
            SlugCharset::Permissive => "permissive",
        })
    }
}

/// Split `name` into stem and extension (with its dot). A leading dot is
/// part of the stem, so `.env` has no extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Extension of `name` (with its dot) when it is short enough to keep,
/// otherwise the empty string.
pub fn short_extension(name: &str) -> &str {
    let (_, ext) = split_extension(name);
    if ext.chars().count() > MAX_EXTENSION_LEN + 1 {
        ""
    } else {
        ext
    }
}

/// `n` random bytes, hex encoded.
pub fn random_hex(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Insert `-<suffix>` before the extension of `name` (or append it when
/// there is none).
fn with_suffix(name: &str, suffix: &str) -> String {
    let (stem, ext) = split_extension(name);
    format!("{stem}-{suffix}{ext}")
}

#[derive(Clone)]
pub struct SlugService {
    repo: FileRepository,
    charset: SlugCharset,
}

impl SlugService {
    pub fn new(repo: FileRepository, charset: SlugCharset) -> Self {
        Self { repo, charset }
    }

    pub fn validate(&self, candidate: &str) -> FileResult<()> {
        self.charset.validate(candidate)
    }

    async fn is_taken(&self, candidate: &str, exclude: Option<Uuid>) -> FileResult<bool> {
        let also_display_name = self.charset == SlugCharset::Permissive;
        Ok(self
            .repo
            .slug_taken(candidate, also_display_name, exclude)
            .await?)
    }

    /// Fail with `AlreadyTaken` when another live record holds `candidate`.
    ///
    /// This is an early check only; the unique index still has the last
    /// word when two writers race.
    pub async fn check_unique(&self, candidate: &str, exclude: Option<Uuid>) -> FileResult<()> {
        if self.is_taken(candidate, exclude).await? {
            return Err(FileError::AlreadyTaken(UniqueField::Slug));
        }
        Ok(())
    }

    /// Derive a free slug from an uploaded filename, adding random suffixes
    /// on collision.
    pub async fn derive_from_name(&self, filename: &str) -> FileResult<String> {
        let base = self.charset.normalize(filename);
        let mut candidate = base.clone();
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            if !self.is_taken(&candidate, None).await? {
                return Ok(candidate);
            }
            candidate = if self.charset.keeps_extension() {
                with_suffix(&base, &random_hex(2))
            } else {
                format!("{base}-{}", random_hex(2))
            };
        }
        Err(FileError::GenerationExhausted {
            what: "slug",
            attempts: MAX_GENERATION_ATTEMPTS,
        })
    }

    /// Slug for a new upload: the caller's, if given and free, otherwise a
    /// derived one.
    pub async fn resolve(&self, custom: Option<&str>, filename: &str) -> FileResult<String> {
        match custom {
            Some(slug) => {
                self.validate(slug)?;
                self.check_unique(slug, None).await?;
                Ok(slug.to_string())
            }
            None => self.derive_from_name(filename).await,
        }
    }

    /// Make `filename` unique among live display names by inserting a
    /// random suffix before its extension.
    pub async fn unique_display_name(&self, filename: &str) -> FileResult<String> {
        let mut candidate = filename.to_string();
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            if !self.repo.display_name_taken(&candidate).await? {
                return Ok(candidate);
            }
            candidate = with_suffix(filename, &random_hex(2));
        }
        Err(FileError::GenerationExhausted {
            what: "display name",
            attempts: MAX_GENERATION_ATTEMPTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{database::memory_pool, repository::NewFile};
    use std::sync::Arc;

    async fn service(charset: SlugCharset) -> SlugService {
        let repo = FileRepository::new(Arc::new(memory_pool().await));
        SlugService::new(repo, charset)
    }

    async fn occupy(service: &SlugService, slug: &str, display: &str) {
        service
            .repo
            .insert(NewFile {
                storage_key: format!("k/{}", Uuid::new_v4()),
                stored_name: Uuid::new_v4().simple().to_string(),
                display_name: display.to_string(),
                slug: slug.to_string(),
                size_bytes: 1,
                content_type: "text/plain".into(),
                password_hash: None,
                expires_at: None,
            })
            .await
            .unwrap();
    }

    fn is_hex_suffix(s: &str) -> bool {
        s.len() == 4 && s.chars().all(|c| c.is_ascii_hexdigit())
    }

    #[test]
    fn strict_validation() {
        let strict = SlugCharset::Strict;
        assert!(strict.validate("report-2024").is_ok());
        assert!(strict.validate("a").is_ok());
        assert!(strict.validate(&"x".repeat(100)).is_ok());

        for bad in ["My_File", "report@2024", "", "Report", "with space", "dot.ted"] {
            assert!(
                matches!(strict.validate(bad), Err(FileError::InvalidSlug { .. })),
                "{bad:?} should be rejected"
            );
        }
        assert!(strict.validate(&"x".repeat(101)).is_err());
    }

    #[test]
    fn permissive_validation() {
        let permissive = SlugCharset::Permissive;
        assert!(permissive.validate("My_File").is_ok());
        assert!(permissive.validate("résumé.pdf").is_ok());
        assert!(permissive.validate("報告-2024").is_ok());

        for bad in ["report@2024", "", "a/b", "..", ".", "with space"] {
            assert!(permissive.validate(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(permissive.validate(&"é".repeat(100)).is_ok());
        assert!(permissive.validate(&"é".repeat(101)).is_err());
    }

    #[test]
    fn strict_normalization() {
        let strict = SlugCharset::Strict;
        assert_eq!(strict.normalize("My Vacation Photos.png"), "my-vacation-photos");
        assert_eq!(strict.normalize("Q4__Report -- FINAL.pdf"), "q4-report-final");
        assert_eq!(strict.normalize("--weird--name--"), "weird-name");
        assert_eq!(strict.normalize("archive.tar.gz"), "archivetar");
    }

    #[test]
    fn strict_falls_back_for_short_or_empty_names() {
        for name in ["日本.txt", "ab.txt", "@@@", "_.md"] {
            let slug = SlugCharset::Strict.normalize(name);
            let suffix = slug.strip_prefix("file-").expect("fallback prefix");
            assert_eq!(suffix.len(), 8, "{name:?} -> {slug:?}");
            assert!(SlugCharset::Strict.validate(&slug).is_ok());
        }
    }

    #[test]
    fn permissive_normalization_keeps_extension() {
        let permissive = SlugCharset::Permissive;
        assert_eq!(
            permissive.normalize("My Vacation Photos.PNG"),
            "my-vacation-photos.png"
        );
        assert_eq!(permissive.normalize("Café Menü.pdf"), "café-menü.pdf");
        assert!(permissive.normalize("@@@.png").starts_with("file-"));
        assert!(permissive.normalize("@@@.png").ends_with(".png"));
    }

    #[test]
    fn long_names_leave_room_for_a_suffix() {
        let long = format!("{}.txt", "a".repeat(300));
        assert_eq!(SlugCharset::Strict.normalize(&long).len(), MAX_SLUG_LEN - 5);
        let permissive = SlugCharset::Permissive.normalize(&long);
        assert_eq!(permissive.chars().count(), MAX_SLUG_LEN - 5);
        assert!(permissive.ends_with(".txt"));
    }

    #[test]
    fn oversized_extensions_are_dropped() {
        let name = format!("a.{}", "b".repeat(200));
        for charset in [SlugCharset::Strict, SlugCharset::Permissive] {
            let slug = charset.normalize(&name);
            assert!(charset.validate(&slug).is_ok(), "{charset}: {slug}");
            assert!(slug.chars().count() <= MAX_SLUG_LEN - 5);
        }

        let permissive = SlugCharset::Permissive;
        assert_eq!(permissive.normalize("report.markdown"), "report.markdown");
        assert!(!permissive.normalize(&name).contains('.'));
        assert_eq!(
            permissive.normalize(&format!("{}.txt", "x".repeat(300))),
            format!("{}.txt", "x".repeat(MAX_SLUG_LEN - 5 - 4))
        );
    }

    #[test]
    fn dotted_stems_never_truncate_to_dots() {
        let name = format!("{}a.{}", ".".repeat(150), "b".repeat(20));
        let slug = SlugCharset::Permissive.normalize(&name);
        assert!(SlugCharset::Permissive.validate(&slug).is_ok(), "{slug}");
    }

    #[test]
    fn short_extensions_only() {
        assert_eq!(short_extension("doc.pdf"), ".pdf");
        assert_eq!(short_extension("README"), "");
        assert_eq!(short_extension(&format!("a.{}", "b".repeat(16))).len(), 17);
        assert_eq!(short_extension(&format!("a.{}", "b".repeat(17))), "");
    }

    #[test]
    fn splits_extensions() {
        assert_eq!(split_extension("doc.pdf"), ("doc", ".pdf"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension(".env"), (".env", ""));
        assert_eq!(split_extension("README"), ("README", ""));
        assert_eq!(with_suffix("doc.pdf", "ab12"), "doc-ab12.pdf");
        assert_eq!(with_suffix("README", "ab12"), "README-ab12");
    }

    #[tokio::test]
    async fn derives_slug_when_free() {
        let slugs = service(SlugCharset::Strict).await;
        let slug = slugs.derive_from_name("My Vacation Photos.png").await.unwrap();
        assert_eq!(slug, "my-vacation-photos");
    }

    #[tokio::test]
    async fn derived_slug_gets_suffix_on_collision() {
        let slugs = service(SlugCharset::Strict).await;
        occupy(&slugs, "my-vacation-photos", "a.png").await;

        let slug = slugs.derive_from_name("My Vacation Photos.png").await.unwrap();
        let suffix = slug.strip_prefix("my-vacation-photos-").unwrap();
        assert!(is_hex_suffix(suffix), "{slug}");
    }

    #[tokio::test]
    async fn permissive_suffix_goes_before_extension() {
        let slugs = service(SlugCharset::Permissive).await;
        occupy(&slugs, "other", "my-photos.png").await;

        let slug = slugs.derive_from_name("My Photos.png").await.unwrap();
        let middle = slug
            .strip_prefix("my-photos-")
            .and_then(|rest| rest.strip_suffix(".png"))
            .unwrap();
        assert!(is_hex_suffix(middle), "{slug}");
    }

    #[tokio::test]
    async fn custom_slug_is_validated_then_checked() {
        let slugs = service(SlugCharset::Strict).await;
        occupy(&slugs, "demo", "demo.txt").await;

        assert!(matches!(
            slugs.resolve(Some("Bad Slug"), "x.txt").await,
            Err(FileError::InvalidSlug { .. })
        ));
        assert!(matches!(
            slugs.resolve(Some("demo"), "x.txt").await,
            Err(FileError::AlreadyTaken(_))
        ));
        assert_eq!(slugs.resolve(Some("q4-report"), "x.txt").await.unwrap(), "q4-report");
        assert_eq!(slugs.resolve(None, "Notes.txt").await.unwrap(), "notes");
    }

    #[tokio::test]
    async fn display_names_are_deduplicated() {
        let slugs = service(SlugCharset::Strict).await;
        assert_eq!(slugs.unique_display_name("doc.pdf").await.unwrap(), "doc.pdf");

        occupy(&slugs, "doc", "doc.pdf").await;
        let renamed = slugs.unique_display_name("doc.pdf").await.unwrap();
        let middle = renamed
            .strip_prefix("doc-")
            .and_then(|rest| rest.strip_suffix(".pdf"))
            .unwrap();
        assert!(is_hex_suffix(middle), "{renamed}");
    }

    #[test]
    fn parses_charset() {
        assert_eq!("strict".parse::<SlugCharset>().unwrap(), SlugCharset::Strict);
        assert_eq!(" Permissive ".parse::<SlugCharset>().unwrap(), SlugCharset::Permissive);
        assert!("loose".parse::<SlugCharset>().is_err());
    }
}
