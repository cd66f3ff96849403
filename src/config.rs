use crate::{
    services::SlugCharset,
    storage::{S3Config, StorageConfig},
};
use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DATA_DIR: &str = "./data/files";
const DEFAULT_DATABASE_URL: &str = "sqlite://./data/meta/file_drop.db";
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_BCRYPT_COST: u32 = 12;
const DEFAULT_CLEANUP_SECS: u64 = 3600;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables (optionally from `.env`) and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub storage: StorageConfig,
    pub slug_charset: SlugCharset,
    pub bcrypt_cost: u32,
    pub cleanup_interval: Duration,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Self-hosted file drop with short share links")]
pub struct Args {
    /// Host to bind to (overrides FILE_DROP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_DROP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides FILE_DROP_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Storage backend, `local` or `s3` (overrides FILE_DROP_STORAGE)
    #[arg(long)]
    pub storage: Option<String>,

    /// Root directory for the local backend (overrides FILE_DROP_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<String>,

    /// S3-compatible endpoint URL (overrides FILE_DROP_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Bucket name (overrides FILE_DROP_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Bucket region (overrides FILE_DROP_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Access key id (overrides FILE_DROP_S3_ACCESS_KEY_ID)
    #[arg(long)]
    pub s3_access_key_id: Option<String>,

    /// Secret access key (overrides FILE_DROP_S3_SECRET_ACCESS_KEY)
    #[arg(long)]
    pub s3_secret_access_key: Option<String>,

    /// Use path-style bucket URLs (overrides FILE_DROP_S3_PATH_STYLE)
    #[arg(long)]
    pub s3_path_style: bool,

    /// Slug character set, `strict` or `permissive` (overrides FILE_DROP_SLUG_CHARSET)
    #[arg(long)]
    pub slug_charset: Option<String>,

    /// Bcrypt work factor (overrides FILE_DROP_BCRYPT_COST)
    #[arg(long)]
    pub bcrypt_cost: Option<u32>,

    /// Seconds between expiry sweeps (overrides FILE_DROP_CLEANUP_INTERVAL_SECS)
    #[arg(long)]
    pub cleanup_interval_secs: Option<u64>,

    /// Largest accepted upload in bytes (overrides FILE_DROP_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse `.env`, environment variables and CLI args into AppConfig and
    /// the migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        dotenvy::dotenv().ok();
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::merge(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    fn merge(args: Args, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = args
            .host
            .or_else(|| var("FILE_DROP_HOST"))
            .unwrap_or_else(|| DEFAULT_HOST.into());
        let port = pick(args.port, &var, "FILE_DROP_PORT", DEFAULT_PORT)?;
        let database_url = args
            .database_url
            .or_else(|| var("FILE_DROP_DATABASE_URL"))
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.into());

        let slug_charset = match args.slug_charset {
            Some(raw) => raw.parse::<SlugCharset>().map_err(|e| anyhow!(e))?,
            None => pick(None, &var, "FILE_DROP_SLUG_CHARSET", SlugCharset::default())?,
        };

        let bcrypt_cost = pick(
            args.bcrypt_cost,
            &var,
            "FILE_DROP_BCRYPT_COST",
            DEFAULT_BCRYPT_COST,
        )?;
        if !(4..=31).contains(&bcrypt_cost) {
            bail!("bcrypt cost must be between 4 and 31, got {bcrypt_cost}");
        }

        let cleanup_secs = pick(
            args.cleanup_interval_secs,
            &var,
            "FILE_DROP_CLEANUP_INTERVAL_SECS",
            DEFAULT_CLEANUP_SECS,
        )?;
        if cleanup_secs == 0 {
            bail!("cleanup interval must be at least one second");
        }

        let max_upload_bytes = pick(
            args.max_upload_bytes,
            &var,
            "FILE_DROP_MAX_UPLOAD_BYTES",
            DEFAULT_MAX_UPLOAD_BYTES,
        )?;

        let backend = args
            .storage
            .or_else(|| var("FILE_DROP_STORAGE"))
            .unwrap_or_else(|| "local".into());
        let storage = match backend.trim().to_ascii_lowercase().as_str() {
            "local" => StorageConfig::Local {
                root: PathBuf::from(
                    args.data_dir
                        .or_else(|| var("FILE_DROP_DATA_DIR"))
                        .unwrap_or_else(|| DEFAULT_DATA_DIR.into()),
                ),
            },
            "s3" => {
                let bucket = args
                    .s3_bucket
                    .or_else(|| var("FILE_DROP_S3_BUCKET"))
                    .context("FILE_DROP_S3_BUCKET is required for the s3 backend")?;
                let access_key_id = args
                    .s3_access_key_id
                    .or_else(|| var("FILE_DROP_S3_ACCESS_KEY_ID"))
                    .context("FILE_DROP_S3_ACCESS_KEY_ID is required for the s3 backend")?;
                let secret_access_key = args
                    .s3_secret_access_key
                    .or_else(|| var("FILE_DROP_S3_SECRET_ACCESS_KEY"))
                    .context("FILE_DROP_S3_SECRET_ACCESS_KEY is required for the s3 backend")?;
                let use_path_style = args.s3_path_style
                    || var("FILE_DROP_S3_PATH_STYLE").is_some_and(|v| is_truthy(&v));

                StorageConfig::ObjectStore(S3Config {
                    endpoint: args
                        .s3_endpoint
                        .or_else(|| var("FILE_DROP_S3_ENDPOINT"))
                        .map(|e| e.trim().to_string())
                        .unwrap_or_default(),
                    bucket,
                    region: args
                        .s3_region
                        .or_else(|| var("FILE_DROP_S3_REGION"))
                        .unwrap_or_else(|| DEFAULT_REGION.into()),
                    access_key_id,
                    secret_access_key,
                    use_path_style,
                })
            }
            other => bail!("unknown storage backend `{other}` (expected `local` or `s3`)"),
        };

        Ok(Self {
            host,
            port,
            database_url,
            storage,
            slug_charset,
            bcrypt_cost,
            cleanup_interval: Duration::from_secs(cleanup_secs),
            max_upload_bytes,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// CLI value if present, else the parsed environment value, else `default`.
fn pick<T>(cli: Option<T>, var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("parsing {key} value `{raw}`: {e}")),
        None => Ok(default),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn merge(args: Args, vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::merge(args, |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_local_storage() {
        let cfg = merge(Args::default(), &[]).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.slug_charset, SlugCharset::Strict);
        assert_eq!(cfg.bcrypt_cost, 12);
        assert_eq!(cfg.cleanup_interval, Duration::from_secs(3600));
        assert!(matches!(
            cfg.storage,
            StorageConfig::Local { ref root } if root == &PathBuf::from(DEFAULT_DATA_DIR)
        ));
    }

    #[test]
    fn cli_overrides_environment() {
        let args = Args::try_parse_from(["file-drop", "--port", "9000", "--slug-charset", "permissive"])
            .unwrap();
        let cfg = merge(
            args,
            &[("FILE_DROP_PORT", "8000"), ("FILE_DROP_HOST", "127.0.0.1")],
        )
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.slug_charset, SlugCharset::Permissive);
    }

    #[test]
    fn s3_requires_bucket_and_credentials() {
        let err = merge(Args::default(), &[("FILE_DROP_STORAGE", "s3")]).unwrap_err();
        assert!(err.to_string().contains("FILE_DROP_S3_BUCKET"));

        let err = merge(
            Args::default(),
            &[
                ("FILE_DROP_STORAGE", "s3"),
                ("FILE_DROP_S3_BUCKET", "drops"),
                ("FILE_DROP_S3_ACCESS_KEY_ID", "key"),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("SECRET_ACCESS_KEY"));
    }

    #[test]
    fn builds_object_store_config() {
        let cfg = merge(
            Args::default(),
            &[
                ("FILE_DROP_STORAGE", "S3"),
                ("FILE_DROP_S3_BUCKET", "drops"),
                ("FILE_DROP_S3_ACCESS_KEY_ID", "key"),
                ("FILE_DROP_S3_SECRET_ACCESS_KEY", "secret"),
                ("FILE_DROP_S3_ENDPOINT", "http://localhost:9000"),
                ("FILE_DROP_S3_PATH_STYLE", "true"),
            ],
        )
        .unwrap();

        let StorageConfig::ObjectStore(s3) = cfg.storage else {
            panic!("expected object store config");
        };
        assert_eq!(s3.bucket, "drops");
        assert_eq!(s3.region, "us-east-1");
        assert_eq!(s3.endpoint, "http://localhost:9000");
        assert!(s3.use_path_style);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(merge(Args::default(), &[("FILE_DROP_PORT", "http")]).is_err());
        assert!(merge(Args::default(), &[("FILE_DROP_STORAGE", "ftp")]).is_err());
        assert!(merge(Args::default(), &[("FILE_DROP_BCRYPT_COST", "2")]).is_err());
        assert!(merge(Args::default(), &[("FILE_DROP_CLEANUP_INTERVAL_SECS", "0")]).is_err());
        assert!(merge(Args::default(), &[("FILE_DROP_SLUG_CHARSET", "loose")]).is_err());
    }
}
