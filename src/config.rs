use crate::services::{
    metadata_store::StoreBackend,
    naming::{DEFAULT_ALPHABET, DEFAULT_SHORT_ID_LEN},
};
use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use std::{collections::HashSet, env, path::PathBuf, str::FromStr, time::Duration};

pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 16 * 1024 * 1024;
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const DEFAULT_TTL_SECONDS: u64 = 300;
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

/// Settings the registry and sweeper need. Independent of the HTTP layer.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Directory holding uploaded payloads.
    pub upload_dir: PathBuf,
    /// Uploads larger than this are rejected before anything is written.
    pub max_upload_size: u64,
    /// Records per listing page.
    pub page_size: usize,
    /// Age after which an upload is evicted.
    pub ttl_seconds: u64,
    /// Cadence of the eviction sweeper.
    pub sweep_interval_seconds: u64,
    pub short_id_length: usize,
    pub short_id_alphabet: String,
}

impl RegistryConfig {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECONDS,
            short_id_length: DEFAULT_SHORT_ID_LEN,
            short_id_alphabet: DEFAULT_ALPHABET.to_string(),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Reject settings the registry cannot operate with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.page_size > 0, "page size must be at least 1");
        ensure!(self.short_id_length > 0, "short id length must be at least 1");
        ensure!(
            self.sweep_interval_seconds > 0,
            "sweep interval must be at least 1 second"
        );
        ensure!(
            !self.short_id_alphabet.is_empty(),
            "short id alphabet must not be empty"
        );

        let mut seen = HashSet::new();
        for c in self.short_id_alphabet.chars() {
            if !c.is_ascii_alphanumeric() {
                bail!("short id alphabet may only contain ASCII letters and digits, found `{c}`");
            }
            if !seen.insert(c) {
                bail!("short id alphabet repeats `{c}`");
            }
        }
        Ok(())
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Location of the metadata table (JSON file or SQLite database).
    pub data_path: PathBuf,
    pub store_backend: StoreBackend,
    /// Base used when building share links; falls back to the request host.
    pub public_url: Option<String>,
    pub registry: RegistryConfig,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Ephemeral file sharing service")]
pub struct Args {
    /// Host to bind to (overrides DROPBIN_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DROPBIN_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploads are stored (overrides DROPBIN_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Metadata table location (overrides DROPBIN_DATA_PATH)
    #[arg(long)]
    pub data_path: Option<PathBuf>,

    /// Metadata backend (overrides DROPBIN_STORE)
    #[arg(long, value_enum)]
    pub store: Option<StoreBackend>,

    /// Public base URL for share links (overrides DROPBIN_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Maximum upload size in bytes (overrides DROPBIN_MAX_UPLOAD_SIZE)
    #[arg(long)]
    pub max_upload_size: Option<u64>,

    /// Records per listing page (overrides DROPBIN_PAGE_SIZE)
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Seconds before an upload is evicted (overrides DROPBIN_TTL_SECONDS)
    #[arg(long)]
    pub ttl_seconds: Option<u64>,

    /// Seconds between eviction sweeps (overrides DROPBIN_SWEEP_INTERVAL_SECONDS)
    #[arg(long)]
    pub sweep_interval_seconds: Option<u64>,

    /// Length of generated short ids (overrides DROPBIN_SHORT_ID_LENGTH)
    #[arg(long)]
    pub short_id_length: Option<usize>,

    /// Characters used for short ids (overrides DROPBIN_SHORT_ID_ALPHABET)
    #[arg(long)]
    pub short_id_alphabet: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("DROPBIN_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("DROPBIN_PORT", 3000u16)?;
        let env_upload =
            env::var("DROPBIN_UPLOAD_DIR").unwrap_or_else(|_| "./uploads".into());
        let env_data =
            env::var("DROPBIN_DATA_PATH").unwrap_or_else(|_| "./file_data.json".into());
        let env_store = env_parse("DROPBIN_STORE", StoreBackend::Json)?;
        let env_public = env::var("DROPBIN_PUBLIC_URL").ok();

        let registry = RegistryConfig {
            upload_dir: args.upload_dir.unwrap_or_else(|| env_upload.into()),
            max_upload_size: match args.max_upload_size {
                Some(v) => v,
                None => env_parse("DROPBIN_MAX_UPLOAD_SIZE", DEFAULT_MAX_UPLOAD_SIZE)?,
            },
            page_size: match args.page_size {
                Some(v) => v,
                None => env_parse("DROPBIN_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            },
            ttl_seconds: match args.ttl_seconds {
                Some(v) => v,
                None => env_parse("DROPBIN_TTL_SECONDS", DEFAULT_TTL_SECONDS)?,
            },
            sweep_interval_seconds: match args.sweep_interval_seconds {
                Some(v) => v,
                None => env_parse(
                    "DROPBIN_SWEEP_INTERVAL_SECONDS",
                    DEFAULT_SWEEP_INTERVAL_SECONDS,
                )?,
            },
            short_id_length: match args.short_id_length {
                Some(v) => v,
                None => env_parse("DROPBIN_SHORT_ID_LENGTH", DEFAULT_SHORT_ID_LEN)?,
            },
            short_id_alphabet: args.short_id_alphabet.unwrap_or_else(|| {
                env::var("DROPBIN_SHORT_ID_ALPHABET").unwrap_or_else(|_| DEFAULT_ALPHABET.into())
            }),
        };
        registry.validate()?;

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            data_path: args.data_path.unwrap_or_else(|| env_data.into()),
            store_backend: args.store.unwrap_or(env_store),
            public_url: args
                .public_url
                .or(env_public)
                .map(|url| url.trim_end_matches('/').to_string()),
            registry,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read `key` from the environment, falling back to `default` when unset.
fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        RegistryConfig::new("./uploads").validate().unwrap();
    }

    #[test]
    fn rejects_degenerate_settings() {
        let mut cfg = RegistryConfig::new("./uploads");
        cfg.page_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = RegistryConfig::new("./uploads");
        cfg.short_id_length = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = RegistryConfig::new("./uploads");
        cfg.short_id_alphabet = "aab".into();
        assert!(cfg.validate().is_err());

        let mut cfg = RegistryConfig::new("./uploads");
        cfg.short_id_alphabet = "ab/".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn cli_flags_override_defaults() {
        let args = Args::parse_from([
            "dropbin",
            "--port",
            "8080",
            "--store",
            "sqlite",
            "--ttl-seconds",
            "42",
            "--public-url",
            "https://files.example.com/",
        ]);
        let cfg = AppConfig::from_args(args).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.store_backend, StoreBackend::Sqlite);
        assert_eq!(cfg.registry.ttl_seconds, 42);
        assert_eq!(cfg.public_url.as_deref(), Some("https://files.example.com"));
        assert_eq!(cfg.addr(), format!("{}:8080", cfg.host));
    }
}
