//! src/services/metadata_store.rs
//!
//! Durable metadata table: one record per short identifier, always read and
//! written as a whole. Two backends share the same contract: a reader
//! never observes a half-written table:
//!
//! - [`JsonFileStore`] writes a temp file, fsyncs it, and renames it over
//!   the previous table.
//! - [`SqliteStore`] replaces the table inside a single transaction.

use crate::models::object::{ObjectRecord, Table};
use async_trait::async_trait;
use clap::ValueEnum;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metadata table is corrupt: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Whole-table persistence used by the registry and the sweeper.
#[async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    /// Read every record. A store that was never written loads as empty.
    async fn load_all(&self) -> StoreResult<Table>;

    /// Atomically replace the persisted table with `table`.
    async fn save_all(&self, table: &Table) -> StoreResult<()>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> StoreResult<()>;

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Which backend holds the metadata table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Json,
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unknown store backend `{other}` (expected json or sqlite)")),
        }
    }
}

/// Open the configured backend at `path`.
pub async fn open_store(
    backend: StoreBackend,
    path: impl AsRef<Path>,
) -> StoreResult<Arc<dyn MetadataStore>> {
    let path = path.as_ref();
    let store: Arc<dyn MetadataStore> = match backend {
        StoreBackend::Json => Arc::new(JsonFileStore::open(path).await?),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(path).await?),
    };
    Ok(store)
}

/// Metadata table kept in a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Open the table at `path`, creating an empty one if it does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let store = Self { path: path.into() };
        if let Some(parent) = store.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        if !fs::try_exists(&store.path).await? {
            store.save_all(&Table::new()).await?;
            debug!("initialised empty metadata table at {}", store.path.display());
        }
        Ok(store)
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "table".into());
        self.path
            .with_file_name(format!(".{}.tmp-{}", name, Uuid::new_v4()))
    }
}

#[async_trait]
impl MetadataStore for JsonFileStore {
    async fn load_all(&self) -> StoreResult<Table> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Table::new()),
            Err(err) => return Err(err.into()),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Table::new());
        }
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn save_all(&self, table: &Table) -> StoreResult<()> {
        let data = serde_json::to_vec_pretty(table)?;
        let tmp_path = self.temp_path();

        let write = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &self.path).await
        };

        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        fs::metadata(&self.path).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

/// Metadata table kept in an embedded SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    location: String,
}

impl SqliteStore {
    /// Open (or create) the database file at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            location: path.display().to_string(),
        };
        store.apply_schema().await?;
        Ok(store)
    }

    async fn apply_schema(&self) -> StoreResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty());
        for stmt in statements {
            debug!("Executing schema SQL: {}", stmt);
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn load_all(&self) -> StoreResult<Table> {
        let rows = sqlx::query_as::<_, (String, String, f64, i64)>(
            "SELECT short_id, filename, uploaded_at, downloads FROM objects",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(short_id, filename, uploaded_at, downloads)| {
                let record = ObjectRecord {
                    stored_name: filename,
                    uploaded_at,
                    download_count: downloads.max(0) as u64,
                };
                (short_id, record)
            })
            .collect())
    }

    async fn save_all(&self, table: &Table) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM objects").execute(&mut *tx).await?;
        for (short_id, record) in table {
            sqlx::query(
                "INSERT INTO objects (short_id, filename, uploaded_at, downloads)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(short_id)
            .bind(&record.stored_name)
            .bind(record.uploaded_at)
            .bind(record.download_count as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        let one = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        if one != 1 {
            return Err(StoreError::Io(io::Error::other(format!(
                "unexpected probe result: {one}"
            ))));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_table() -> Table {
        let mut table = Table::new();
        table.insert("abc123".into(), ObjectRecord::new("report.pdf", 1_000.5));
        let mut second = ObjectRecord::new("photo.png", 2_000.0);
        second.download_count = 7;
        table.insert("Zx9Yw8".into(), second);
        table
    }

    #[tokio::test]
    async fn json_store_starts_empty_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta").join("file_data.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());

        let table = sample_table();
        store.save_all(&table).await.unwrap();

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(reopened.load_all().await.unwrap(), table);
    }

    #[tokio::test]
    async fn json_store_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file_data.json");
        let store = JsonFileStore::open(&path).await.unwrap();
        store.save_all(&sample_table()).await.unwrap();
        store.save_all(&Table::new()).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["file_data.json".to_string()]);
    }

    #[tokio::test]
    async fn json_store_reads_legacy_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file_data.json");
        std::fs::write(
            &path,
            r#"{"q1W2e3": {"filename": "a.txt", "uploaded_at": 1700000000.5, "downloads": 2}}"#,
        )
        .unwrap();

        let store = JsonFileStore::open(&path).await.unwrap();
        let table = store.load_all().await.unwrap();
        let record = &table["q1W2e3"];
        assert_eq!(record.stored_name, "a.txt");
        assert_eq!(record.download_count, 2);
    }

    #[tokio::test]
    async fn json_store_reports_corrupt_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file_data.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::open(&path).await.unwrap();
        assert!(matches!(store.load_all().await, Err(StoreError::Json(_))));
    }

    #[tokio::test]
    async fn sqlite_store_replaces_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.db");

        let store = SqliteStore::open(&path).await.unwrap();
        store.ping().await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());

        let table = sample_table();
        store.save_all(&table).await.unwrap();
        assert_eq!(store.load_all().await.unwrap(), table);

        let mut smaller = table.clone();
        smaller.remove("abc123");
        store.save_all(&smaller).await.unwrap();

        let reopened = SqliteStore::open(&path).await.unwrap();
        assert_eq!(reopened.load_all().await.unwrap(), smaller);
    }

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("JSON".parse::<StoreBackend>().unwrap(), StoreBackend::Json);
        assert_eq!("sqlite".parse::<StoreBackend>().unwrap(), StoreBackend::Sqlite);
        assert!("redis".parse::<StoreBackend>().is_err());
    }
}
