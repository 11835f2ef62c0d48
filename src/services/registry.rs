//! src/services/registry.rs
//!
//! Registry: maps short identifiers to uploaded files. Payloads live flat
//! in the upload directory; metadata lives in a [`MetadataStore`] that is
//! always written as a whole.
//!
//! Every mutation (create, resolve, delete, sweep) holds the single write
//! lock for its full read-modify-persist sequence and only swaps the
//! in-memory table after the store accepted the new version. Info and
//! listing calls read the committed table under the shared lock.

use crate::{
    config::RegistryConfig,
    models::object::{CreatedObject, ObjectInfo, ObjectPage, ObjectRecord, Table},
    services::{
        clock::{Clock, SystemClock},
        metadata_store::{MetadataStore, StoreError},
        naming::{ShortIdGenerator, collision_candidate, is_allowed_name, sanitize_filename},
    },
};
use std::{
    collections::HashSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::RwLock,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Draws allowed before giving up on finding a free short id.
const MAX_ID_ATTEMPTS: usize = 64;
const TEMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid registry configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid upload: {0}")]
    BadInput(String),
    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    Oversize { size: u64, limit: u64 },
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("no free short id after {0} attempts")]
    IdSpaceExhausted(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Outcome of one eviction pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Records inspected.
    pub scanned: usize,
    /// Records dropped because they outlived the TTL.
    pub expired: usize,
    /// Records dropped because their file had vanished.
    pub orphaned: usize,
    /// Files that could not be removed (their records were dropped anyway).
    pub file_errors: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.expired + self.orphaned
    }
}

/// Registry provides the operations behind the share service:
/// - Create (write payload, reserve a unique name and id, persist metadata)
/// - Resolve (bump the download counter, heal orphaned records)
/// - Info / List (read-only projections)
/// - Delete by stored name
/// - Sweep (evict expired and orphaned records)
#[derive(Clone)]
pub struct Registry {
    config: Arc<RegistryConfig>,
    store: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
    ids: ShortIdGenerator,
    table: Arc<RwLock<Table>>,
}

impl Registry {
    /// Open the registry with the system clock.
    pub async fn open(config: RegistryConfig, store: Arc<dyn MetadataStore>) -> RegistryResult<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock)).await
    }

    /// Open the registry, creating the upload directory if needed, removing
    /// leftover temp files and loading the persisted table.
    ///
    /// Loaded records keep their original upload times, so anything that
    /// expired while the process was down goes on the next sweep.
    pub async fn with_clock(
        config: RegistryConfig,
        store: Arc<dyn MetadataStore>,
        clock: Arc<dyn Clock>,
    ) -> RegistryResult<Self> {
        config
            .validate()
            .map_err(|err| RegistryError::InvalidConfig(err.to_string()))?;
        fs::create_dir_all(&config.upload_dir).await?;
        remove_stale_temp_files(&config.upload_dir).await;

        let table = store.load_all().await?;
        info!(
            records = table.len(),
            store = %store.describe(),
            "loaded metadata table"
        );

        Ok(Self {
            ids: ShortIdGenerator::new(&config.short_id_alphabet, config.short_id_length),
            config: Arc::new(config),
            store,
            clock,
            table: Arc::new(RwLock::new(table)),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn upload_dir(&self) -> &Path {
        &self.config.upload_dir
    }

    /// On-disk location for a stored name.
    pub fn path_for(&self, stored_name: &str) -> PathBuf {
        self.config.upload_dir.join(stored_name)
    }

    /// Store an upload and register it under a fresh short id.
    ///
    /// The payload is staged in a temp file first; name reservation, the
    /// rename into place, id generation and persistence happen under the
    /// write lock. If persisting fails the stored file is removed again, so
    /// a failed create leaves neither a file nor a record behind.
    pub async fn create(&self, content: &[u8], proposed_name: &str) -> RegistryResult<CreatedObject> {
        let size = content.len() as u64;
        if size > self.config.max_upload_size {
            return Err(RegistryError::Oversize {
                size,
                limit: self.config.max_upload_size,
            });
        }
        if !is_allowed_name(proposed_name) {
            return Err(RegistryError::BadInput(format!(
                "file type not allowed: `{proposed_name}`"
            )));
        }
        let sanitized = sanitize_filename(proposed_name);
        if sanitized.is_empty() {
            return Err(RegistryError::BadInput(format!(
                "filename `{proposed_name}` has no usable characters"
            )));
        }

        let tmp_path = self.stage(content).await?;

        let mut table = self.table.write().await;

        let stored_name = match self.reserve_name(&table, &sanitized).await {
            Ok(name) => name,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };
        let file_path = self.path_for(&stored_name);
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(RegistryError::Io(err));
        }

        let Some(short_id) = self
            .ids
            .generate_unique(MAX_ID_ATTEMPTS, |candidate| table.contains_key(candidate))
        else {
            let _ = fs::remove_file(&file_path).await;
            return Err(RegistryError::IdSpaceExhausted(MAX_ID_ATTEMPTS));
        };

        let mut next = table.clone();
        next.insert(
            short_id.clone(),
            ObjectRecord::new(stored_name.clone(), self.clock.now()),
        );
        if let Err(err) = self.store.save_all(&next).await {
            if let Err(rm_err) = fs::remove_file(&file_path).await {
                warn!(
                    "failed to roll back {} after metadata write error: {}",
                    file_path.display(),
                    rm_err
                );
            }
            return Err(err.into());
        }
        *table = next;

        info!(%short_id, %stored_name, size, "upload stored");
        Ok(CreatedObject {
            short_id,
            stored_name,
        })
    }

    /// Look up a short id for download and count the download.
    ///
    /// A record whose file is gone is dropped and reported as not found.
    /// The lock is held across check, increment and persist, so a
    /// concurrent sweep is ordered entirely before or after this call.
    pub async fn resolve(&self, short_id: &str) -> RegistryResult<String> {
        let mut table = self.table.write().await;
        let record = table
            .get(short_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(short_id.to_string()))?;

        if !self.file_exists(&record.stored_name).await? {
            let mut next = table.clone();
            next.remove(short_id);
            match self.store.save_all(&next).await {
                Ok(()) => {
                    *table = next;
                    info!(%short_id, stored_name = %record.stored_name, "dropped orphaned record");
                }
                Err(err) => warn!(
                    %short_id,
                    "failed to drop orphaned record, sweeper will retry: {}",
                    err
                ),
            }
            return Err(RegistryError::NotFound(short_id.to_string()));
        }

        let mut next = table.clone();
        if let Some(entry) = next.get_mut(short_id) {
            entry.download_count += 1;
        }
        self.store.save_all(&next).await?;
        *table = next;

        debug!(%short_id, stored_name = %record.stored_name, "resolved");
        Ok(record.stored_name)
    }

    /// Snapshot of a record with the seconds it has left.
    pub async fn info(&self, short_id: &str) -> RegistryResult<ObjectInfo> {
        let table = self.table.read().await;
        let record = table
            .get(short_id)
            .ok_or_else(|| RegistryError::NotFound(short_id.to_string()))?;
        Ok(ObjectInfo::from_record(
            short_id,
            record,
            self.clock.now(),
            self.config.ttl_seconds,
        ))
    }

    /// One page of records using the configured page size.
    pub async fn list(&self, search: &str, page: usize) -> ObjectPage {
        self.list_page(search, page, self.config.page_size).await
    }

    /// List records newest first, optionally filtered by a case-insensitive
    /// substring of the stored name. Pages are 1-based; page 0 is treated as 1.
    pub async fn list_page(&self, search: &str, page: usize, page_size: usize) -> ObjectPage {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let needle = search.trim().to_lowercase();
        let now = self.clock.now();

        let mut matches: Vec<ObjectInfo> = {
            let table = self.table.read().await;
            table
                .iter()
                .filter(|(_, record)| {
                    needle.is_empty() || record.stored_name.to_lowercase().contains(&needle)
                })
                .map(|(id, record)| {
                    ObjectInfo::from_record(id, record, now, self.config.ttl_seconds)
                })
                .collect()
        };

        matches.sort_by(|a, b| {
            b.uploaded_at
                .total_cmp(&a.uploaded_at)
                .then_with(|| a.short_id.cmp(&b.short_id))
        });

        let total = matches.len();
        let total_pages = total.div_ceil(page_size).max(1);
        let records = matches
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        ObjectPage {
            records,
            page,
            total_pages,
            total,
        }
    }

    /// Delete the first record stored under `stored_name`, file first.
    ///
    /// If the file cannot be removed, including when it is already gone,
    /// the record is kept and the error returned. The sweeper drops such a
    /// record as an orphan on its next pass.
    pub async fn delete_by_name(&self, stored_name: &str) -> RegistryResult<()> {
        let mut table = self.table.write().await;
        let short_id = table
            .iter()
            .find(|(_, record)| record.stored_name == stored_name)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| RegistryError::NotFound(stored_name.to_string()))?;

        let file_path = self.path_for(stored_name);
        if let Err(err) = fs::remove_file(&file_path).await {
            warn!("failed to remove file {}: {}", file_path.display(), err);
            return Err(RegistryError::Io(err));
        }
        debug!("removed physical file {}", file_path.display());

        let mut next = table.clone();
        next.remove(&short_id);
        self.store.save_all(&next).await?;
        *table = next;

        info!(%short_id, %stored_name, "upload deleted");
        Ok(())
    }

    /// Open the payload of a live record for streaming out.
    pub async fn open_stored(&self, stored_name: &str) -> RegistryResult<File> {
        let registered = {
            let table = self.table.read().await;
            table.values().any(|record| record.stored_name == stored_name)
        };
        if !registered {
            return Err(RegistryError::NotFound(stored_name.to_string()));
        }

        File::open(self.path_for(stored_name))
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => RegistryError::NotFound(stored_name.to_string()),
                _ => RegistryError::Io(err),
            })
    }

    /// Run one eviction pass over the whole table.
    ///
    /// Holds the write lock for the entire pass. File removals are
    /// best-effort; records are dropped even when their file could not be
    /// deleted. The table is persisted once, and only if something was
    /// removed. When that write fails the in-memory table is left untouched
    /// and the next pass starts over.
    pub async fn sweep(&self) -> RegistryResult<SweepReport> {
        let mut table = self.table.write().await;
        let now = self.clock.now();
        let ttl = self.config.ttl_seconds as f64;
        let mut report = SweepReport {
            scanned: table.len(),
            ..Default::default()
        };

        let mut next = table.clone();
        for (short_id, record) in table.iter() {
            let file_path = self.path_for(&record.stored_name);

            if record.age(now) > ttl {
                match fs::remove_file(&file_path).await {
                    Ok(()) => debug!("removed expired file {}", file_path.display()),
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => {
                        report.file_errors += 1;
                        warn!("failed to remove file {}: {}", file_path.display(), err);
                    }
                }
                next.remove(short_id);
                report.expired += 1;
                continue;
            }

            match self.file_exists(&record.stored_name).await {
                Ok(true) => {}
                Ok(false) => {
                    next.remove(short_id);
                    report.orphaned += 1;
                }
                Err(err) => warn!("could not stat {}: {}", file_path.display(), err),
            }
        }

        if report.removed() > 0 {
            self.store.save_all(&next).await?;
            *table = next;
        }
        Ok(report)
    }

    /// Number of live records.
    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.read().await.is_empty()
    }

    /// Copy of the committed table.
    pub async fn snapshot(&self) -> Table {
        self.table.read().await.clone()
    }

    /// Check the metadata store is reachable.
    pub async fn ping_store(&self) -> RegistryResult<()> {
        Ok(self.store.ping().await?)
    }

    /// Write the payload to a temp file in the upload directory.
    async fn stage(&self, content: &[u8]) -> RegistryResult<PathBuf> {
        let tmp_path = self
            .config
            .upload_dir
            .join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()));

        let write = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(content).await?;
            file.flush().await?;
            file.sync_all().await
        };
        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(RegistryError::Io(err));
        }
        Ok(tmp_path)
    }

    /// First collision candidate that is neither registered nor on disk.
    /// Must be called with the write lock held.
    async fn reserve_name(&self, table: &Table, sanitized: &str) -> RegistryResult<String> {
        let registered: HashSet<&str> = table
            .values()
            .map(|record| record.stored_name.as_str())
            .collect();

        let mut attempt = 0;
        loop {
            let candidate = collision_candidate(sanitized, attempt);
            if !registered.contains(candidate.as_str())
                && !fs::try_exists(self.path_for(&candidate)).await?
            {
                return Ok(candidate);
            }
            attempt += 1;
        }
    }

    async fn file_exists(&self, stored_name: &str) -> io::Result<bool> {
        match fs::metadata(self.path_for(stored_name)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Remove temp files left behind by uploads interrupted mid-write.
async fn remove_stale_temp_files(dir: &Path) {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) => {
            warn!("could not scan {} for temp files: {}", dir.display(), err);
            return;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }
        match fs::remove_file(entry.path()).await {
            Ok(()) => debug!("removed stale temp file {}", entry.path().display()),
            Err(err) => warn!("failed to remove stale temp file {}: {}", entry.path().display(), err),
        }
    }
}
