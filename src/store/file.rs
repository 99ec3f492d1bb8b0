//! One JSON file per swap
//!
//! Writes go to a temporary file that is fsynced and renamed over the record,
//! then the directory is fsynced, so a crash leaves either the old or the new
//! version on disk.

use super::{apply_mutation, ensure_deletable, validate_id, Mutator, SwapStore};
use crate::error::{StoreError, StoreResult};
use crate::locks::KeyedLocks;
use crate::swap::{SwapRecord, SwapState};

use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

const RECORD_EXT: &str = "json";
const TMP_EXT: &str = "json.tmp";

pub struct JsonFileStore {
    base_dir: PathBuf,
    locks: KeyedLocks,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `base_dir`
    pub fn new<P: AsRef<Path>>(base_dir: P) -> StoreResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)?;

        // Leftovers from writes interrupted before rename
        for entry in fs::read_dir(&base_dir)? {
            let path = entry?.path();
            if path.to_string_lossy().ends_with(TMP_EXT) {
                warn!("Removing incomplete write {:?}", path);
                fs::remove_file(&path)?;
            }
        }

        Ok(Self {
            base_dir,
            locks: KeyedLocks::new(),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.{RECORD_EXT}"))
    }
}

#[async_trait]
impl SwapStore for JsonFileStore {
    async fn create(&self, record: &SwapRecord) -> StoreResult<()> {
        validate_id(&record.id)?;
        let _guard = self.locks.lock(&record.id).await;

        let dir = self.base_dir.clone();
        let path = self.record_path(&record.id);
        let owned = record.clone();
        blocking(move || {
            if path.exists() {
                return Err(StoreError::DuplicateId(owned.id));
            }
            write_atomic(&dir, &path, &owned)
        })
        .await?;

        debug!("Persisted swap {} to {:?}", record.id, self.base_dir);
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<SwapRecord> {
        validate_id(id)?;
        let path = self.record_path(id);
        let id = id.to_string();
        blocking(move || read_record(&path)?.ok_or(StoreError::NotFound(id))).await
    }

    async fn update(&self, id: &str, mutate: Mutator) -> StoreResult<SwapRecord> {
        validate_id(id)?;
        let _guard = self.locks.lock(id).await;

        let dir = self.base_dir.clone();
        let path = self.record_path(id);
        let id = id.to_string();
        blocking(move || {
            let current = read_record(&path)?.ok_or(StoreError::NotFound(id))?;
            let next = apply_mutation(&current, mutate)?;
            write_atomic(&dir, &path, &next)?;
            Ok(next)
        })
        .await
    }

    async fn list_by_state(&self, state: SwapState) -> StoreResult<Vec<SwapRecord>> {
        let dir = self.base_dir.clone();
        blocking(move || {
            let mut records = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                    continue;
                }
                match read_record(&path) {
                    Ok(Some(record)) if record.state == state => records.push(record),
                    Ok(_) => {}
                    Err(StoreError::Corrupt(msg)) => {
                        error!("Skipping unreadable swap file: {}", msg);
                    }
                    Err(e) => return Err(e),
                }
            }
            records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(records)
        })
        .await
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        validate_id(id)?;
        let _guard = self.locks.lock(id).await;

        let dir = self.base_dir.clone();
        let path = self.record_path(id);
        let owned_id = id.to_string();
        blocking(move || {
            let record = read_record(&path)?.ok_or(StoreError::NotFound(owned_id))?;
            ensure_deletable(&record)?;
            fs::remove_file(&path)?;
            sync_dir(&dir)?;
            Ok(())
        })
        .await
    }

    async fn health_check(&self) -> StoreResult<()> {
        let dir = self.base_dir.clone();
        blocking(move || {
            let meta = fs::metadata(&dir)?;
            if meta.permissions().readonly() {
                return Err(StoreError::Io(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("{:?} is read-only", dir),
                )));
            }
            Ok(())
        })
        .await
    }
}

/// Run filesystem work off the async workers
async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(io::Error::other(e)))?
}

fn read_record(path: &Path) -> StoreResult<Option<SwapRecord>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::Corrupt(format!("{:?}: {}", path, e)))
}

fn write_atomic(dir: &Path, path: &Path, record: &SwapRecord) -> StoreResult<()> {
    let json = serde_json::to_vec_pretty(record)?;
    let tmp = path.with_extension(TMP_EXT);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    sync_dir(dir)?;
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
