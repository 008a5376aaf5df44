use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
    time::{Duration, SystemTime},
};

use inflow_common::VolumeCache;
use inflow_utils::disk_storage::{read_file, write_file, FileFormat};

use crate::PipelineError;

/// Persistence of [`VolumeCache`] documents by key.
pub trait VolumeStore: Send + Sync {
    fn get(&self, key: &str) -> crate::Result<Option<VolumeCache>>;

    fn set(&self, key: &str, cache: &VolumeCache) -> crate::Result<()>;

    fn exists(&self, key: &str) -> crate::Result<bool>;
}

impl<S: VolumeStore + ?Sized> VolumeStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> crate::Result<Option<VolumeCache>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, cache: &VolumeCache) -> crate::Result<()> {
        (**self).set(key, cache)
    }

    fn exists(&self, key: &str) -> crate::Result<bool> {
        (**self).exists(key)
    }
}

fn unavailable(key: &str, source: inflow_utils::Error) -> PipelineError {
    PipelineError::CacheUnavailable {
        key: key.to_string(),
        source,
    }
}

/// One JSON file per key under a directory.
pub struct FileStore {
    dir: PathBuf,
    ttl: Option<Duration>,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: Option<Duration>) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }

    fn is_expired(&self, path: &Path) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > ttl)
    }

    /// Removes the entry if it outlived the TTL. Returns whether it did.
    fn evict_expired(&self, key: &str, path: &Path) -> crate::Result<bool> {
        if !path.exists() || !self.is_expired(path) {
            return Ok(false);
        }
        let _guard = self.lock();
        fs::remove_file(path).map_err(|e| {
            unavailable(key, inflow_utils::Error::FileRemoveFailed(path.to_path_buf(), e))
        })?;
        tracing::info!(key, "expired cache entry evicted");
        Ok(true)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl VolumeStore for FileStore {
    fn get(&self, key: &str) -> crate::Result<Option<VolumeCache>> {
        let path = self.path(key);
        if self.evict_expired(key, &path)? {
            return Ok(None);
        }
        read_file(&path, FileFormat::JSON).map_err(|e| unavailable(key, e))
    }

    fn set(&self, key: &str, cache: &VolumeCache) -> crate::Result<()> {
        let path = self.path(key);
        let _guard = self.lock();
        write_file(&path, FileFormat::JSON, cache).map_err(|e| unavailable(key, e))
    }

    fn exists(&self, key: &str) -> crate::Result<bool> {
        let path = self.path(key);
        if self.evict_expired(key, &path)? {
            return Ok(false);
        }
        Ok(path.exists())
    }
}

/// Keeps documents in process memory only.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, VolumeCache>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VolumeCache>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl VolumeStore for MemoryStore {
    fn get(&self, key: &str) -> crate::Result<Option<VolumeCache>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, cache: &VolumeCache) -> crate::Result<()> {
        self.lock().insert(key.to_string(), cache.clone());
        Ok(())
    }

    fn exists(&self, key: &str) -> crate::Result<bool> {
        Ok(self.lock().contains_key(key))
    }
}
