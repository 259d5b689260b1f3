//! Persistent tile payload caches consulted before the network.
//!
//! A miss is `Ok(None)`, never an error. Errors are reserved for the
//! backend itself failing (disk full, permissions), which the engine
//! reports as a cache fault and then routes around.

use lru::LruCache;
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::core::geo::TileIndex;
use crate::tiles::source::ProviderId;
use crate::Result;

const TILE_EXTENSION: &str = "tile";

/// Address of one cached payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub provider: ProviderId,
    pub index: TileIndex,
}

impl CacheKey {
    pub fn new(provider: ProviderId, index: TileIndex) -> Self {
        Self { provider, index }
    }
}

/// Durable store of raw tile payloads
pub trait CacheProvider: Send + Sync {
    fn try_get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    /// Store `payload` under `key`, replacing any previous one. Returns
    /// whether the payload was kept.
    fn put(&self, key: &CacheKey, payload: &[u8]) -> Result<bool>;

    /// Remove records written before `before`, optionally only for one
    /// provider. Returns the number removed.
    fn delete_older_than(&self, before: SystemTime, provider: Option<&ProviderId>) -> Result<usize>;

    fn remove(&self, key: &CacheKey) -> Result<bool>;

    fn info(&self) -> String;
}

/// Filesystem cache laid out as `basepath/provider/zoom/x_y.tile`.
///
/// Writes go to a uniquely named temp file that is renamed into place, so
/// readers see either the old payload or the new one and concurrent writers
/// resolve to the last rename.
#[derive(Debug)]
pub struct FileCache {
    basepath: PathBuf,
    write_seq: AtomicU64,
}

impl FileCache {
    pub fn new(basepath: impl Into<PathBuf>) -> Self {
        Self {
            basepath: basepath.into(),
            write_seq: AtomicU64::new(0),
        }
    }

    pub fn basepath(&self) -> &Path {
        &self.basepath
    }

    fn provider_dir(&self, provider: &ProviderId) -> PathBuf {
        self.basepath.join(provider.path_component())
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.provider_dir(&key.provider)
            .join(key.index.zoom.to_string())
            .join(format!("{}_{}.{}", key.index.x, key.index.y, TILE_EXTENSION))
    }

    fn purge_dir(dir: &Path, before: SystemTime) -> io::Result<usize> {
        let mut removed = 0;
        for zoom_dir in read_dir_or_empty(dir)? {
            let zoom_dir = zoom_dir?.path();
            if !zoom_dir.is_dir() {
                continue;
            }
            for file in read_dir_or_empty(&zoom_dir)? {
                let path = file?.path();
                if path.extension().map_or(true, |ext| ext != TILE_EXTENSION) {
                    continue;
                }
                let modified = fs::metadata(&path)?.modified()?;
                if modified < before {
                    match fs::remove_file(&path) {
                        Ok(()) => removed += 1,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(removed)
    }
}

fn read_dir_or_empty(dir: &Path) -> io::Result<Vec<io::Result<fs::DirEntry>>> {
    match fs::read_dir(dir) {
        Ok(entries) => Ok(entries.collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

impl CacheProvider for FileCache {
    fn try_get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => {
                log::trace!("FileCache hit {}", path.display());
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &CacheKey, payload: &[u8]) -> Result<bool> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let temp = path.with_extension(format!("{}.{}.tmp", std::process::id(), seq));
        fs::write(&temp, payload)?;
        if let Err(e) = fs::rename(&temp, &path) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        log::trace!("FileCache wrote {} ({} bytes)", path.display(), payload.len());
        Ok(true)
    }

    fn delete_older_than(&self, before: SystemTime, provider: Option<&ProviderId>) -> Result<usize> {
        let removed = match provider {
            Some(provider) => Self::purge_dir(&self.provider_dir(provider), before)?,
            None => {
                let mut removed = 0;
                for entry in read_dir_or_empty(&self.basepath)? {
                    let dir = entry?.path();
                    if dir.is_dir() {
                        removed += Self::purge_dir(&dir, before)?;
                    }
                }
                removed
            }
        };
        log::debug!("FileCache removed {} stale tiles", removed);
        Ok(removed)
    }

    fn remove(&self, key: &CacheKey) -> Result<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn info(&self) -> String {
        format!("Tile cache directory: {}", self.basepath.display())
    }
}

#[derive(Debug, Clone)]
struct MemoryRecord {
    payload: Arc<Vec<u8>>,
    written_at: SystemTime,
}

/// Bounded in-process cache with least-recently-used eviction
#[derive(Debug)]
pub struct MemoryCache {
    records: Mutex<LruCache<CacheKey, MemoryRecord>>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            records: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.records.lock().cap().get()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.records.lock().contains(key)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl CacheProvider for MemoryCache {
    fn try_get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(self
            .records
            .lock()
            .get(key)
            .map(|record| record.payload.as_ref().clone()))
    }

    fn put(&self, key: &CacheKey, payload: &[u8]) -> Result<bool> {
        self.records.lock().put(
            key.clone(),
            MemoryRecord {
                payload: Arc::new(payload.to_vec()),
                written_at: SystemTime::now(),
            },
        );
        Ok(true)
    }

    fn delete_older_than(&self, before: SystemTime, provider: Option<&ProviderId>) -> Result<usize> {
        let mut records = self.records.lock();
        let stale: Vec<CacheKey> = records
            .iter()
            .filter(|(key, record)| {
                record.written_at < before && provider.map_or(true, |p| &key.provider == p)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            records.pop(key);
        }
        Ok(stale.len())
    }

    fn remove(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.records.lock().pop(key).is_some())
    }

    fn info(&self) -> String {
        let records = self.records.lock();
        format!("Memory tile cache: {}/{} tiles", records.len(), records.cap())
    }
}

/// Cache that never stores anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl CacheProvider for NoCache {
    fn try_get(&self, _key: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn put(&self, _key: &CacheKey, _payload: &[u8]) -> Result<bool> {
        Ok(false)
    }

    fn delete_older_than(&self, _before: SystemTime, _provider: Option<&ProviderId>) -> Result<usize> {
        Ok(0)
    }

    fn remove(&self, _key: &CacheKey) -> Result<bool> {
        Ok(false)
    }

    fn info(&self) -> String {
        "No tile cache".to_string()
    }
}

/// A fast front cache over a slower durable one.
///
/// Reads check the front first and promote back-store hits into it. Writes
/// go to both; the result reflects the back store.
pub struct TieredCache {
    front: MemoryCache,
    back: Arc<dyn CacheProvider>,
}

impl TieredCache {
    pub fn new(front_capacity: usize, back: Arc<dyn CacheProvider>) -> Self {
        Self {
            front: MemoryCache::new(front_capacity),
            back,
        }
    }

    pub fn front(&self) -> &MemoryCache {
        &self.front
    }
}

impl CacheProvider for TieredCache {
    fn try_get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        if let Some(payload) = self.front.try_get(key)? {
            return Ok(Some(payload));
        }
        let payload = self.back.try_get(key)?;
        if let Some(bytes) = &payload {
            self.front.put(key, bytes)?;
        }
        Ok(payload)
    }

    fn put(&self, key: &CacheKey, payload: &[u8]) -> Result<bool> {
        self.front.put(key, payload)?;
        self.back.put(key, payload)
    }

    fn delete_older_than(&self, before: SystemTime, provider: Option<&ProviderId>) -> Result<usize> {
        self.front.delete_older_than(before, provider)?;
        self.back.delete_older_than(before, provider)
    }

    fn remove(&self, key: &CacheKey) -> Result<bool> {
        let front = self.front.remove(key)?;
        let back = self.back.remove(key)?;
        Ok(front || back)
    }

    fn info(&self) -> String {
        format!("{} in front of {}", self.front.info(), self.back.info())
    }
}
