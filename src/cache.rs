//! Byte-capacity-bounded LRU cache of object bodies
//!
//! Entries are either held in memory or persisted as one file per entry,
//! named by the cache key, under a backing directory. The index (recency
//! order, size accounting, statistics) lives behind a single lock; eviction
//! always happens under the same lock as the `put` that triggered it.
//!
//! Persisted writes go to a temporary file first and are renamed into place,
//! so readers (including other processes sharing the directory) never see a
//! partially written entry. The index is only updated once the rename has
//! succeeded.

use crate::error::{ProxyError, Result};
use crate::key_resolver::CacheKey;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const TMP_SUFFIX: &str = ".tmp";

/// Temporary files older than this are treated as abandoned writes. Younger
/// ones may belong to another process still writing into the directory.
const STALE_TMP_AGE: Duration = Duration::from_secs(60 * 60);

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub current_size: u64,
    pub capacity: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry {
    size: u64,
    /// Position in the recency index
    tick: u64,
    /// Body, only for in-memory stores
    value: Option<Bytes>,
}

/// Recency-ordered index; lowest tick is least recently used
#[derive(Default)]
struct Index {
    entries: HashMap<CacheKey, Entry>,
    recency: BTreeMap<u64, CacheKey>,
    next_tick: u64,
    current_size: u64,
}

impl Index {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    /// Move an entry to the most-recently-used end
    fn touch(&mut self, key: &CacheKey) -> bool {
        let tick = self.bump();
        match self.entries.get_mut(key) {
            Some(entry) => {
                self.recency.remove(&entry.tick);
                entry.tick = tick;
                self.recency.insert(tick, key.clone());
                true
            }
            None => false,
        }
    }

    fn insert(&mut self, key: CacheKey, size: u64, value: Option<Bytes>) {
        self.remove(&key);
        let tick = self.bump();
        self.recency.insert(tick, key.clone());
        self.entries.insert(key, Entry { size, tick, value });
        self.current_size += size;
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        self.current_size -= entry.size;
        Some(entry)
    }

    fn pop_lru(&mut self) -> Option<(CacheKey, Entry)> {
        let (_, key) = self.recency.pop_first()?;
        let entry = self.entries.remove(&key)?;
        self.current_size -= entry.size;
        Some((key, entry))
    }
}

/// Persistent LRU cache keyed by [`CacheKey`]
pub struct CacheStore {
    capacity: u64,
    directory: Option<PathBuf>,
    index: Mutex<Index>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    tmp_counter: AtomicU64,
}

impl CacheStore {
    /// Create a cache that keeps entry bodies in memory only
    pub fn in_memory(capacity: u64) -> Self {
        Self::with_directory(capacity, None)
    }

    /// Open a persistent cache backed by `directory`
    ///
    /// The directory is created if needed. Temporary files abandoned for more
    /// than an hour are removed and existing entries are re-indexed, oldest
    /// modification time first, then trimmed to `capacity`.
    pub async fn open(capacity: u64, directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).await.map_err(|e| {
            ProxyError::CacheIoError(format!(
                "Failed to create cache directory {}: {}",
                directory.display(),
                e
            ))
        })?;

        let store = Self::with_directory(capacity, Some(directory.clone()));
        let found = scan_directory(&directory).await?;

        let mut index = store.index.lock().await;
        for (key, size, _) in found {
            index.insert(key, size, None);
        }
        store.evict_to_capacity(&mut index).await;

        info!(
            "Opened cache at {:?}: {} entries, {}/{} bytes",
            directory,
            index.entries.len(),
            index.current_size,
            capacity
        );
        drop(index);

        Ok(store)
    }

    fn with_directory(capacity: u64, directory: Option<PathBuf>) -> Self {
        CacheStore {
            capacity,
            directory,
            index: Mutex::new(Index::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            tmp_counter: AtomicU64::new(0),
        }
    }

    /// Look up an entry, promoting it to most-recently-used on a hit
    ///
    /// # Returns
    /// * `Ok(Some(Bytes))` on a hit
    /// * `Ok(None)` on a miss (including a backing file that has vanished)
    /// * `Err(ProxyError::CacheIoError)` if the backing file cannot be read
    pub async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let path = {
            let mut index = self.index.lock().await;
            if !index.touch(key) {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss: {}", key);
                return Ok(None);
            }
            match &self.directory {
                None => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("Cache hit: {}", key);
                    return Ok(index.entries.get(key).and_then(|e| e.value.clone()));
                }
                Some(dir) => dir.join(key.as_str()),
            }
        };

        match fs::read(&path).await {
            Ok(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit: {} ({} bytes)", key, data.len());
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.forget_vanished(key, &path).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => Err(ProxyError::CacheIoError(format!(
                "Failed to read cache file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Drop an index entry whose backing file no longer exists
    async fn forget_vanished(&self, key: &CacheKey, path: &Path) {
        let mut index = self.index.lock().await;
        // Renames and deletes happen under this lock, so the check is stable.
        if fs::metadata(path).await.is_err() && index.remove(key).is_some() {
            warn!("Cache file for {} vanished, dropping entry", key);
        }
    }

    /// Check whether an entry is present without touching its recency
    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.index.lock().await.entries.contains_key(key)
    }

    /// Insert or replace an entry, then evict LRU entries down to capacity
    ///
    /// A value larger than the whole capacity is refused: nothing is stored
    /// and any previous entry under the same key is dropped.
    ///
    /// # Returns
    /// * `Ok(())` if the value was stored or deliberately refused
    /// * `Err(ProxyError::CacheIoError)` if persisting failed; the index is
    ///   left exactly as it was before the call
    pub async fn put(&self, key: CacheKey, value: Bytes) -> Result<()> {
        let size = value.len() as u64;

        if size > self.capacity {
            warn!(
                "Refusing to cache {}: {} bytes exceeds capacity of {} bytes",
                key, size, self.capacity
            );
            let mut index = self.index.lock().await;
            if index.remove(&key).is_some() {
                self.remove_backing_file(&key).await;
            }
            return Ok(());
        }

        let Some(dir) = &self.directory else {
            let mut index = self.index.lock().await;
            index.insert(key.clone(), size, Some(value));
            self.evict_to_capacity(&mut index).await;
            debug!("Stored in cache: {} ({} bytes)", key, size);
            return Ok(());
        };

        let tmp_path = dir.join(format!(
            "{}.{}.{}{}",
            key,
            std::process::id(),
            self.tmp_counter.fetch_add(1, Ordering::Relaxed),
            TMP_SUFFIX
        ));
        if let Err(e) = write_file(&tmp_path, &value).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ProxyError::CacheIoError(format!(
                "Failed to write cache file {}: {}",
                tmp_path.display(),
                e
            )));
        }

        let final_path = dir.join(key.as_str());
        let mut index = self.index.lock().await;
        if let Err(e) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ProxyError::CacheIoError(format!(
                "Failed to move cache file into place at {}: {}",
                final_path.display(),
                e
            )));
        }

        index.insert(key.clone(), size, None);
        self.evict_to_capacity(&mut index).await;
        debug!("Stored in cache: {} ({} bytes)", key, size);
        Ok(())
    }

    /// Remove every entry
    ///
    /// # Returns
    /// The number of entries removed
    pub async fn clear(&self) -> usize {
        let mut index = self.index.lock().await;
        let keys: Vec<CacheKey> = index.entries.keys().cloned().collect();
        *index = Index::default();

        for key in &keys {
            self.remove_backing_file(key).await;
        }

        info!("Cleared cache: {} entries removed", keys.len());
        keys.len()
    }

    /// Entries with their sizes, least recently used first
    pub async fn entries(&self) -> Vec<(CacheKey, u64)> {
        let index = self.index.lock().await;
        index
            .recency
            .values()
            .filter_map(|key| index.entries.get(key).map(|e| (key.clone(), e.size)))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.index.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.lock().await.entries.is_empty()
    }

    pub async fn current_size(&self) -> u64 {
        self.index.lock().await.current_size
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let index = self.index.lock().await;
        CacheStats {
            entries: index.entries.len(),
            current_size: index.current_size,
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    async fn evict_to_capacity(&self, index: &mut Index) {
        while index.current_size > self.capacity {
            let Some((key, entry)) = index.pop_lru() else {
                break;
            };
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!("Evicted LRU entry: {} ({} bytes)", key, entry.size);
            self.remove_backing_file(&key).await;
        }
    }

    async fn remove_backing_file(&self, key: &CacheKey) {
        let Some(dir) = &self.directory else {
            return;
        };
        let path = dir.join(key.as_str());
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to delete cache file {}: {}", path.display(), e);
            }
        }
    }
}

async fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

/// Collect cache files in `dir`, oldest first, deleting stale temp files
///
/// Files that disappear while the directory is being read are skipped.
async fn scan_directory(dir: &Path) -> Result<Vec<(CacheKey, u64, SystemTime)>> {
    let mut found = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    let now = SystemTime::now();

    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };

        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        if name.ends_with(TMP_SUFFIX) {
            if is_stale(now, modified) {
                remove_stale_tmp(&entry.path(), name).await;
            }
            continue;
        }

        let Some(key) = CacheKey::parse(name) else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        found.push((key, metadata.len(), modified));
    }

    found.sort_by_key(|(_, _, modified)| *modified);
    Ok(found)
}

fn is_stale(now: SystemTime, modified: SystemTime) -> bool {
    // A clock step backwards leaves the age undefined; keep the file
    now.duration_since(modified)
        .map(|age| age >= STALE_TMP_AGE)
        .unwrap_or(false)
}

async fn remove_stale_tmp(path: &Path, name: &str) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed stale temp file {}", name),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove stale temp file {}: {}", name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_resolver::cache_key;
    use std::sync::Arc;

    fn key(name: &str) -> CacheKey {
        cache_key("bucket", name)
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = CacheStore::in_memory(1024);
        assert!(cache.get(&key("a")).await.unwrap().is_none());

        cache.put(key("a"), Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(
            cache.get(&key("a")).await.unwrap(),
            Some(Bytes::from_static(b"hello"))
        );

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.current_size, 5);
    }

    #[tokio::test]
    async fn test_put_evicts_oldest_entry() {
        let cache = CacheStore::in_memory(100);
        cache.put(key("A"), Bytes::from(vec![0u8; 60])).await.unwrap();
        cache.put(key("B"), Bytes::from(vec![1u8; 50])).await.unwrap();

        assert!(!cache.contains(&key("A")).await);
        assert!(cache.contains(&key("B")).await);
        assert_eq!(cache.current_size().await, 50);
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_get_protects_entry_from_eviction() {
        let cache = CacheStore::in_memory(100);
        cache.put(key("A"), Bytes::from(vec![0u8; 40])).await.unwrap();
        cache.put(key("B"), Bytes::from(vec![0u8; 40])).await.unwrap();

        // A becomes most recently used, so B is next in line
        assert!(cache.get(&key("A")).await.unwrap().is_some());
        cache.put(key("C"), Bytes::from(vec![0u8; 40])).await.unwrap();

        assert!(cache.contains(&key("A")).await);
        assert!(!cache.contains(&key("B")).await);
        assert!(cache.contains(&key("C")).await);
    }

    #[tokio::test]
    async fn test_replace_updates_size_and_recency() {
        let cache = CacheStore::in_memory(100);
        cache.put(key("A"), Bytes::from(vec![0u8; 30])).await.unwrap();
        cache.put(key("B"), Bytes::from(vec![0u8; 30])).await.unwrap();
        cache.put(key("A"), Bytes::from(vec![0u8; 10])).await.unwrap();

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.current_size().await, 40);
        let order: Vec<CacheKey> = cache.entries().await.into_iter().map(|(k, _)| k).collect();
        assert_eq!(order, vec![key("B"), key("A")]);
    }

    #[tokio::test]
    async fn test_oversized_value_is_refused() {
        let cache = CacheStore::in_memory(100);
        cache.put(key("small"), Bytes::from(vec![0u8; 20])).await.unwrap();
        cache.put(key("big"), Bytes::from(vec![0u8; 101])).await.unwrap();

        assert!(!cache.contains(&key("big")).await);
        // Refusal does not disturb existing entries
        assert!(cache.contains(&key("small")).await);
        assert_eq!(cache.current_size().await, 20);
    }

    #[tokio::test]
    async fn test_oversized_replacement_drops_stale_entry() {
        let cache = CacheStore::in_memory(100);
        cache.put(key("A"), Bytes::from(vec![0u8; 20])).await.unwrap();
        cache.put(key("A"), Bytes::from(vec![0u8; 200])).await.unwrap();

        assert!(cache.get(&key("A")).await.unwrap().is_none());
        assert_eq!(cache.current_size().await, 0);
    }

    #[tokio::test]
    async fn test_value_exactly_at_capacity_is_kept() {
        let cache = CacheStore::in_memory(100);
        cache.put(key("A"), Bytes::from(vec![0u8; 50])).await.unwrap();
        cache.put(key("B"), Bytes::from(vec![0u8; 100])).await.unwrap();

        assert_eq!(cache.len().await, 1);
        assert!(cache.contains(&key("B")).await);
        assert_eq!(cache.current_size().await, 100);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = CacheStore::in_memory(1024);
        cache.put(key("A"), Bytes::from_static(b"a")).await.unwrap();
        cache.put(key("B"), Bytes::from_static(b"b")).await.unwrap();

        assert_eq!(cache.clear().await, 2);
        assert!(cache.is_empty().await);
        assert_eq!(cache.current_size().await, 0);
        assert!(cache.get(&key("A")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persistent_round_trip() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = CacheStore::open(1024, temp_dir.path()).await.unwrap();

        cache.put(key("A"), Bytes::from_static(b"persisted")).await.unwrap();
        assert!(temp_dir.path().join(key("A").as_str()).is_file());
        assert_eq!(
            cache.get(&key("A")).await.unwrap(),
            Some(Bytes::from_static(b"persisted"))
        );
    }

    #[tokio::test]
    async fn test_reopen_rehydrates_index() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        {
            let cache = CacheStore::open(1024, temp_dir.path()).await.unwrap();
            cache.put(key("A"), Bytes::from(vec![7u8; 100])).await.unwrap();
            cache.put(key("B"), Bytes::from(vec![8u8; 200])).await.unwrap();
        }

        let cache = CacheStore::open(1024, temp_dir.path()).await.unwrap();
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.current_size().await, 300);
        assert_eq!(
            cache.get(&key("B")).await.unwrap(),
            Some(Bytes::from(vec![8u8; 200]))
        );
    }

    #[tokio::test]
    async fn test_reopen_with_smaller_capacity_evicts() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        {
            let cache = CacheStore::open(1024, temp_dir.path()).await.unwrap();
            cache.put(key("A"), Bytes::from(vec![0u8; 100])).await.unwrap();
            cache.put(key("B"), Bytes::from(vec![0u8; 100])).await.unwrap();
        }

        let cache = CacheStore::open(150, temp_dir.path()).await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert!(cache.current_size().await <= 150);

        let files = std::fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(files, 1);
    }

    fn backdate(path: &Path, age: Duration) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - age)
            .unwrap();
    }

    fn tmp_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(TMP_SUFFIX))
            .collect()
    }

    #[tokio::test]
    async fn test_open_removes_temp_files_and_ignores_foreign_files() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let stale = temp_dir.path().join(format!("{}.123.0.tmp", key("A")));
        std::fs::write(&stale, b"partial").unwrap();
        backdate(&stale, STALE_TMP_AGE + Duration::from_secs(60));
        std::fs::write(temp_dir.path().join("README"), b"not a cache entry").unwrap();

        let cache = CacheStore::open(1024, temp_dir.path()).await.unwrap();
        assert!(!stale.exists());
        assert!(temp_dir.path().join("README").exists());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_open_keeps_fresh_temp_file_of_another_writer() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let final_path = temp_dir.path().join(key("A").as_str());
        let in_flight = temp_dir.path().join(format!("{}.424242.0.tmp", key("A")));
        std::fs::write(&in_flight, b"written by another process").unwrap();

        let cache = CacheStore::open(1024, temp_dir.path()).await.unwrap();
        assert!(in_flight.exists());
        assert!(cache.is_empty().await);

        // The other writer can still finish its rename
        std::fs::rename(&in_flight, &final_path).unwrap();
        let reopened = CacheStore::open(1024, temp_dir.path()).await.unwrap();
        assert_eq!(reopened.len().await, 1);
        assert_eq!(
            reopened.get(&key("A")).await.unwrap(),
            Some(Bytes::from_static(b"written by another process"))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_open_tolerates_files_deleted_during_scan() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let names: Vec<String> = (0..300)
            .map(|i| key(&format!("obj-{}", i)).as_str().to_string())
            .collect();
        for name in &names {
            std::fs::write(temp_dir.path().join(name), b"0123456789").unwrap();
        }

        let dir = temp_dir.path().to_path_buf();
        let deleter = std::thread::spawn(move || {
            for name in names.iter().rev() {
                let _ = std::fs::remove_file(dir.join(name));
            }
        });

        let cache = CacheStore::open(1 << 20, temp_dir.path()).await.unwrap();
        deleter.join().unwrap();

        let total: u64 = cache.entries().await.iter().map(|(_, size)| size).sum();
        assert_eq!(cache.current_size().await, total);
        assert!(cache.len().await <= 300);
    }

    #[test]
    fn test_tmp_staleness_threshold() {
        let now = SystemTime::now();
        assert!(!is_stale(now, now));
        assert!(!is_stale(now, now - Duration::from_secs(60)));
        assert!(is_stale(now, now - STALE_TMP_AGE));
        // Modified in the future: the clock moved, keep the file
        assert!(!is_stale(now, now + Duration::from_secs(60)));
    }

    /// Hammer one cache from several worker threads and return it for checks
    async fn hammer(cache: Arc<CacheStore>) -> Arc<CacheStore> {
        let handles: Vec<_> = (0..8u64)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    for i in 0..50u64 {
                        let k = key(&format!("obj-{}", (worker * 7 + i) % 24));
                        let size = 10 + ((worker + i) % 5) as usize * 10;
                        match i % 10 {
                            9 if worker == 0 => {
                                cache.clear().await;
                            }
                            0..=5 => cache.put(k, Bytes::from(vec![worker as u8; size])).await.unwrap(),
                            _ => {
                                cache.get(&k).await.unwrap();
                            }
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        cache
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_access_keeps_size_invariants_in_memory() {
        let cache = hammer(Arc::new(CacheStore::in_memory(200))).await;

        let entries = cache.entries().await;
        let total: u64 = entries.iter().map(|(_, size)| size).sum();
        assert!(cache.current_size().await <= 200);
        assert_eq!(cache.current_size().await, total);
        assert_eq!(cache.len().await, entries.len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_access_keeps_size_invariants_on_disk() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = CacheStore::open(200, temp_dir.path()).await.unwrap();
        let cache = hammer(Arc::new(cache)).await;

        let entries = cache.entries().await;
        let total: u64 = entries.iter().map(|(_, size)| size).sum();
        let current = cache.current_size().await;
        assert!(current <= 200);
        assert_eq!(current, total);

        let on_disk: u64 = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().metadata().unwrap().len())
            .sum();
        assert_eq!(on_disk, current);
        assert!(tmp_files(temp_dir.path()).is_empty());

        for (k, size) in entries {
            let body = cache.get(&k).await.unwrap().unwrap();
            assert_eq!(body.len() as u64, size);
        }
    }

    #[tokio::test]
    async fn test_eviction_deletes_backing_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = CacheStore::open(100, temp_dir.path()).await.unwrap();
        cache.put(key("A"), Bytes::from(vec![0u8; 60])).await.unwrap();
        cache.put(key("B"), Bytes::from(vec![0u8; 50])).await.unwrap();

        assert!(!temp_dir.path().join(key("A").as_str()).exists());
        assert!(temp_dir.path().join(key("B").as_str()).exists());
    }

    #[tokio::test]
    async fn test_clear_deletes_backing_files() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = CacheStore::open(1024, temp_dir.path()).await.unwrap();
        cache.put(key("A"), Bytes::from_static(b"a")).await.unwrap();
        cache.put(key("B"), Bytes::from_static(b"b")).await.unwrap();

        cache.clear().await;
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_vanished_file_is_a_miss() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = CacheStore::open(1024, temp_dir.path()).await.unwrap();
        cache.put(key("A"), Bytes::from_static(b"gone soon")).await.unwrap();

        std::fs::remove_file(temp_dir.path().join(key("A").as_str())).unwrap();

        assert!(cache.get(&key("A")).await.unwrap().is_none());
        assert!(cache.is_empty().await);
        assert_eq!(cache.current_size().await, 0);
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_index_untouched() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = CacheStore::open(1024, temp_dir.path()).await.unwrap();

        // A non-empty directory where the entry file should go blocks the rename
        let blocker = temp_dir.path().join(key("A").as_str());
        std::fs::create_dir(&blocker).unwrap();
        std::fs::write(blocker.join("occupied"), b"x").unwrap();

        let result = cache.put(key("A"), Bytes::from_static(b"data")).await;
        assert!(matches!(result, Err(ProxyError::CacheIoError(_))));
        assert!(cache.is_empty().await);
        assert_eq!(cache.current_size().await, 0);

        assert!(tmp_files(temp_dir.path()).is_empty());
    }
}
