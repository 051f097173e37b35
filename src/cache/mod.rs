//! Content-addressed build cache.
//!
//! Resizing images and running asset transformers is the slow part of a
//! build. This module remembers their results across runs, keyed by what
//! went into them rather than by where the output ends up, so renaming or
//! moving a page never invalidates the images and stylesheets it uses.
//!
//! # Layout
//!
//! ```text
//! .sitegraph-cache/
//! ├── image-info.json        region: source fingerprint → dimensions, MIME type
//! ├── image-resize.json      region: source + ordered transforms → blob
//! ├── asset-pipeline.json    region: asset + ordered transformers → blob
//! └── blobs/
//!     └── 3f9a0c1e2d4b5a6f-photo.jpg
//! ```
//!
//! Each region file is a versioned JSON map from key fingerprint to entry.
//! A missing, corrupt or outdated file loads as an empty region, so a format
//! change only costs one cold build.
//!
//! ## Keys
//!
//! A key is any `Serialize` value. Its fingerprint is the SHA-256 of the
//! region name and the key's JSON encoding, so field and list order matter:
//! resizing then cropping is a different key than cropping then resizing.
//!
//! ## Blobs
//!
//! Values that own a file name it through [`CacheValue::blob`]. Blobs are
//! named after their content, so identical outputs share one file and a
//! blob left behind by a deleted entry is harmless; [`CacheStore::collect_garbage`]
//! removes such orphans. An entry whose blob disappeared is dropped on
//! lookup and recomputed.
//!
//! ## Concurrency
//!
//! [`Region::get_or_compute`] holds a per-key lock while computing, so
//! parallel renderers asking for the same resize run it once and share the
//! result.

pub mod blob;
pub mod image;
pub mod pipeline;

pub use blob::BlobStore;

use crate::imaging::BackendError;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Version of the region file format. Bump to invalidate every cache.
const REGION_VERSION: u32 = 1;

/// Subdirectory holding blobs.
const BLOB_DIR: &str = "blobs";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache entry could not be encoded: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("{0}")]
    Compute(String),
}

pub(crate) fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A value stored in a region.
pub trait CacheValue: Serialize + DeserializeOwned {
    /// Blob this value depends on. A hit whose blob is gone is a miss.
    fn blob(&self) -> Option<&str> {
        None
    }
}

/// Fingerprint of `key` within `region`.
pub fn fingerprint<K: Serialize + ?Sized>(region: &str, key: &K) -> Result<String, CacheError> {
    let encoded = serde_json::to_vec(key)?;
    let mut hasher = Sha256::new();
    hasher.update(region.as_bytes());
    hasher.update(b"\0");
    hasher.update(&encoded);
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blob: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegionFile {
    version: u32,
    entries: BTreeMap<String, StoredEntry>,
}

#[derive(Debug, Default)]
struct RegionState {
    entries: BTreeMap<String, StoredEntry>,
    dirty: bool,
    stats: CacheStats,
}

/// Lookup counters for one region.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
    /// Misses caused by an entry whose blob was gone.
    pub stale: u32,
    pub computed: u32,
}

impl CacheStats {
    pub fn total(&self) -> u32 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cached, {} computed ({} lookups)",
            self.hits,
            self.computed,
            self.total()
        )?;
        if self.stale > 0 {
            write!(f, ", {} stale", self.stale)?;
        }
        Ok(())
    }
}

/// Outcome of [`CacheStore::collect_garbage`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub kept: usize,
    pub removed: usize,
}

/// Persistent store of cached results, partitioned into named regions.
pub struct CacheStore {
    dir: PathBuf,
    /// Ignore persisted entries (`--no-cache`).
    fresh: bool,
    blobs: BlobStore,
    regions: Mutex<HashMap<String, RegionState>>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl CacheStore {
    /// Open the store in `dir`, reusing whatever earlier builds left there.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Self::open_with(dir.into(), false)
    }

    /// Open the store in `dir` but start every region empty. Results are
    /// still written back, replacing the old regions on flush.
    pub fn open_fresh(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Self::open_with(dir.into(), true)
    }

    fn open_with(dir: PathBuf, fresh: bool) -> Result<Self, CacheError> {
        let blob_dir = dir.join(BLOB_DIR);
        fs::create_dir_all(&blob_dir).map_err(io_error(&blob_dir))?;
        debug!(dir = %dir.display(), fresh, "opened build cache");
        Ok(Self {
            blobs: BlobStore::new(blob_dir),
            dir,
            fresh,
            regions: Mutex::new(HashMap::new()),
            in_flight: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Typed view of one region.
    pub fn region<K: Serialize, V: CacheValue>(&self, name: &'static str) -> Region<'_, K, V> {
        Region {
            store: self,
            name,
            _marker: PhantomData,
        }
    }

    fn region_file(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    fn load_region(&self, name: &str) -> RegionState {
        if self.fresh {
            return RegionState::default();
        }
        let path = self.region_file(name);
        let Ok(content) = fs::read_to_string(&path) else {
            return RegionState::default();
        };
        match serde_json::from_str::<RegionFile>(&content) {
            Ok(file) if file.version == REGION_VERSION => RegionState {
                entries: file.entries,
                ..RegionState::default()
            },
            Ok(file) => {
                debug!(region = name, version = file.version, "discarding outdated cache region");
                RegionState::default()
            }
            Err(e) => {
                warn!(region = name, error = %e, "discarding unreadable cache region");
                RegionState::default()
            }
        }
    }

    fn with_region<T>(&self, name: &str, f: impl FnOnce(&mut RegionState) -> T) -> T {
        let mut regions = self.regions.lock();
        let state = regions
            .entry(name.to_string())
            .or_insert_with(|| self.load_region(name));
        f(state)
    }

    fn lookup<V: CacheValue>(&self, region: &str, fp: &str) -> Option<V> {
        self.with_region(region, |state| {
            let Some(entry) = state.entries.get(fp) else {
                state.stats.misses += 1;
                return None;
            };
            if let Some(blob) = &entry.blob
                && !self.blobs.exists(blob)
            {
                debug!(region, blob = %blob, "cached blob is gone, recomputing");
                state.entries.remove(fp);
                state.dirty = true;
                state.stats.misses += 1;
                state.stats.stale += 1;
                return None;
            }
            match serde_json::from_value::<V>(entry.value.clone()) {
                Ok(value) => {
                    trace!(region, fp, "cache hit");
                    state.stats.hits += 1;
                    Some(value)
                }
                Err(e) => {
                    debug!(region, error = %e, "cached value no longer decodes");
                    state.entries.remove(fp);
                    state.dirty = true;
                    state.stats.misses += 1;
                    None
                }
            }
        })
    }

    fn insert<V: CacheValue>(&self, region: &str, fp: String, value: &V) -> Result<(), CacheError> {
        let entry = StoredEntry {
            value: serde_json::to_value(value)?,
            blob: value.blob().map(str::to_string),
        };
        self.with_region(region, |state| {
            state.entries.insert(fp, entry);
            state.dirty = true;
        });
        Ok(())
    }

    fn record_computed(&self, region: &str) {
        self.with_region(region, |state| state.stats.computed += 1);
    }

    /// Counters of every region touched so far, by region name.
    pub fn stats(&self) -> BTreeMap<String, CacheStats> {
        self.regions
            .lock()
            .iter()
            .map(|(name, state)| (name.clone(), state.stats))
            .collect()
    }

    /// Write every modified region back to disk. Each file is replaced
    /// atomically.
    pub fn flush(&self) -> Result<(), CacheError> {
        let mut regions = self.regions.lock();
        for (name, state) in regions.iter_mut().filter(|(_, s)| s.dirty) {
            let path = self.region_file(name);
            let tmp = self.dir.join(format!(".{name}.json.tmp"));
            let file = RegionFile {
                version: REGION_VERSION,
                entries: state.entries.clone(),
            };
            let json = serde_json::to_string_pretty(&file)?;
            fs::write(&tmp, json).map_err(io_error(&tmp))?;
            fs::rename(&tmp, &path).map_err(io_error(&path))?;
            state.dirty = false;
            debug!(region = %name, entries = state.entries.len(), "flushed cache region");
        }
        Ok(())
    }

    /// Delete blobs no entry of any region refers to.
    pub fn collect_garbage(&self) -> Result<GcStats, CacheError> {
        for entry in fs::read_dir(&self.dir).map_err(io_error(&self.dir))? {
            let entry = entry.map_err(io_error(&self.dir))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if let Some(region) = file_name.strip_suffix(".json")
                && !file_name.starts_with('.')
            {
                self.with_region(region, |_| ());
            }
        }
        let referenced: BTreeSet<String> = self
            .regions
            .lock()
            .values()
            .flat_map(|state| state.entries.values())
            .filter_map(|entry| entry.blob.clone())
            .collect();

        let mut stats = GcStats::default();
        for name in self.blobs.names()? {
            if referenced.contains(&name) {
                stats.kept += 1;
            } else {
                self.blobs.remove(&name)?;
                stats.removed += 1;
            }
        }
        debug!(kept = stats.kept, removed = stats.removed, "collected cache garbage");
        Ok(stats)
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "failed to flush build cache");
        }
    }
}

/// Typed view of a region: keys of type `K` map to values of type `V`.
pub struct Region<'a, K, V> {
    store: &'a CacheStore,
    name: &'static str,
    _marker: PhantomData<fn(&K) -> V>,
}

impl<K: Serialize, V: CacheValue> Region<'_, K, V> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, key: &K) -> Result<Option<V>, CacheError> {
        let fp = fingerprint(self.name, key)?;
        Ok(self.store.lookup(self.name, &fp))
    }

    pub fn put(&self, key: &K, value: &V) -> Result<(), CacheError> {
        let fp = fingerprint(self.name, key)?;
        self.store.insert(self.name, fp, value)
    }

    /// Cached value for `key`, or the result of `compute` (stored for next
    /// time). Concurrent callers with an equal key wait for the first one
    /// instead of computing again.
    pub fn get_or_compute<E>(&self, key: &K, compute: impl FnOnce() -> Result<V, E>) -> Result<V, E>
    where
        E: From<CacheError>,
    {
        let fp = fingerprint(self.name, key)?;
        let slot = format!("{}/{fp}", self.name);
        let lock = self
            .store
            .in_flight
            .entry(slot.clone())
            .or_default()
            .value()
            .clone();
        let result = {
            let _guard = lock.lock();
            self.lookup_or_compute(fp, compute)
        };
        drop(lock);
        // Nobody else is waiting once only the map holds the lock.
        self.store
            .in_flight
            .remove_if(&slot, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    fn lookup_or_compute<E>(&self, fp: String, compute: impl FnOnce() -> Result<V, E>) -> Result<V, E>
    where
        E: From<CacheError>,
    {
        if let Some(value) = self.store.lookup(self.name, &fp) {
            return Ok(value);
        }
        let value = compute()?;
        self.store.insert(self.name, fp, &value)?;
        self.store.record_computed(self.name);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Answer(u32);
    impl CacheValue for Answer {}

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Stored {
        blob: String,
    }
    impl CacheValue for Stored {
        fn blob(&self) -> Option<&str> {
            Some(&self.blob)
        }
    }

    // =========================================================================
    // Keys
    // =========================================================================

    #[test]
    fn fingerprint_depends_on_order() {
        let a = fingerprint("r", &vec!["resize", "crop"]).unwrap();
        let b = fingerprint("r", &vec!["crop", "resize"]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_depends_on_region() {
        assert_ne!(
            fingerprint("a", &1u32).unwrap(),
            fingerprint("b", &1u32).unwrap()
        );
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    #[test]
    fn put_then_get() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::open(tmp.path()).unwrap();
        let region = store.region::<String, Answer>("answers");
        assert_eq!(region.get(&"q".to_string()).unwrap(), None);
        region.put(&"q".to_string(), &Answer(42)).unwrap();
        assert_eq!(region.get(&"q".to_string()).unwrap(), Some(Answer(42)));

        let stats = store.stats()["answers"];
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn get_or_compute_runs_once() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::open(tmp.path()).unwrap();
        let region = store.region::<u32, Answer>("answers");
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let value = region
                .get_or_compute(&7, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CacheError>(Answer(49))
                })
                .unwrap();
            assert_eq!(value, Answer(49));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.stats()["answers"].computed, 1);
    }

    #[test]
    fn get_or_compute_is_single_flight_across_threads() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::open(tmp.path()).unwrap();
        let calls = AtomicU32::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let region = store.region::<&str, Answer>("answers");
                    let value = region
                        .get_or_compute(&"slow", || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok::<_, CacheError>(Answer(1))
                        })
                        .unwrap();
                    assert_eq!(value, Answer(1));
                });
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.in_flight.is_empty());
    }

    #[test]
    fn key_locks_are_released_after_compute() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::open(tmp.path()).unwrap();
        let region = store.region::<u32, Answer>("answers");
        for key in 0..5 {
            region.get_or_compute(&key, || Ok::<_, CacheError>(Answer(key))).unwrap();
        }
        let _ = region.get_or_compute(&9, || Err(CacheError::Compute("boom".into())));
        assert!(store.in_flight.is_empty());
        assert_eq!(region.get(&3).unwrap(), Some(Answer(3)));
    }

    #[test]
    fn failed_compute_is_not_cached() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::open(tmp.path()).unwrap();
        let region = store.region::<u32, Answer>("answers");
        let err = region
            .get_or_compute(&1, || Err(CacheError::Compute("boom".into())))
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(region.get(&1).unwrap(), None);
    }

    #[test]
    fn missing_blob_is_a_miss() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::open(tmp.path()).unwrap();
        let blob = store.blobs().store_bytes("out.txt", b"data").unwrap();
        let region = store.region::<u32, Stored>("files");
        region.put(&1, &Stored { blob: blob.clone() }).unwrap();
        assert!(region.get(&1).unwrap().is_some());

        fs::remove_file(store.blobs().path(&blob)).unwrap();
        assert_eq!(region.get(&1).unwrap(), None);
        let stats = store.stats()["files"];
        assert_eq!(stats.stale, 1);
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    #[test]
    fn flush_persists_regions() {
        let tmp = TempDir::new().unwrap();
        {
            let store = CacheStore::open(tmp.path()).unwrap();
            store
                .region::<u32, Answer>("answers")
                .put(&1, &Answer(10))
                .unwrap();
            store.flush().unwrap();
        }
        assert!(tmp.path().join("answers.json").exists());
        let store = CacheStore::open(tmp.path()).unwrap();
        assert_eq!(
            store.region::<u32, Answer>("answers").get(&1).unwrap(),
            Some(Answer(10))
        );
    }

    #[test]
    fn drop_flushes() {
        let tmp = TempDir::new().unwrap();
        {
            let store = CacheStore::open(tmp.path()).unwrap();
            store
                .region::<u32, Answer>("answers")
                .put(&1, &Answer(10))
                .unwrap();
        }
        let store = CacheStore::open(tmp.path()).unwrap();
        assert!(store.region::<u32, Answer>("answers").get(&1).unwrap().is_some());
    }

    #[test]
    fn fresh_store_ignores_persisted_entries() {
        let tmp = TempDir::new().unwrap();
        {
            let store = CacheStore::open(tmp.path()).unwrap();
            store
                .region::<u32, Answer>("answers")
                .put(&1, &Answer(10))
                .unwrap();
        }
        let store = CacheStore::open_fresh(tmp.path()).unwrap();
        assert_eq!(store.region::<u32, Answer>("answers").get(&1).unwrap(), None);
    }

    #[test]
    fn corrupt_region_loads_empty() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("answers.json"), "not json").unwrap();
        let store = CacheStore::open(tmp.path()).unwrap();
        assert_eq!(store.region::<u32, Answer>("answers").get(&1).unwrap(), None);
    }

    #[test]
    fn version_mismatch_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let fp = fingerprint("answers", &1u32).unwrap();
        let json = format!(r#"{{"version": 999, "entries": {{"{fp}": {{"value": 5}}}}}}"#);
        fs::write(tmp.path().join("answers.json"), json).unwrap();
        let store = CacheStore::open(tmp.path()).unwrap();
        assert_eq!(store.region::<u32, Answer>("answers").get(&1).unwrap(), None);
    }

    #[test]
    fn garbage_collection_removes_orphans() {
        let tmp = TempDir::new().unwrap();
        {
            let store = CacheStore::open(tmp.path()).unwrap();
            let kept = store.blobs().store_bytes("a.txt", b"kept").unwrap();
            store.blobs().store_bytes("b.txt", b"orphan").unwrap();
            store
                .region::<u32, Stored>("files")
                .put(&1, &Stored { blob: kept })
                .unwrap();
        }
        let store = CacheStore::open(tmp.path()).unwrap();
        let stats = store.collect_garbage().unwrap();
        assert_eq!(stats, GcStats { kept: 1, removed: 1 });
        assert!(store.region::<u32, Stored>("files").get(&1).unwrap().is_some());
    }

    #[test]
    fn stats_display() {
        let stats = CacheStats {
            hits: 3,
            misses: 2,
            stale: 1,
            computed: 2,
        };
        assert_eq!(stats.to_string(), "3 cached, 2 computed (5 lookups), 1 stale");
    }
}
