//! Per-file analysis cache.
//!
//! Entries are keyed by `"<path>@<fingerprint>"` and hold the whole [`FileAnalysis`]
//! of that content. A store only needs get/set/delete/clear; each `set` replaces one
//! key as a unit, so a fingerprint is never paired with another content's result.
//!
//! Next to the entries the manager keeps a manifest of the latest fingerprint per
//! path. It lives in the store itself, so a later process can still evict the entry
//! an edit superseded or the entry of a file that was deleted.

use crate::analysis::FileAnalysis;
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// External key/value persistence for cache entries
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

fn poisoned<T>(_: T) -> Error {
    Error::Cache("memory store lock poisoned".to_string())
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.write().map_err(poisoned)?.clear();
        Ok(())
    }
}

/// One JSON file per key under a directory.
///
/// File names are the blake3 hash of the key. Writes go to a temporary file that is
/// then renamed over the entry.
pub struct FileStore {
    dir: PathBuf,
}

const ENTRY_EXTENSION: &str = "json";

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::Cache(format!("cannot create cache dir {}: {}", dir.display(), e))
        })?;
        debug!("Using file cache at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let name = blake3::hash(key.as_bytes()).to_hex();
        self.dir.join(format!("{}.{}", name, ENTRY_EXTENSION))
    }
}

impl CacheStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.entry_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.entry_path(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let ours = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == ENTRY_EXTENSION || e == "tmp");
            if ours && path.is_file() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

/// A stored analysis result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub created_at_secs: u64,
    pub ttl_secs: Option<u64>,
    pub payload: FileAnalysis,
}

impl CacheEntry {
    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.ttl_secs
            .is_some_and(|ttl| now_secs >= self.created_at_secs.saturating_add(ttl))
    }
}

pub fn cache_key(path: &Path, fingerprint: &Fingerprint) -> String {
    format!("{}@{}", path.display(), fingerprint)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Store key of the manifest; entry keys always contain `@`
const MANIFEST_KEY: &str = "manifest";

type Manifest = BTreeMap<PathBuf, Fingerprint>;

fn load_manifest(store: &dyn CacheStore) -> Manifest {
    let bytes = match store.get(MANIFEST_KEY) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Manifest::new(),
        Err(e) => {
            warn!("Could not read cache manifest: {}", e);
            return Manifest::new();
        }
    };
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        warn!("Ignoring unreadable cache manifest: {}", e);
        Manifest::new()
    })
}

/// Typed access to a [`CacheStore`]
pub struct CacheManager {
    store: Box<dyn CacheStore>,
    ttl_secs: Option<u64>,
    manifest: Mutex<Manifest>,
}

impl CacheManager {
    pub fn new(store: Box<dyn CacheStore>, ttl_secs: Option<u64>) -> Self {
        let manifest = Mutex::new(load_manifest(store.as_ref()));
        Self {
            store,
            ttl_secs,
            manifest,
        }
    }

    /// Paths with a live entry, each with its latest fingerprint
    pub fn tracked(&self) -> Result<Vec<(PathBuf, Fingerprint)>> {
        let manifest = self.manifest.lock().map_err(poisoned)?;
        Ok(manifest
            .iter()
            .map(|(p, f)| (p.clone(), f.clone()))
            .collect())
    }

    fn persist(&self, manifest: &Manifest) -> Result<()> {
        self.store.set(MANIFEST_KEY, &serde_json::to_vec(manifest)?)
    }

    /// Cached analysis for exactly this content, if any.
    ///
    /// Expired and unreadable entries are deleted and reported as misses. An entry
    /// whose stored path or fingerprint differs from the requested one is never served.
    pub fn lookup(&self, path: &Path, fingerprint: &Fingerprint) -> Result<Option<FileAnalysis>> {
        self.lookup_at(path, fingerprint, now_secs())
    }

    fn lookup_at(
        &self,
        path: &Path,
        fingerprint: &Fingerprint,
        now: u64,
    ) -> Result<Option<FileAnalysis>> {
        let key = cache_key(path, fingerprint);
        let Some(bytes) = self.store.get(&key)? else {
            return Ok(None);
        };
        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Dropping unreadable cache entry for {}: {}", path.display(), e);
                self.store.delete(&key)?;
                return Ok(None);
            }
        };
        if entry.fingerprint != *fingerprint || entry.path != path {
            debug!("Cache entry for {} does not match its key", path.display());
            return Ok(None);
        }
        if entry.is_expired(now) {
            debug!("Cache entry for {} expired", path.display());
            self.store.delete(&key)?;
            return Ok(None);
        }
        Ok(Some(entry.payload))
    }

    pub fn store(&self, analysis: &FileAnalysis) -> Result<()> {
        self.store_at(analysis, now_secs())
    }

    fn store_at(&self, analysis: &FileAnalysis, now: u64) -> Result<()> {
        let entry = CacheEntry {
            path: analysis.path.clone(),
            fingerprint: analysis.fingerprint.clone(),
            created_at_secs: now,
            ttl_secs: self.ttl_secs,
            payload: analysis.clone(),
        };
        let bytes = serde_json::to_vec(&entry)?;
        self.store
            .set(&cache_key(&analysis.path, &analysis.fingerprint), &bytes)?;

        let mut manifest = self.manifest.lock().map_err(poisoned)?;
        let previous = manifest.insert(analysis.path.clone(), analysis.fingerprint.clone());
        if let Some(previous) = previous.filter(|p| *p != analysis.fingerprint) {
            debug!("Evicting superseded cache entry for {}", analysis.path.display());
            self.store.delete(&cache_key(&analysis.path, &previous))?;
        }
        self.persist(&manifest)
    }

    pub fn invalidate(&self, path: &Path, fingerprint: &Fingerprint) -> Result<()> {
        self.store.delete(&cache_key(path, fingerprint))?;
        let mut manifest = self.manifest.lock().map_err(poisoned)?;
        if manifest.get(path) == Some(fingerprint) {
            manifest.remove(path);
            self.persist(&manifest)?;
        }
        Ok(())
    }

    /// Evict the entries of every path `keep` rejects; returns how many went
    pub fn retain_paths(&self, keep: impl Fn(&Path) -> bool) -> Result<usize> {
        let mut manifest = self.manifest.lock().map_err(poisoned)?;
        let gone: Vec<(PathBuf, Fingerprint)> = manifest
            .iter()
            .filter(|(path, _)| !keep(path))
            .map(|(p, f)| (p.clone(), f.clone()))
            .collect();
        if gone.is_empty() {
            return Ok(0);
        }
        for (path, fingerprint) in &gone {
            debug!("Evicting cache entry for removed file {}", path.display());
            self.store.delete(&cache_key(path, fingerprint))?;
            manifest.remove(path);
        }
        self.persist(&manifest)?;
        Ok(gone.len())
    }

    /// Drop every entry
    pub fn reset(&self) -> Result<()> {
        debug!("Clearing analysis cache");
        self.store.clear()?;
        self.manifest.lock().map_err(poisoned)?.clear();
        Ok(())
    }
}
