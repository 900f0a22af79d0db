//! Per-path change tracking.
//!
//! Each tracked path moves through `Unknown -> Fresh -> Cached -> Stale -> Cached`.
//! The detector only records states; it never touches analysis results. A stale
//! path stays stale until its re-analysis is recorded with [`ChangeDetector::mark_cached`].

use crate::fingerprint::Fingerprint;
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    /// Never fingerprinted
    Unknown,
    /// Fingerprinted, no result stored yet
    Fresh,
    Cached,
    /// Content changed since the stored result was produced
    Stale,
}

#[derive(Debug, Clone)]
struct Tracked {
    fingerprint: Fingerprint,
    /// Fingerprint the stored result was produced from
    stored: Option<Fingerprint>,
    state: FileState,
}

#[derive(Debug, Default)]
pub struct ChangeDetector {
    include_mtime: bool,
    tracked: BTreeMap<PathBuf, Tracked>,
}

impl ChangeDetector {
    pub fn new(include_mtime: bool) -> Self {
        Self {
            include_mtime,
            tracked: BTreeMap::new(),
        }
    }

    pub fn state(&self, path: &Path) -> FileState {
        self.tracked
            .get(path)
            .map(|t| t.state)
            .unwrap_or(FileState::Unknown)
    }

    pub fn fingerprint(&self, path: &Path) -> Option<&Fingerprint> {
        self.tracked.get(path).map(|t| &t.fingerprint)
    }

    /// Fingerprint of the last stored result, which may differ from the current one
    pub fn stored_fingerprint(&self, path: &Path) -> Option<&Fingerprint> {
        self.tracked.get(path).and_then(|t| t.stored.as_ref())
    }

    /// Record a freshly computed fingerprint and return the resulting state
    pub fn observe(&mut self, path: &Path, fingerprint: Fingerprint) -> FileState {
        match self.tracked.get_mut(path) {
            None => {
                self.tracked.insert(
                    path.to_path_buf(),
                    Tracked {
                        fingerprint,
                        stored: None,
                        state: FileState::Fresh,
                    },
                );
                FileState::Fresh
            }
            Some(tracked) if tracked.fingerprint == fingerprint => tracked.state,
            Some(tracked) => {
                debug!("{} changed", path.display());
                tracked.fingerprint = fingerprint;
                if tracked.state == FileState::Cached {
                    tracked.state = FileState::Stale;
                }
                tracked.state
            }
        }
    }

    /// A result for the current fingerprint has been stored
    pub fn mark_cached(&mut self, path: &Path) {
        if let Some(tracked) = self.tracked.get_mut(path) {
            tracked.stored = Some(tracked.fingerprint.clone());
            tracked.state = FileState::Cached;
        }
    }

    /// Stop tracking paths that are no longer part of the scan
    pub fn retain(&mut self, keep: impl Fn(&Path) -> bool) {
        self.tracked.retain(|path, _| keep(path));
    }

    /// Re-fingerprint every tracked path; returns the paths that became stale.
    ///
    /// A path that can no longer be read is stale as well.
    pub fn poll(&mut self) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        for (path, tracked) in self.tracked.iter_mut() {
            let current = Fingerprint::from_file(path, self.include_mtime)
                .ok()
                .map(|(fp, _)| fp);
            if current.as_ref() == Some(&tracked.fingerprint) {
                continue;
            }
            if let Some(fp) = current {
                tracked.fingerprint = fp;
            }
            if tracked.state != FileState::Stale {
                tracked.state = FileState::Stale;
                changed.push(path.clone());
            }
        }
        if !changed.is_empty() {
            info!("{} file(s) changed", changed.len());
        }
        changed
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn reset(&mut self) {
        self.tracked.clear();
    }
}
