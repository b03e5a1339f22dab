//! Cache Store: the persisted path → fingerprint snapshot.
//!
//! The snapshot records the last state that was successfully indexed.
//! Replacing it is the only mutation and is atomic (see [`crate::persist`]).
//! Rollback is a replace with the pre-batch snapshot.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::persist::{read_json, write_json_atomic};

/// Mapping from absolute source path to content fingerprint.
///
/// Serializes as a flat JSON object `{ "<path>": "<hex>" }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheSnapshot {
    entries: BTreeMap<String, Fingerprint>,
}

impl CacheSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, fingerprint: Fingerprint) {
        self.entries.insert(path.into(), fingerprint);
    }

    pub fn get(&self, path: &str) -> Option<&Fingerprint> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Fingerprint> {
        self.entries.iter()
    }
}

/// File-backed owner of the live [`CacheSnapshot`].
///
/// Single writer: concurrent processes must not share a cache file.
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the live snapshot. A missing file is an empty snapshot; a corrupt
    /// one is an error, since treating it as empty would trigger bootstrap
    /// and hide every pending change.
    pub fn read(&self) -> Result<CacheSnapshot> {
        let snapshot: CacheSnapshot = read_json(&self.path)?.unwrap_or_default();
        info!(
            path = %self.path.display(),
            entries = snapshot.len(),
            "loaded file cache"
        );
        Ok(snapshot)
    }

    pub fn replace(&self, snapshot: &CacheSnapshot) -> Result<()> {
        write_json_atomic(&self.path, snapshot)?;
        info!(
            path = %self.path.display(),
            entries = snapshot.len(),
            "saved file cache"
        );
        Ok(())
    }

    /// Restore a prior snapshot after a failed batch.
    pub fn rollback(&self, prior: &CacheSnapshot) -> Result<()> {
        warn!(
            path = %self.path.display(),
            entries = prior.len(),
            "restoring file cache to pre-batch snapshot"
        );
        self.replace(prior)
    }
}
