//! Change detection against the cached snapshot.
//!
//! Walks `<raw>/versions/<label>/content` for every configured release,
//! fingerprints each source file, and classifies paths as added, modified,
//! or removed relative to the previous [`CacheSnapshot`].
//!
//! An empty previous snapshot means first run: nothing is classified, and
//! the caller stores the fresh scan as the baseline instead of reprocessing
//! a pre-existing corpus.

use std::collections::BTreeSet;
use std::path::PathBuf;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cache::CacheSnapshot;
use crate::error::{IngestError, Result};
use crate::fingerprint::Fingerprint;
use crate::layout::SourceLayout;

/// Paths that differ between the cache and the current tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: BTreeSet<PathBuf>,
    pub modified: BTreeSet<PathBuf>,
    pub removed: BTreeSet<PathBuf>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Added and modified paths, in path order.
    pub fn to_index(&self) -> Vec<PathBuf> {
        self.added.union(&self.modified).cloned().collect()
    }
}

/// Outcome of one detection pass.
#[derive(Debug, Clone)]
pub struct Detection {
    pub changes: ChangeSet,
    /// Fingerprints of every matching file currently on disk.
    pub current: CacheSnapshot,
    /// True when the previous snapshot was empty and no diffing was done.
    pub bootstrap: bool,
    pub unchanged: usize,
}

/// Compare two snapshots.
///
/// Returns the change set plus the number of unchanged paths.
pub fn classify(previous: &CacheSnapshot, current: &CacheSnapshot) -> (ChangeSet, usize) {
    let mut changes = ChangeSet::default();
    let mut unchanged = 0;

    for (path, fingerprint) in current.iter() {
        match previous.get(path) {
            None => {
                changes.added.insert(PathBuf::from(path));
            }
            Some(old) if old != fingerprint => {
                changes.modified.insert(PathBuf::from(path));
            }
            Some(_) => unchanged += 1,
        }
    }
    for (path, _) in previous.iter() {
        if !current.contains(path) {
            changes.removed.insert(PathBuf::from(path));
        }
    }

    (changes, unchanged)
}

pub struct ChangeDetector<'a> {
    layout: &'a SourceLayout,
    matcher: GlobSet,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(layout: &'a SourceLayout) -> Result<Self> {
        let pattern = format!("**/*.{}", layout.extension());
        let matcher = build_globset(&[pattern])?;
        Ok(Self { layout, matcher })
    }

    /// Every matching source file of every configured release, in walk order.
    pub fn list_sources(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for version in self.layout.versions() {
            let root = self.layout.raw_content_dir(version);
            if !root.exists() {
                warn!(version = %version, root = %root.display(), "release tree missing, skipping");
                continue;
            }

            for entry in WalkDir::new(&root).sort_by_file_name() {
                let entry = entry.map_err(|e| walk_error(&root, e))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let relative = path.strip_prefix(&root).unwrap_or(path);
                if self.matcher.is_match(relative) {
                    files.push(path.to_path_buf());
                }
            }
        }

        Ok(files)
    }

    /// Fingerprint every matching file of every configured release.
    pub fn scan(&self) -> Result<CacheSnapshot> {
        let mut snapshot = CacheSnapshot::new();
        for path in self.list_sources()? {
            let fingerprint = Fingerprint::of_file(&path)?;
            snapshot.insert(path.to_string_lossy().into_owned(), fingerprint);
        }
        Ok(snapshot)
    }

    pub fn detect(&self, previous: &CacheSnapshot) -> Result<Detection> {
        let current = self.scan()?;
        info!(files = current.len(), "scan complete");

        if previous.is_empty() {
            info!("no previous cache; recording baseline without processing files");
            return Ok(Detection {
                changes: ChangeSet::default(),
                current,
                bootstrap: true,
                unchanged: 0,
            });
        }

        let (changes, unchanged) = classify(previous, &current);
        for path in &changes.added {
            debug!(path = %path.display(), "new file");
        }
        for path in &changes.modified {
            debug!(path = %path.display(), "modified file");
        }
        for path in &changes.removed {
            debug!(path = %path.display(), "removed file");
        }
        info!(
            unchanged,
            added = changes.added.len(),
            modified = changes.modified.len(),
            removed = changes.removed.len(),
            "change detection complete"
        );

        Ok(Detection {
            changes,
            current,
            bootstrap: false,
            unchanged,
        })
    }
}

pub(crate) fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| IngestError::Config(format!("bad pattern '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| IngestError::Config(e.to_string()))
}

pub(crate) fn walk_error(root: &std::path::Path, err: walkdir::Error) -> IngestError {
    let path = err
        .path()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| root.to_path_buf());
    match err.into_io_error() {
        Some(io) => IngestError::io(path, io),
        None => IngestError::InvalidPath(format!("filesystem loop at {}", path.display())),
    }
}
