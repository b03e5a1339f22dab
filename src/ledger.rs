//! Progress Store for bulk indexing.
//!
//! A per-release set of source files that were fully indexed, persisted as
//! `{ "17.0": ["/abs/path/a.md", ...] }`. The ledger only grows during a
//! run. Saves are best-effort: a failed save is logged and the run goes on,
//! at the cost of reprocessing those files after a restart.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::persist::{read_json, write_json_atomic};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressLedger {
    done: BTreeMap<String, BTreeSet<String>>,
}

impl ProgressLedger {
    pub fn contains(&self, version: &str, path: &str) -> bool {
        self.done
            .get(version)
            .is_some_and(|paths| paths.contains(path))
    }

    /// Returns `false` if the entry was already present.
    pub fn insert(&mut self, version: &str, path: &str) -> bool {
        self.done
            .entry(version.to_string())
            .or_default()
            .insert(path.to_string())
    }

    /// `(version, completed file count)` pairs.
    pub fn counts(&self) -> Vec<(String, usize)> {
        self.done
            .iter()
            .map(|(version, paths)| (version.clone(), paths.len()))
            .collect()
    }
}

pub struct ProgressStore {
    path: PathBuf,
    ledger: ProgressLedger,
}

impl ProgressStore {
    /// Load the ledger. A missing file starts empty, and so does an
    /// unreadable one (with a warning).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ledger = match read_json::<ProgressLedger>(&path) {
            Ok(Some(ledger)) => ledger,
            Ok(None) => ProgressLedger::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable progress ledger");
                ProgressLedger::default()
            }
        };
        info!(path = %path.display(), "loaded progress ledger");
        Self { path, ledger }
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    pub fn is_done(&self, version: &str, path: &str) -> bool {
        self.ledger.contains(version, path)
    }

    /// Record a finished file and save right away.
    pub fn mark_done(&mut self, version: &str, path: &str) {
        if self.ledger.insert(version, path) {
            if let Err(e) = self.save() {
                warn!(path = %self.path.display(), error = %e, "failed to save progress ledger");
            }
        }
    }

    /// Final save at the end of a run, whatever its outcome.
    pub fn flush(&self) {
        if let Err(e) = self.save() {
            warn!(path = %self.path.display(), error = %e, "failed to save progress ledger");
        }
    }

    fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.ledger)
    }
}
