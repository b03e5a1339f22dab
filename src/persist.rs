//! Crash-safe JSON files.
//!
//! Writes go to a sibling `*.tmp` file which is flushed to disk and then
//! renamed over the target, so readers see either the old or the new
//! content and never a torn write.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{IngestError, Result};

/// Read a JSON file. A missing file yields `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(IngestError::io(path, e)),
    };
    let value = serde_json::from_slice(&bytes).map_err(|e| IngestError::json(path, e))?;
    Ok(Some(value))
}

/// Atomically replace `path` with the JSON encoding of `value`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
    }

    let bytes = serde_json::to_vec(value).map_err(|e| IngestError::json(path, e))?;
    let tmp = tmp_path(path);
    {
        let mut file = File::create(&tmp).map_err(|e| IngestError::io(&tmp, e))?;
        file.write_all(&bytes).map_err(|e| IngestError::io(&tmp, e))?;
        file.sync_all().map_err(|e| IngestError::io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| IngestError::io(path, e))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
