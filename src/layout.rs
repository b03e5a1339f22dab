//! Source tree layout and release versions.
//!
//! Raw sources live under `<raw>/versions/<label>/content/**/*.<ext>`; the
//! normalizer mirrors them to `<normalized>/versions/<label>/content/**/*.md`.
//! A [`Version`] is read from the segment after `versions` below the raw
//! root and scaled to an integer (`"17.0"` → `170`) for the index.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::{IngestError, Result};

const VERSIONS_DIR: &str = "versions";
const CONTENT_DIR: &str = "content";
const NORMALIZED_EXTENSION: &str = "md";

/// A documentation release, e.g. `17.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    /// Label as written in the tree (`"17.0"`).
    pub label: String,
    /// Integer-scaled value stored in the index (`170`).
    pub scaled: i64,
}

impl Version {
    pub fn parse(label: &str) -> Result<Self> {
        let trimmed = label.trim();
        let value: f64 = trimmed
            .parse()
            .map_err(|_| IngestError::InvalidVersion(label.to_string()))?;
        if !value.is_finite() || value < 0.0 {
            return Err(IngestError::InvalidVersion(label.to_string()));
        }
        Ok(Self {
            label: trimmed.to_string(),
            scaled: (value * 10.0).round() as i64,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Where raw and normalized documents live, and which releases to read.
#[derive(Debug, Clone)]
pub struct SourceLayout {
    raw_root: PathBuf,
    normalized_root: PathBuf,
    versions: Vec<Version>,
    extension: String,
}

impl SourceLayout {
    /// Roots are made absolute so cache keys stay stable across working
    /// directories.
    pub fn new(
        raw_root: impl AsRef<Path>,
        normalized_root: impl AsRef<Path>,
        versions: Vec<Version>,
        extension: &str,
    ) -> Result<Self> {
        Ok(Self {
            raw_root: absolute(raw_root.as_ref())?,
            normalized_root: absolute(normalized_root.as_ref())?,
            versions,
            extension: extension.trim_start_matches('.').to_string(),
        })
    }

    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// `<raw>/versions/<label>/content`
    pub fn raw_content_dir(&self, version: &Version) -> PathBuf {
        self.raw_root
            .join(VERSIONS_DIR)
            .join(&version.label)
            .join(CONTENT_DIR)
    }

    /// `<normalized>/versions/<label>`
    pub fn normalized_version_dir(&self, version: &Version) -> PathBuf {
        self.normalized_root.join(VERSIONS_DIR).join(&version.label)
    }

    /// `<normalized>/versions/<label>/content`
    pub fn normalized_content_dir(&self, version: &Version) -> PathBuf {
        self.normalized_version_dir(version).join(CONTENT_DIR)
    }

    /// Split a raw source path into its release and the path below that
    /// release's `content/` directory. Only segments under the raw root are
    /// read, so folder names above it never matter.
    pub fn locate_raw(&self, raw_path: &Path) -> Result<(Version, PathBuf)> {
        let outside = || {
            IngestError::InvalidPath(format!(
                "{} is outside {}",
                raw_path.display(),
                self.raw_root.join(VERSIONS_DIR).display()
            ))
        };
        let below_root = raw_path.strip_prefix(&self.raw_root).map_err(|_| outside())?;
        let mut components = below_root.components();
        match components.next() {
            Some(Component::Normal(dir)) if dir == VERSIONS_DIR => {}
            _ => return Err(outside()),
        }
        let label = match components.next() {
            Some(Component::Normal(label)) => label.to_string_lossy().into_owned(),
            _ => return Err(outside()),
        };
        let version = Version::parse(&label)?;
        let relative = raw_path
            .strip_prefix(self.raw_content_dir(&version))
            .map_err(|_| outside())?;
        if relative.as_os_str().is_empty() {
            return Err(outside());
        }
        Ok((version, relative.to_path_buf()))
    }

    /// Whether a path names a file inside this layout's raw tree.
    pub fn owns_raw(&self, raw_path: &Path) -> bool {
        self.locate_raw(raw_path).is_ok()
    }

    /// Map a raw source file to its normalized counterpart.
    pub fn normalized_path_for(&self, raw_path: &Path) -> Result<(Version, PathBuf)> {
        let (version, relative) = self.locate_raw(raw_path)?;
        let target = self
            .normalized_content_dir(&version)
            .join(relative)
            .with_extension(NORMALIZED_EXTENSION);
        Ok((version, target))
    }

    /// Identity of a normalized file inside its release tree, with `/`
    /// separators (`content/sales/index.md`). Used as the `filename` key for
    /// delete-by-match, so same-named files in different folders stay apart.
    pub fn document_key(&self, normalized_path: &Path, version: &Version) -> Result<String> {
        let base = self.normalized_version_dir(version);
        let relative = normalized_path.strip_prefix(&base).map_err(|_| {
            IngestError::InvalidPath(format!(
                "{} is outside {}",
                normalized_path.display(),
                base.display()
            ))
        })?;
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            return Err(IngestError::InvalidPath(format!(
                "{} is not a file inside {}",
                normalized_path.display(),
                base.display()
            )));
        }
        Ok(parts.join("/"))
    }
}

/// Public documentation URL for a document, with an optional section anchor.
///
/// `content/applications/sales.md` under `17.0` becomes
/// `<base>/17.0/applications/sales.html`.
pub fn document_url(
    base_url: &str,
    version: &Version,
    document_key: &str,
    anchor: &str,
) -> String {
    let page = document_key.strip_prefix("content/").unwrap_or(document_key);
    let page = page.strip_suffix(".md").unwrap_or(page);
    let mut url = format!(
        "{}/{}/{}.html",
        base_url.trim_end_matches('/'),
        version.label,
        page
    );
    if !anchor.is_empty() {
        url.push('#');
        url.push_str(anchor);
    }
    url
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| IngestError::io(path, e))
}
