//! Raw markup → normalized markdown.
//!
//! The [`Normalizer`] trait is the narrow, synchronous conversion boundary.
//! [`PandocNormalizer`] shells out to `pandoc -f rst -t markdown`;
//! [`PassthroughNormalizer`] is for trees that are already markdown. Both
//! run their output through [`clean_markdown`].
//!
//! Conversion failures are deterministic for a given input and are never
//! retried.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{error, info};

use crate::changes::ChangeDetector;
use crate::config::{Config, NormalizerConfig};
use crate::error::{IngestError, Result};
use crate::layout::SourceLayout;
use crate::models::NormalizedDocument;

/// Lines before the first real content that only carry page directives.
const METADATA_MARKERS: [&str; 5] = [
    "show-content",
    "hide-page-toc",
    "show-toc",
    "nosearch",
    "orphan",
];

static TIP_BLOCK: LazyLock<Regex> = LazyLock::new(|| admonition("tip", "Tip"));
static NOTE_BLOCK: LazyLock<Regex> = LazyLock::new(|| admonition("note", "Note"));
static IMPORTANT_BLOCK: LazyLock<Regex> = LazyLock::new(|| admonition("important", "Important"));
static INTERPRETED_ROLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{\.interpreted-text\s+role="[^"]+"\}"#).expect("valid role pattern")
});
static TOCTREE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)::: \{\.toctree titlesonly=""\}\n(.*?)\n:::"#).expect("valid toctree pattern")
});
static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid blank-run pattern"));

fn admonition(kind: &str, title: &str) -> Regex {
    Regex::new(&format!(
        r"(?s):::: {}\n::: title\n{}\n:::\n\n(.*?)\n::::",
        kind, title
    ))
    .expect("valid admonition pattern")
}

pub trait Normalizer: Send + Sync {
    fn name(&self) -> &str;
    fn convert(&self, raw: &str) -> Result<String>;
}

/// Runs pandoc as a subprocess, source on stdin, markdown on stdout.
pub struct PandocNormalizer {
    program: PathBuf,
}

impl PandocNormalizer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Normalizer for PandocNormalizer {
    fn name(&self) -> &str {
        "pandoc"
    }

    fn convert(&self, raw: &str) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(["-f", "rst", "-t", "markdown"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                IngestError::Conversion(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| IngestError::Conversion("pandoc stdin unavailable".to_string()))?;
        let input = raw.to_owned();
        // pandoc may fill stdout before it has read all of stdin.
        let writer = std::thread::spawn(move || stdin.write_all(input.as_bytes()));

        let output = child
            .wait_with_output()
            .map_err(|e| IngestError::Conversion(format!("pandoc did not finish: {}", e)))?;
        let written = writer
            .join()
            .map_err(|_| IngestError::Conversion("pandoc stdin writer panicked".to_string()))?;

        if !output.status.success() {
            return Err(IngestError::Conversion(format!(
                "pandoc exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        written.map_err(|e| IngestError::Conversion(format!("writing to pandoc: {}", e)))?;

        let markdown = String::from_utf8(output.stdout)
            .map_err(|e| IngestError::Conversion(format!("pandoc output is not UTF-8: {}", e)))?;
        Ok(clean_markdown(&markdown))
    }
}

/// Treats input as markdown already; only cleans it.
pub struct PassthroughNormalizer;

impl Normalizer for PassthroughNormalizer {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn convert(&self, raw: &str) -> Result<String> {
        Ok(clean_markdown(raw))
    }
}

pub fn create_normalizer(config: &NormalizerConfig) -> Result<Box<dyn Normalizer>> {
    match config.kind.as_str() {
        "pandoc" => Ok(Box::new(PandocNormalizer::new(&config.pandoc_path))),
        "passthrough" => Ok(Box::new(PassthroughNormalizer)),
        other => Err(IngestError::Config(format!("Unknown normalizer: {}", other))),
    }
}

/// Tidy converter output for chunking.
///
/// Drops leading page-directive lines, joins soft-wrapped paragraphs,
/// rewrites tip/note/important blocks to `Tip: ...` prose, strips
/// interpreted-text role markers, turns toctrees into a
/// `## Related content:` list, and collapses runs of blank lines.
pub fn clean_markdown(content: &str) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let start = lines
        .iter()
        .position(|line| is_content_start(line.trim()))
        .unwrap_or(0);
    let content = fix_line_breaks(&lines[start..].join("\n"));

    let content = TIP_BLOCK.replace_all(&content, "Tip: $1");
    let content = NOTE_BLOCK.replace_all(&content, "Note: $1");
    let content = IMPORTANT_BLOCK.replace_all(&content, "Important: $1");
    let content = INTERPRETED_ROLE.replace_all(&content, "");
    let content = TOCTREE_BLOCK.replace_all(&content, |caps: &Captures| {
        let items: Vec<String> = caps[1]
            .split_whitespace()
            .map(|item| format!("- {}", item))
            .collect();
        format!("## Related content:\n\n{}", items.join("\n"))
    });
    let content = BLANK_RUN.replace_all(&content, "\n\n");

    content.trim().to_string()
}

fn is_content_start(stripped: &str) -> bool {
    if stripped.starts_with('#') || stripped.starts_with("+--") || stripped.starts_with('|') {
        return true;
    }
    if stripped.is_empty() || stripped == ":" {
        return false;
    }
    let lower = stripped.to_lowercase();
    !METADATA_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Join soft-wrapped paragraph lines with single spaces. Headings,
/// directives, list items, link lines, table rows, blank lines, and fenced
/// code keep their own lines.
pub fn fix_line_breaks(content: &str) -> String {
    let mut result: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_code = false;

    for line in content.split('\n') {
        let stripped = line.trim();

        if stripped.starts_with("```") {
            flush_paragraph(&mut result, &mut current);
            result.push(line.to_string());
            in_code = !in_code;
            continue;
        }
        if in_code {
            result.push(line.to_string());
            continue;
        }

        if keeps_own_line(stripped) {
            flush_paragraph(&mut result, &mut current);
            result.push(line.to_string());
            continue;
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(stripped);
    }
    flush_paragraph(&mut result, &mut current);

    result.join("\n")
}

fn flush_paragraph(result: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        result.push(std::mem::take(current));
    }
}

fn keeps_own_line(stripped: &str) -> bool {
    stripped.is_empty()
        || stripped.starts_with('#')
        || stripped.starts_with(":::")
        || stripped.starts_with("- ")
        || stripped.starts_with("* ")
        || stripped.starts_with('[')
        || stripped.starts_with('+')
        || stripped.starts_with('|')
        || is_ordered_item(stripped)
}

fn is_ordered_item(stripped: &str) -> bool {
    let digits = stripped.bytes().take_while(u8::is_ascii_digit).count();
    digits > 0 && stripped[digits..].starts_with(". ")
}

/// Convert one raw file and write the result into the normalized tree.
pub fn normalize_file(
    layout: &SourceLayout,
    normalizer: &dyn Normalizer,
    raw_path: &Path,
) -> Result<NormalizedDocument> {
    let (version, target) = layout.normalized_path_for(raw_path)?;
    let source = std::fs::read_to_string(raw_path).map_err(|e| IngestError::io(raw_path, e))?;
    let text = normalizer.convert(&source)?;

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
    }
    std::fs::write(&target, &text).map_err(|e| IngestError::io(&target, e))?;

    let key = layout.document_key(&target, &version)?;
    Ok(NormalizedDocument {
        path: target,
        key,
        version,
        text,
    })
}

/// Outcome of a whole-tree conversion.
#[derive(Debug, Default)]
pub struct ConvertReport {
    pub converted: usize,
    pub failed: Vec<(PathBuf, String)>,
}

/// Convert every raw file of every configured release. Per-file failures
/// are logged and counted; the pass continues.
pub fn convert_tree(layout: &SourceLayout, normalizer: &dyn Normalizer) -> Result<ConvertReport> {
    let sources = ChangeDetector::new(layout)?.list_sources()?;
    let mut report = ConvertReport::default();

    for raw in sources {
        match normalize_file(layout, normalizer, &raw) {
            Ok(doc) => {
                info!(source = %raw.display(), target = %doc.path.display(), "converted");
                report.converted += 1;
            }
            Err(e) => {
                error!(source = %raw.display(), error = %e, "conversion failed");
                report.failed.push((raw, e.to_string()));
            }
        }
    }

    Ok(report)
}

/// `dh convert`
pub fn run_convert(config: &Config) -> anyhow::Result<()> {
    let layout = config.layout()?;
    let normalizer = create_normalizer(&config.normalizer)?;
    let report = convert_tree(&layout, normalizer.as_ref())?;

    println!("convert ({})", normalizer.name());
    println!("  converted: {}", report.converted);
    println!("  failed: {}", report.failed.len());
    for (path, reason) in &report.failed {
        println!("    {}: {}", path.display(), reason);
    }
    Ok(())
}
