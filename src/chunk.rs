//! Header-aware markdown chunker.
//!
//! Chunking runs in two passes. The text is first cut at `#` through `####`
//! headings, and each section remembers the headings that enclose it. Each
//! section is then split by length, preferring paragraph breaks, then line
//! breaks, then spaces, and only falling back to raw characters when nothing
//! else fits. Consecutive pieces share up to `overlap_chars` of text.
//!
//! Every chunk's content starts with its rendered header path
//! (`[#] Sales > [##] Quotations`) so both the embedding and the stored text
//! carry their position in the document.

use std::collections::{BTreeMap, VecDeque};
use std::sync::LazyLock;

use regex::Regex;

use crate::models::Chunk;

/// Deepest heading level that starts a new section.
const MAX_HEADER_LEVEL: usize = 4;

/// Split points in priority order. The empty separator splits characters.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

const TITLE_MAX_CHARS: usize = 100;

static LEVEL_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[#+\]\s*").expect("valid level marker pattern"));
static CUSTOM_ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{#.*?\}").expect("valid custom anchor pattern"));
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Size limits for the length pass, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSettings {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            max_chars: 5000,
            overlap_chars: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSegment {
    /// Number of `#` markers, 1 through 4.
    pub level: usize,
    pub text: String,
}

/// Enclosing headings of a section, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderPath {
    segments: Vec<HeaderSegment>,
}

impl HeaderPath {
    pub fn segments(&self) -> &[HeaderSegment] {
        &self.segments
    }

    /// Open a heading: drop every segment at the same or a deeper level,
    /// then push the new one.
    fn enter(&mut self, level: usize, text: &str) {
        self.segments.retain(|s| s.level < level);
        self.segments.push(HeaderSegment {
            level,
            text: text.to_string(),
        });
    }

    /// `[#] A > [##] B`, or an empty string when there are no headings.
    pub fn render(&self) -> String {
        self.segments
            .iter()
            .filter(|s| !s.text.is_empty())
            .map(|s| format!("[{}] {}", "#".repeat(s.level), s.text))
            .collect::<Vec<_>>()
            .join(" > ")
    }

    /// Deep-link anchor derived from the innermost heading.
    pub fn anchor(&self) -> String {
        section_anchor(&self.render())
    }

    /// `Header 1` .. `Header 4` entries for record metadata.
    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.segments
            .iter()
            .filter(|s| !s.text.is_empty())
            .map(|s| (format!("Header {}", s.level), s.text.clone()))
            .collect()
    }
}

/// Turn the last segment of a rendered header path into a URL anchor.
///
/// `"[#] Install > [##] Invite / remove users"` → `"invite-remove-users"`.
pub fn section_anchor(header_path: &str) -> String {
    let last = header_path.rsplit(" > ").next().unwrap_or_default();
    let title = LEVEL_MARKER.replace_all(last, "");
    let title = CUSTOM_ANCHOR.replace_all(&title, "");
    let kept: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();
    WHITESPACE_RUN
        .replace_all(kept.to_lowercase().trim(), "-")
        .into_owned()
}

/// Split a normalized document into numbered chunks.
///
/// Chunk numbers follow output order and start at 0. A document with no
/// non-whitespace text yields no chunks.
pub fn chunk_markdown(text: &str, settings: &ChunkSettings) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for section in split_sections(text) {
        let rendered = section.path.render();
        for piece in split_by_length(&section.text, &SEPARATORS, settings) {
            let content = if rendered.is_empty() {
                piece
            } else {
                format!("{}\n{}", rendered, piece)
            };
            chunks.push(Chunk {
                chunk_number: chunks.len() as i64,
                header_path: section.path.clone(),
                content,
            });
        }
    }

    chunks
}

/// Human title for a chunk.
///
/// The rendered header path when there is one; otherwise the first markdown
/// heading in the content; otherwise the first line, cut to 100 characters.
pub fn chunk_title(chunk: &Chunk) -> String {
    let rendered = chunk.header_path.render();
    if !rendered.is_empty() {
        return rendered;
    }

    if let Some(heading) = chunk.content.lines().find_map(heading_text) {
        return heading.to_string();
    }

    let first_line = chunk.content.lines().next().unwrap_or_default().trim();
    if first_line.chars().count() > TITLE_MAX_CHARS {
        let cut: String = first_line.chars().take(TITLE_MAX_CHARS - 3).collect();
        format!("{}...", cut)
    } else {
        first_line.to_string()
    }
}

// ============ Header pass ============

struct Section {
    path: HeaderPath,
    text: String,
}

fn split_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut path = HeaderPath::default();
    let mut lines: Vec<&str> = Vec::new();
    // True while the pending section holds nothing but headings, so a
    // deeper heading extends it instead of leaving a heading-only chunk.
    let mut headers_only = true;
    let mut fence: Option<&str> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();

        if let Some(open) = fence {
            if trimmed.starts_with(open) {
                fence = None;
            }
            lines.push(line);
            continue;
        }
        if let Some(marker) = fence_marker(trimmed) {
            fence = Some(marker);
            headers_only = false;
            lines.push(line);
            continue;
        }

        if let Some((level, title)) = parse_header(trimmed) {
            let deeper = path.segments().last().map_or(true, |s| level > s.level);
            if !(headers_only && deeper) {
                flush_section(&mut sections, &path, &mut lines);
                headers_only = true;
            }
            path.enter(level, title);
            lines.push(trimmed.trim_end());
            continue;
        }

        if !trimmed.is_empty() {
            headers_only = false;
        }
        lines.push(line.trim_end());
    }
    flush_section(&mut sections, &path, &mut lines);

    sections
}

fn flush_section(sections: &mut Vec<Section>, path: &HeaderPath, lines: &mut Vec<&str>) {
    let text = lines.join("\n");
    lines.clear();
    let text = text.trim();
    if !text.is_empty() {
        sections.push(Section {
            path: path.clone(),
            text: text.to_string(),
        });
    }
}

fn fence_marker(line: &str) -> Option<&'static str> {
    if line.starts_with("```") {
        Some("```")
    } else if line.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

/// `## Title` → `(2, "Title")`. Five or more markers are body text.
fn parse_header(line: &str) -> Option<(usize, &str)> {
    let line = line.trim_end();
    let level = line.bytes().take_while(|b| *b == b'#').count();
    if level == 0 || level > MAX_HEADER_LEVEL {
        return None;
    }
    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((level, rest.trim()))
}

/// Text of any markdown heading line, regardless of depth.
fn heading_text(line: &str) -> Option<&str> {
    let rest = line.trim_start_matches('#');
    if rest.len() == line.len() || !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let text = rest.trim();
    (!text.is_empty()).then_some(text)
}

// ============ Length pass ============

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_by_length(text: &str, separators: &[&str], settings: &ChunkSettings) -> Vec<String> {
    let (separator, finer) = pick_separator(text, separators);
    let mut out = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();

    for piece in split_keeping_separator(text, separator) {
        if char_len(piece) < settings.max_chars {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            out.extend(merge_pieces(&fitting, settings));
            fitting.clear();
        }
        if finer.is_empty() {
            out.push(piece.to_string());
        } else {
            out.extend(split_by_length(piece, finer, settings));
        }
    }
    if !fitting.is_empty() {
        out.extend(merge_pieces(&fitting, settings));
    }

    out
}

/// First separator present in `text`, plus the finer ones after it.
fn pick_separator<'a, 's>(text: &str, separators: &'a [&'s str]) -> (&'s str, &'a [&'s str]) {
    for (i, &separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            return (separator, &[]);
        }
        if text.contains(separator) {
            return (separator, &separators[i + 1..]);
        }
    }
    ("", &[])
}

/// Split so each separator stays attached to the start of the piece after it.
fn split_keeping_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Greedily pack small pieces into chunks of at most `max_chars`, carrying
/// up to `overlap_chars` of trailing pieces into the next chunk.
fn merge_pieces(pieces: &[&str], settings: &ChunkSettings) -> Vec<String> {
    let mut docs = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0;

    for &piece in pieces {
        let len = char_len(piece);
        if total + len > settings.max_chars && !window.is_empty() {
            push_joined(&mut docs, &window);
            while total > settings.overlap_chars || (total + len > settings.max_chars && total > 0)
            {
                match window.pop_front() {
                    Some((_, dropped)) => total -= dropped,
                    None => break,
                }
            }
        }
        window.push_back((piece, len));
        total += len;
    }
    push_joined(&mut docs, &window);

    docs
}

fn push_joined(docs: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}
