//! Heading-aware Markdown chunker.
//!
//! Splits a Markdown document into [`ChunkDraft`]s no longer than
//! `size` characters. All lengths are measured in Unicode scalar values,
//! never bytes, so cuts always land on a char boundary.
//!
//! # Algorithm
//!
//! 1. Clean the text: drop `[[_TOC_]]` markers, normalize line endings,
//!    and collapse runs of three or more newlines into one blank line.
//! 2. If the whole document fits in `size`, emit it as one chunk.
//! 3. Otherwise split into sections at ATX headings (`#` .. `######`,
//!    ignoring fenced code). Each section carries a `" > "` breadcrumb
//!    of its enclosing headings and includes its own heading line.
//! 4. Pack each section's paragraphs (blank-line separated) into chunks.
//!    When a chunk is flushed, the next one starts with the last
//!    `overlap` characters of the flushed chunk.
//! 5. Text that still does not fit is hard-cut with stride
//!    `size - overlap`, so consecutive pieces share exactly `overlap`
//!    characters.
//! 6. Drop chunks that contain nothing but image references, then number
//!    the survivors `0..N` across the whole document.
//!
//! # Example
//!
//! ```rust
//! use mdrag_core::chunk::{chunk_markdown, ChunkParams};
//!
//! let params = ChunkParams { size: 800, overlap: 150 };
//! let chunks = chunk_markdown("# Intro\n\nHello world.", &params);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].heading_path, "Intro");
//! ```

use anyhow::{bail, Result};
use serde_json::{Map, Value};

use crate::models::ChunkDraft;

/// Chunk sizing, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub size: usize,
    pub overlap: usize,
}

impl ChunkParams {
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            bail!("chunking.size must be > 0");
        }
        if self.overlap >= self.size {
            bail!(
                "chunking.overlap ({}) must be smaller than chunking.size ({})",
                self.overlap,
                self.size
            );
        }
        Ok(())
    }

    fn stride(&self) -> usize {
        self.size.saturating_sub(self.overlap).max(1)
    }
}

struct Section {
    heading_path: String,
    content: String,
}

struct Piece {
    text: String,
    forced: bool,
}

/// Chunk a Markdown document.
///
/// Returns an empty vector for empty or whitespace-only input. Output is a
/// pure function of `(text, params)`.
pub fn chunk_markdown(text: &str, params: &ChunkParams) -> Vec<ChunkDraft> {
    let cleaned = clean_content(text);
    if cleaned.is_empty() {
        return Vec::new();
    }

    let sections = split_sections(&cleaned);

    if char_len(&cleaned) <= params.size {
        let heading_path = sections
            .iter()
            .map(|s| s.heading_path.as_str())
            .find(|p| !p.is_empty())
            .unwrap_or("")
            .to_string();
        let piece = Piece {
            text: cleaned,
            forced: false,
        };
        return number(vec![(heading_path, piece, true)]);
    }

    let mut out = Vec::new();
    for section in sections {
        let pieces = pack_section(&section.content, params);
        let complete = pieces.len() == 1;
        for piece in pieces {
            out.push((section.heading_path.clone(), piece, complete));
        }
    }
    number(out)
}

/// Filter image-only pieces and assign contiguous indices.
fn number(pieces: Vec<(String, Piece, bool)>) -> Vec<ChunkDraft> {
    pieces
        .into_iter()
        .filter(|(_, piece, _)| !is_image_only(&piece.text))
        .enumerate()
        .map(|(i, (heading_path, piece, complete))| {
            let mut metadata = Map::new();
            metadata.insert("char_count".into(), Value::from(char_len(&piece.text)));
            metadata.insert("is_complete_section".into(), Value::Bool(complete));
            metadata.insert("is_forced_split".into(), Value::Bool(piece.forced));
            ChunkDraft {
                content: piece.text,
                heading_path,
                chunk_index: i as i64,
                metadata,
            }
        })
        .collect()
}

/// Strip table-of-contents markers and collapse excess blank lines.
pub fn clean_content(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace("[[_TOC_]]", "");
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0usize;
    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push(ch);
            }
        } else {
            newlines = 0;
            out.push(ch);
        }
    }
    out.trim().to_string()
}

/// Parse an ATX heading line into `(level, title)`.
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let title = rest.trim();
    if title.is_empty() {
        return None;
    }
    Some((level, title))
}

fn split_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut current = Section {
        heading_path: String::new(),
        content: String::new(),
    };
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }

        let heading = if in_fence { None } else { parse_heading(line) };
        match heading {
            Some((level, title)) => {
                if !current.content.trim().is_empty() {
                    sections.push(current);
                }
                while stack.last().is_some_and(|(l, _)| *l >= level) {
                    stack.pop();
                }
                stack.push((level, title.to_string()));
                let heading_path = stack
                    .iter()
                    .map(|(_, t)| t.as_str())
                    .collect::<Vec<_>>()
                    .join(" > ");
                current = Section {
                    heading_path,
                    content: format!("{}\n", line),
                };
            }
            None => {
                current.content.push_str(line);
                current.content.push('\n');
            }
        }
    }
    if !current.content.trim().is_empty() {
        sections.push(current);
    }
    sections
}

fn pack_section(content: &str, params: &ChunkParams) -> Vec<Piece> {
    let content = content.trim();
    if char_len(content) <= params.size {
        return vec![Piece {
            text: content.to_string(),
            forced: false,
        }];
    }

    let mut pieces = Vec::new();
    let mut buf = String::new();
    // `buf` holds text not yet emitted, beyond any carried-over overlap.
    let mut fresh = false;
    let mut forced = false;

    for para in content.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let candidate = join(&buf, para);
        if char_len(&candidate) <= params.size {
            buf = candidate;
            fresh = true;
            continue;
        }

        let candidate = if fresh {
            let tail = tail_chars(&buf, params.overlap).to_string();
            pieces.push(Piece {
                text: std::mem::take(&mut buf),
                forced,
            });
            forced = false;
            let candidate = join(&tail, para);
            if char_len(&candidate) <= params.size {
                buf = candidate;
                fresh = true;
                continue;
            }
            candidate
        } else {
            candidate
        };

        let mut cut = hard_cut(&candidate, params);
        let last = cut.pop().unwrap_or_default();
        pieces.extend(cut.into_iter().map(|text| Piece { text, forced: true }));
        buf = last;
        fresh = true;
        forced = true;
    }

    if fresh && !buf.trim().is_empty() {
        pieces.push(Piece { text: buf, forced });
    }
    pieces
}

fn join(head: &str, para: &str) -> String {
    if head.is_empty() {
        para.to_string()
    } else {
        format!("{}\n\n{}", head, para)
    }
}

/// Cut `text` into windows of `size` chars with stride `size - overlap`.
fn hard_cut(text: &str, params: &ChunkParams) -> Vec<String> {
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n = bounds.len() - 1;
    let mut out = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + params.size).min(n);
        out.push(text[bounds[start]..bounds[end]].to_string());
        if end == n {
            break;
        }
        start += params.stride();
    }
    out
}

fn tail_chars(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let len = char_len(text);
    if len <= n {
        return text;
    }
    match text.char_indices().nth(len - n) {
        Some((i, _)) => &text[i..],
        None => text,
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// True when every non-blank line is a Markdown image reference.
pub fn is_image_only(text: &str) -> bool {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty()).peekable();
    if lines.peek().is_none() {
        return false;
    }
    lines.all(|l| l.starts_with("!["))
}
