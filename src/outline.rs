//! Outline (SUMMARY.md) parsing.
//!
//! The outline is a nested Markdown list of links:
//!
//! ```text
//! # Summary
//!
//! - [Introduction](intro.md)
//! - Part One
//!   - [Getting started](part1/start.md)
//!   - [Going further](part1/further.md)
//! ```
//!
//! Each indentation level (two columns by default) nests an entry under the
//! last entry opened one level up. Top-level lines may omit the link, in
//! which case the chapter is rendered from its title alone. Nested lines
//! must carry both a `[title]` and a `(link)`.

use crate::error::{Error, OutlineError, Result};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tokio::fs;

static TITLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(.*?)\]").expect("valid title regex"));
static LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((.*?)\)").expect("valid link regex"));

/// One line of the outline and everything nested below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    /// Title shown in the table of contents
    pub title: String,
    /// Path relative to the book directory; empty for title-only entries
    pub link: String,
    /// Nested entries, in outline order
    pub children: Vec<OutlineEntry>,
}

impl OutlineEntry {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            children: Vec::new(),
        }
    }

    /// Number of pages this entry produces, itself included.
    pub fn page_count(&self) -> usize {
        1 + self.children.iter().map(OutlineEntry::page_count).sum::<usize>()
    }
}

/// Knobs for the indentation grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutlineOptions {
    /// Columns per nesting level. A tab always counts as one level.
    pub indent_width: usize,
    /// Deepest level kept, counting top-level entries as depth 1.
    pub max_depth: usize,
}

impl Default for OutlineOptions {
    fn default() -> Self {
        Self {
            indent_width: 2,
            max_depth: 2,
        }
    }
}

/// Parsed outline: the ordered top-level entries of the book.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Outline {
    entries: Vec<OutlineEntry>,
}

impl Outline {
    /// Reads and parses an outline file.
    pub async fn from_file(path: &Path, options: &OutlineOptions) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        let outline = Self::parse(&text, options)?;
        debug!(
            "Parsed {} top-level entries ({} pages) from {}",
            outline.len(),
            outline.page_count(),
            path.display()
        );
        Ok(outline)
    }

    /// Parses outline text.
    pub fn parse(text: &str, options: &OutlineOptions) -> std::result::Result<Self, OutlineError> {
        let mut entries = Vec::new();
        // open[n] is the most recent entry at level n that may still gain children
        let mut open: Vec<OutlineEntry> = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            if raw.trim().is_empty() {
                continue;
            }

            let columns = indent_columns(raw, options.indent_width);
            let trimmed = raw.trim();

            if columns == 0 {
                if is_heading(trimmed) || is_separator(trimmed) {
                    debug!("Skipping line {}: {}", line_no, trimmed);
                    continue;
                }
                close_to(&mut open, &mut entries, 0);
                open.push(parse_top_level(trimmed));
                continue;
            }

            if options.indent_width == 0 || columns % options.indent_width != 0 {
                debug!(
                    "Skipping line {}: indentation of {} columns is not a multiple of {}",
                    line_no, columns, options.indent_width
                );
                continue;
            }

            let level = columns / options.indent_width;
            if level >= options.max_depth.max(1) {
                debug!(
                    "Skipping line {}: deeper than {} levels",
                    line_no, options.max_depth
                );
                continue;
            }
            if level > open.len() {
                warn!("Skipping line {}: no parent entry for {:?}", line_no, trimmed);
                continue;
            }

            let entry = parse_nested(raw, line_no)?;
            close_to(&mut open, &mut entries, level);
            open.push(entry);
        }

        close_to(&mut open, &mut entries, 0);
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[OutlineEntry] {
        &self.entries
    }

    /// Number of top-level entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of pages across all levels.
    pub fn page_count(&self) -> usize {
        self.entries.iter().map(OutlineEntry::page_count).sum()
    }
}

/// Pops open entries until only `level` remain, attaching each to its parent.
fn close_to(open: &mut Vec<OutlineEntry>, entries: &mut Vec<OutlineEntry>, level: usize) {
    while open.len() > level {
        let Some(entry) = open.pop() else { break };
        match open.last_mut() {
            Some(parent) => parent.children.push(entry),
            None => entries.push(entry),
        }
    }
}

/// Leading whitespace in columns; any Unicode space (e.g. U+3000) is one
/// column and a tab is a whole level.
fn indent_columns(line: &str, indent_width: usize) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { indent_width.max(1) } else { 1 })
        .sum()
}

/// `# Summary`, `## Part`, ...
fn is_heading(line: &str) -> bool {
    let rest = line.trim_start_matches('#');
    rest.len() < line.len() && (rest.is_empty() || rest.starts_with(char::is_whitespace))
}

/// mdBook part separators.
fn is_separator(line: &str) -> bool {
    line.len() >= 3 && line.chars().all(|c| c == '-')
}

fn strip_list_marker(line: &str) -> &str {
    ["- ", "* ", "+ "]
        .iter()
        .find_map(|marker| line.strip_prefix(marker))
        .unwrap_or(line)
        .trim()
}

fn capture<'a>(re: &Regex, line: &'a str) -> Option<&'a str> {
    re.captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

fn parse_top_level(line: &str) -> OutlineEntry {
    let title = capture(&TITLE_RE, line).unwrap_or_else(|| strip_list_marker(line));
    let link = capture(&LINK_RE, line).unwrap_or("");
    OutlineEntry::new(title, link)
}

fn parse_nested(raw: &str, line_no: usize) -> std::result::Result<OutlineEntry, OutlineError> {
    let line = raw.trim();
    match (capture(&TITLE_RE, line), capture(&LINK_RE, line)) {
        (Some(title), Some(link)) => Ok(OutlineEntry::new(title, link)),
        _ => Err(OutlineError::MalformedEntry {
            line: line_no,
            text: raw.trim_end().to_string(),
        }),
    }
}
