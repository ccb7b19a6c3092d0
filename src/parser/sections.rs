use std::fmt::Write;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::{Report, Section, UNTITLED};

/// Bare `---` rule on its own line.
static SECTION_RULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*---[ \t]*\r?$").unwrap());

/// Leading "<digits>. " ordinal on a heading line.
static ORDINAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]+\.(?:\s+|$)").unwrap());

/// Split a report block into its title piece and raw section pieces.
pub fn split_pieces(block: &str) -> (&str, Vec<&str>) {
    let mut pieces = SECTION_RULE_RE.split(block.trim());
    let title = pieces.next().unwrap_or("");
    (title, pieces.collect())
}

/// Title plus ordered sections of one report block. A block without any
/// `---` rule has a title and no sections.
pub fn split_sections(block: &str) -> (String, Vec<Section>) {
    let (title, pieces) = split_pieces(block);
    let sections = pieces.into_iter().map(parse_section).collect();
    (title.trim().to_string(), sections)
}

/// First line of a piece with its ordinal stripped, if anything is left.
pub fn heading_line(piece: &str) -> Option<&str> {
    piece
        .trim()
        .lines()
        .next()
        .map(strip_ordinal)
        .filter(|h| !h.is_empty())
}

pub fn parse_section(piece: &str) -> Section {
    let mut lines = piece.trim().lines();
    let first = lines.next().map(strip_ordinal).unwrap_or("");
    let heading = if first.is_empty() { UNTITLED } else { first };
    let content = lines.collect::<Vec<_>>().join("\n");

    Section {
        heading: heading.to_string(),
        content: content.trim().to_string(),
    }
}

/// "3. Risk Assessment" → "Risk Assessment"; lines without an ordinal are
/// only trimmed.
pub fn strip_ordinal(line: &str) -> &str {
    let line = line.trim();
    match ORDINAL_RE.find(line) {
        Some(m) => line[m.end()..].trim(),
        None => line,
    }
}

/// Serialize a report back into template form: title, then each section as
/// "<n>. heading" + content, separated by `---` rules.
pub fn render_template(report: &Report) -> String {
    let mut out = report.title.clone();
    for (i, section) in report.sections.iter().enumerate() {
        out.push_str("\n---\n");
        let _ = write!(out, "{}. {}", i + 1, section.heading);
        if !section.content.is_empty() {
            out.push('\n');
            out.push_str(&section.content);
        }
    }
    out.push('\n');
    out
}
