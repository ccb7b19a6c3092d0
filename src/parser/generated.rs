use std::sync::LazyLock;

use regex::Regex;

use crate::model::Section;

/// Start of a `## ` heading line in generated text.
static GENERATED_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^##\s").unwrap());
static HEADING_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^##\s*").unwrap());
/// Trailing `---` rules echoed back from the prompt layout.
static TRAILING_RULES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:(?:^|\s*\n)[ \t]*---[ \t]*)+\s*$").unwrap());

/// Sections of freshly generated text, split before every `## ` line.
///
/// Only meant for service output; static templates use the `---` grammar.
/// Text before the first `## ` line (or text with no such line at all) is a
/// piece of its own whose first line is the heading. An empty `## ` marker
/// gives an empty heading. Blank text gives no sections.
pub fn parse_generated(text: &str) -> Vec<Section> {
    split_at_headings(text)
        .into_iter()
        .filter(|piece| !piece.trim().is_empty())
        .map(parse_generated_section)
        .collect()
}

fn split_at_headings(text: &str) -> Vec<&str> {
    let mut starts: Vec<usize> = GENERATED_HEADING_RE.find_iter(text).map(|m| m.start()).collect();
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            &text[start..end]
        })
        .collect()
}

fn parse_generated_section(piece: &str) -> Section {
    let mut lines = piece.trim().lines();
    let heading = lines
        .next()
        .map(|l| HEADING_MARKER_RE.replace(l.trim(), "").trim().to_string())
        .unwrap_or_default();
    let content = lines.collect::<Vec<_>>().join("\n");
    let content = TRAILING_RULES_RE.replace(content.trim(), "");

    Section {
        heading,
        content: content.trim().to_string(),
    }
}
