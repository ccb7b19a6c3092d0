use std::sync::LazyLock;

use regex::Regex;

/// `--- Report <N> ---` on its own line. The ordinal is matched but never used.
static REPORT_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*--- Report \d+ ---[ \t]*\r?$").unwrap());

/// Split raw template text into report blocks, dropping whitespace-only ones
/// (including any leading text before the first marker that is blank).
pub fn split_report_blocks(raw: &str) -> Vec<&str> {
    REPORT_MARKER_RE
        .split(raw)
        .filter(|block| !block.trim().is_empty())
        .collect()
}
