pub mod blocks;
pub mod generated;
pub mod sections;

use thiserror::Error;
use tracing::debug;

use crate::model::Report;

pub use generated::parse_generated;
pub use sections::render_template;

/// Strict-mode rejections. The lenient [`parse`] never produces these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{report}: report block has no title")]
    MissingTitle { report: String },
    #[error("{report}: section {index} has no heading line")]
    MalformedSection { report: String, index: usize },
}

/// Two-pass pipeline: raw text → report blocks → titled, sectioned reports.
///
/// Ids are positional over the blocks that survive blank filtering; the
/// ordinal inside each `--- Report N ---` marker is ignored. Malformed
/// sections fall back to the sentinel heading, blank input gives an empty vec.
pub fn parse(raw: &str, shared_context: Option<&str>) -> Vec<Report> {
    let reports: Vec<Report> = blocks::split_report_blocks(raw)
        .into_iter()
        .enumerate()
        .map(|(i, block)| build_report(i + 1, block, shared_context))
        .collect();
    debug!(reports = reports.len(), "parsed report templates");
    reports
}

/// Like [`parse`], but rejects blocks without a title and sections without
/// a heading line instead of papering over them.
pub fn parse_strict(raw: &str, shared_context: Option<&str>) -> Result<Vec<Report>, ParseError> {
    for (i, block) in blocks::split_report_blocks(raw).into_iter().enumerate() {
        let report = report_id(i + 1);
        let (title, pieces) = sections::split_pieces(block);
        if title.trim().is_empty() {
            return Err(ParseError::MissingTitle { report });
        }
        if let Some(index) = pieces.iter().position(|p| sections::heading_line(p).is_none()) {
            return Err(ParseError::MalformedSection {
                report,
                index: index + 1,
            });
        }
    }
    Ok(parse(raw, shared_context))
}

fn build_report(position: usize, block: &str, shared_context: Option<&str>) -> Report {
    let (title, sections) = sections::split_sections(block);
    Report {
        id: report_id(position),
        title,
        sections,
        context: shared_context.map(str::to_string),
    }
}

fn report_id(position: usize) -> String {
    format!("report-{}", position)
}

// ── Tests ──
