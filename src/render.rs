use crate::model::Report;

pub const DEFAULT_EXPORT_PREFIX: &str = "RIGOR_HSPA_SECURE";

/// Markdown body handed to the document exporter.
pub fn render_markdown(report: &Report) -> String {
    let mut out = format!("# {}\n", report.title);
    for (i, section) in report.sections.iter().enumerate() {
        if i > 0 {
            out.push_str("\n---\n");
        }
        out.push_str(&format!("\n## {}\n", section.heading));
        if !section.content.is_empty() {
            out.push('\n');
            out.push_str(&section.content);
            out.push('\n');
        }
    }
    out
}

/// Suggested export filename: `<PREFIX>_<id>.<ext>`.
pub fn export_filename(prefix: &str, report: &Report, ext: &str) -> String {
    let prefix = prefix.trim_matches('_');
    let prefix = if prefix.is_empty() { DEFAULT_EXPORT_PREFIX } else { prefix };
    format!("{}_{}.{}", prefix, report.id, ext.trim_start_matches('.'))
}

/// Compact, readable listing of a report collection.
pub fn overview_table(reports: &[Report]) -> String {
    let mut out = format!("{:>3} | {:<10} | {:<48} | {:>8}\n", "#", "Id", "Report", "Sections");
    out.push_str(&"-".repeat(78));
    out.push('\n');
    for (i, r) in reports.iter().enumerate() {
        out.push_str(&format!(
            "{:>3} | {:<10} | {:<48} | {:>8}\n",
            i + 1,
            r.id,
            truncate(r.short_title(), 45),
            r.sections.len()
        ));
    }
    out
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}
