use anyhow::{Context, Result};
use std::fmt;
use std::path::Path;

use crate::pipeline::{Counters, RunSummary};
use crate::utils::format_duration;

const RULE_WIDTH: usize = 60;

pub fn render_summary(summary: &RunSummary) -> Result<String> {
    let mut out = String::new();
    write_report(&mut out, summary).context("failed to render summary")?;
    Ok(out)
}

fn write_report(out: &mut impl fmt::Write, summary: &RunSummary) -> fmt::Result {
    writeln!(out, "PII Sift Summary")?;
    writeln!(out, "{}\n", "=".repeat(RULE_WIDTH))?;
    write_files(out, summary)?;
    write_counts(out, summary)?;
    write_output(out, summary)?;
    write_breakdowns(out, &summary.counters)?;
    write_errors(out, summary)
}

fn write_files(out: &mut impl fmt::Write, summary: &RunSummary) -> fmt::Result {
    writeln!(out, "FILES")?;
    writeln!(out, "Discovered: {}", summary.files_discovered)?;
    writeln!(out, "Skipped (already complete): {}", summary.files_skipped)?;
    writeln!(out, "Processed: {}", summary.files_processed)?;
    writeln!(out, "  Succeeded: {}", summary.files_succeeded)?;
    writeln!(out, "  Failed: {}", summary.files_failed)?;
    if summary.interrupted {
        writeln!(out, "Run was interrupted before all files were scheduled")?;
    }
    writeln!(out, "Elapsed: {}\n", format_duration(summary.elapsed))
}

fn write_counts(out: &mut impl fmt::Write, summary: &RunSummary) -> fmt::Result {
    let counters = &summary.counters;
    writeln!(out, "COUNTS")?;
    writeln!(out, "Lines scanned: {}", counters.lines_scanned)?;
    writeln!(out, "  Blank lines: {}", counters.lines_blank)?;
    writeln!(out, "  Lines with no match (dropped): {}", counters.lines_dropped_entirely)?;
    writeln!(out, "  Lines with path-only matches: {}", counters.lines_path_only)?;
    writeln!(out, "  Lines with content and path matches: {}", counters.lines_content_and_path)?;
    writeln!(out, "  Partially attributed lines: {}", counters.partial_valid)?;
    writeln!(out, "Total matches: {}", counters.total_matches)?;
    writeln!(out, "  Extracted: {}", counters.extracted)?;
    writeln!(out, "  Mirrored: {}", counters.mirrored)?;
    writeln!(out, "  Dropped (path-only): {}", counters.dropped_path_only)?;
    writeln!(out, "Checksum rejections: {}", counters.checksum_rejected)?;
    writeln!(out, "Record errors: {}", counters.record_errors)?;
    writeln!(
        out,
        "Consistency check (extracted + mirrored + dropped == total): {}\n",
        summary.is_consistent()
    )
}

fn write_output(out: &mut impl fmt::Write, summary: &RunSummary) -> fmt::Result {
    writeln!(out, "OUTPUT")?;
    writeln!(
        out,
        "Extracted rows written: {} in {} new chunks",
        summary.extracted_rows_written, summary.extracted_chunks_created
    )?;
    writeln!(
        out,
        "Mirrored rows written: {} in {} new chunks\n",
        summary.mirrored_rows_written, summary.mirrored_chunks_created
    )
}

fn write_breakdowns(out: &mut impl fmt::Write, counters: &Counters) -> fmt::Result {
    writeln!(out, "PER-DETECTOR COUNTS")?;
    if counters.per_kind.is_empty() {
        writeln!(out, "(none)")?;
    }
    for (kind, count) in &counters.per_kind {
        writeln!(out, "{} = {}", kind, count)?;
    }
    writeln!(out)?;

    writeln!(out, "PER-FIELD COUNTS (extracted)")?;
    if counters.per_field.is_empty() {
        writeln!(out, "(none)")?;
    }
    let mut fields: Vec<(&String, &usize)> = counters.per_field.iter().collect();
    fields.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    for (field, count) in fields {
        writeln!(out, "{} = {}", field, count)?;
        if let Some(example) = counters.field_examples.get(field) {
            writeln!(out, "  Example: {}", example)?;
        }
    }
    writeln!(out)?;

    writeln!(out, "SAMPLE PATH-ONLY LINES (dropped)")?;
    if counters.path_only_samples.is_empty() {
        writeln!(out, "(none)")?;
    }
    for (i, line) in counters.path_only_samples.iter().enumerate() {
        writeln!(out, "{}. {}", i + 1, line)?;
    }
    writeln!(out)
}

fn write_errors(out: &mut impl fmt::Write, summary: &RunSummary) -> fmt::Result {
    writeln!(out, "FILE ERRORS")?;
    if summary.errors.is_empty() {
        writeln!(out, "(none)")?;
    }
    for (file, message) in &summary.errors {
        writeln!(out, "{}: {}", file, message)?;
    }
    Ok(())
}

pub fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    std::fs::write(path, render_summary(summary)?)
        .with_context(|| format!("failed to write summary {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_fields_by_count() {
        let mut counters = Counters::default();
        counters.total_matches = 3;
        counters.extracted = 3;
        counters.per_field.insert("email".to_string(), 1);
        counters.per_field.insert("phone".to_string(), 2);
        counters
            .field_examples
            .insert("phone".to_string(), "phone=9876543210 ; /a ; phone ; mobile_regex ; 9876543210".to_string());

        let summary = RunSummary {
            files_discovered: 2,
            files_processed: 1,
            files_succeeded: 1,
            files_skipped: 1,
            counters,
            ..Default::default()
        };
        let text = render_summary(&summary).unwrap();

        let phone = text.find("phone = 2").unwrap();
        let email = text.find("email = 1").unwrap();
        assert!(phone < email);
        assert!(text.contains("  Example: phone=9876543210 ; /a ; phone ; mobile_regex ; 9876543210"));
        assert!(text.contains("Consistency check (extracted + mirrored + dropped == total): true"));
        assert!(text.contains("Skipped (already complete): 1"));
    }

    #[test]
    fn test_render_reports_file_errors() {
        let summary = RunSummary {
            files_failed: 1,
            errors: vec![("broken.txt".to_string(), "failed to open broken.txt".to_string())],
            ..Default::default()
        };
        let text = render_summary(&summary).unwrap();
        assert!(text.contains("broken.txt: failed to open broken.txt"));
        assert!(text.contains("SAMPLE PATH-ONLY LINES (dropped)\n(none)"));
    }
}
