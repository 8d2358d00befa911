//! Trend report generation.
//!
//! This module renders the aggregated pivot tables as Markdown, JSON or
//! CSV. Each table keeps its period index and column order.

use crate::cli::OutputFormat;
use crate::models::{FieldPivot, PivotTable, Report, ReportMetadata};
use anyhow::{Context, Result};
use std::path::Path;

/// Generate a report in `format`.
pub fn generate_report(report: &Report, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Markdown => Ok(generate_markdown_report(report)),
        OutputFormat::Json => generate_json_report(report),
        OutputFormat::Csv => generate_csv_report(&report.pivots),
    }
}

/// Write the report to `path` in `format`.
pub fn write_report(report: &Report, format: OutputFormat, path: &Path) -> Result<()> {
    let content = generate_report(report, format)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# Trial Trends Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_totals_section(
        &report.location_totals,
        report.selected_locations.as_ref().map(|s| s.len()),
    ));

    for pivot in &report.pivots {
        output.push_str(&generate_pivot_section(pivot));
    }

    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();
    let filters = &metadata.filters;

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Input:** `{}`\n", metadata.input));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Trials Loaded:** {}\n", metadata.rows_loaded));
    section.push_str(&format!(
        "- **Periods:** {} {}\n",
        metadata.granularity, metadata.period_range
    ));
    section.push_str(&format!(
        "- **Grouped By Location:** {}\n",
        if metadata.group_by_location { "yes" } else { "no" }
    ));

    if !filters.exclude_locations.is_empty() {
        let names: Vec<&str> = filters.exclude_locations.iter().map(String::as_str).collect();
        section.push_str(&format!("- **Excluded Locations:** {}\n", names.join(", ")));
    }
    if let Some(min) = filters.min_count_per_location {
        section.push_str(&format!("- **Minimum Trials Per Location:** {}\n", min));
    }
    if filters.exclude_non_region_locations {
        section.push_str("- **Third Countries:** excluded\n");
    }
    section.push_str(&format!(
        "- **Phase 1 Only Trials:** {}\n",
        if filters.drop_phase_one_only { "excluded" } else { "included" }
    ));
    section.push_str(&format!(
        "- **Duration:** {:.2}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the location totals section.
fn generate_totals_section(totals: &[(String, u64)], selected: Option<usize>) -> String {
    if totals.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Trials by Location\n\n");
    section.push_str("| Location | Trials |\n");
    section.push_str("|:---|---:|\n");
    for (location, count) in totals {
        section.push_str(&format!("| {} | {} |\n", location, count));
    }
    section.push('\n');

    if let Some(n) = selected {
        section.push_str(&format!("*{} locations selected for charting.*\n\n", n));
    }

    section
}

/// Generate the section for one date field.
fn generate_pivot_section(pivot: &FieldPivot) -> String {
    let mut section = String::new();

    section.push_str(&format!("## {}\n\n", pivot.field));

    if pivot.table.is_empty() {
        section.push_str("No trials to count.\n\n");
        return section;
    }

    section.push_str(&markdown_table(&pivot.table));
    section.push('\n');

    section
}

/// Render a pivot table as a Markdown table.
fn markdown_table(table: &PivotTable) -> String {
    let mut out = String::new();

    out.push_str("| Period |");
    for column in &table.columns {
        out.push_str(&format!(" {} |", column));
    }
    out.push('\n');

    out.push_str("|:---|");
    for _ in &table.columns {
        out.push_str("---:|");
    }
    out.push('\n');

    for (period, row) in table.periods.iter().zip(&table.counts) {
        out.push_str(&format!("| {} |", period));
        for count in row {
            out.push_str(&format!(" {} |", count));
        }
        out.push('\n');
    }

    out
}

/// Generate the report footer.
fn generate_footer() -> String {
    "---\n\n*Report generated by trialtrends*\n".to_string()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Generate a long-form CSV with one row per (field, period).
///
/// Pivots from one aggregation share their columns, so a single header
/// covers every field.
pub fn generate_csv_report(pivots: &[FieldPivot]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let columns = pivots
        .iter()
        .find(|p| !p.table.columns.is_empty())
        .map(|p| p.table.columns.clone())
        .unwrap_or_default();

    let mut header = vec![
        "field".to_string(),
        "period".to_string(),
        "period_start".to_string(),
    ];
    header.extend(columns.iter().map(ToString::to_string));
    writer.write_record(&header)?;

    for pivot in pivots {
        for (period, row) in pivot.table.periods.iter().zip(&pivot.table.counts) {
            let mut record = vec![
                pivot.field.clone(),
                period.to_string(),
                period
                    .start_date()
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default(),
            ];
            record.extend(row.iter().map(u64::to_string));
            writer.write_record(&record)?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV report: {}", e))?;
    String::from_utf8(bytes).context("CSV report is not valid UTF-8")
}
