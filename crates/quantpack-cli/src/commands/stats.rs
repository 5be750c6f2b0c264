//! Stats - Archive Statistics Command
//!
//! Prints the compression report of an archive as text or JSON. The report
//! is the requested output, so it is printed even in quiet mode.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use colored::Colorize;
use quantpack_serialize::{format_size, ArchiveReader, CompressionReport, Manifest};
use serde::Serialize;

use super::utils::{format_number, format_shape, require_input};
use crate::cli::{OutputFormat, StatsArgs};
use crate::error::CliResult;

// =============================================================================
// Report Document
// =============================================================================

/// Per-tensor row of a detailed report.
#[derive(Debug, Serialize)]
struct TensorRow {
    name: String,
    scheme: String,
    shape: Vec<usize>,
    original_bytes: u64,
    encoded_bytes: u64,
    ratio: f64,
}

/// JSON document printed by `stats --format json`.
#[derive(Debug, Serialize)]
struct StatsDocument<'a> {
    archive: String,
    #[serde(flatten)]
    report: &'a CompressionReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    tensors: Option<Vec<TensorRow>>,
}

fn tensor_rows(manifest: &Manifest) -> Vec<TensorRow> {
    manifest
        .iter()
        .map(|entry| TensorRow {
            name: entry.name.clone(),
            scheme: entry.scheme.to_string(),
            shape: entry.shape.clone(),
            original_bytes: entry.original_bytes(),
            encoded_bytes: entry.encoded_bytes(),
            ratio: entry.compression_ratio(),
        })
        .collect()
}

// =============================================================================
// Execute Command
// =============================================================================

/// Execute the `stats` command
pub fn execute(args: StatsArgs) -> CliResult<()> {
    require_input(&args.archive)?;
    let reader = ArchiveReader::open_path(&args.archive)?;
    let report = reader.report();

    match args.format {
        OutputFormat::Json => {
            let document = StatsDocument {
                archive: args.archive.display().to_string(),
                report: &report,
                tensors: args.detailed.then(|| tensor_rows(reader.manifest())),
            };
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        OutputFormat::Text => {
            print_text(&args, &report, reader.manifest());
        }
    }
    Ok(())
}

fn print_text(args: &StatsArgs, report: &CompressionReport, manifest: &Manifest) {
    println!();
    println!("{}", "Archive Statistics".bold().underline());
    println!();
    println!("  {}: {}", "Archive".dimmed(), args.archive.display());
    println!("  {}: {}", "Tensors".dimmed(), format_number(report.tensor_count));
    println!("  {}: {}", "Parameters".dimmed(), format_number(report.total_params as usize));
    println!("  {}: {}", "Original size".dimmed(), format_size(report.total_original));
    println!("  {}: {}", "Encoded size".dimmed(), format_size(report.total_encoded));
    println!("  {}: {}", "Archive size".dimmed(), format_size(report.archive_bytes));
    println!(
        "  {}: {:.2}x ({:.2}x including headers)",
        "Compression".dimmed(),
        report.overall_ratio,
        report.archive_ratio
    );
    println!(
        "  {}: {} ({:.1}%)",
        "Saved".dimmed(),
        format_signed_size(report.bytes_saved),
        report.savings_percent()
    );

    println!();
    println!("{}", "By Scheme".bold().underline());
    println!();
    println!(
        "  {:<14} {:>8} {:>12} {:>12} {:>8}",
        "Scheme", "Tensors", "Original", "Encoded", "Ratio"
    );
    println!("  {}", "-".repeat(58));
    for (label, totals) in &report.per_scheme {
        println!(
            "  {:<14} {:>8} {:>12} {:>12} {:>7.2}x",
            label,
            totals.count,
            format_size(totals.original_bytes),
            format_size(totals.encoded_bytes),
            totals.ratio()
        );
    }

    if args.detailed {
        println!();
        println!("{}", "Tensors".bold().underline());
        println!();
        println!(
            "  {:<40} {:<16} {:<16} {:>12} {:>8}",
            "Name", "Scheme", "Shape", "Encoded", "Ratio"
        );
        println!("  {}", "-".repeat(96));
        for row in tensor_rows(manifest) {
            println!(
                "  {:<40} {:<16} {:<16} {:>12} {:>7.2}x",
                row.name,
                row.scheme,
                format_shape(&row.shape),
                format_size(row.encoded_bytes),
                row.ratio
            );
        }
    }
    println!();
}

fn format_signed_size(bytes: i64) -> String {
    if bytes < 0 {
        format!("-{}", format_size(bytes.unsigned_abs()))
    } else {
        format_size(bytes.unsigned_abs())
    }
}

// =============================================================================
// Tests
// =============================================================================
