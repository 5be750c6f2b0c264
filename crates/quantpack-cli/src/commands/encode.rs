//! Encode - Tensor Quantization Command
//!
//! Loads a tensor bundle, selects a scheme per tensor, and writes the
//! quantized archive. The archive is written next to its destination under a
//! `.partial` name and renamed into place only once every record is
//! committed, so a failed run never leaves a half-written archive behind.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::fs;
use std::path::{Path, PathBuf};

use indicatif::ProgressBar;
use quantpack_quant::{
    compute_quantization_stats, dequantize_tensor, GlobalMode, QuantError, Scheme, SchemePolicy,
    TensorCatalog,
};
use quantpack_serialize::{
    encode_catalog, format_size, load_catalog, ArchiveReader, ArchiveSummary, ArchiveWriter,
    CancelToken, EncodeOptions, DEFAULT_BATCH_SIZE,
};
use tracing::warn;

use super::utils::{
    check_output, format_number, print_header, print_info, print_kv, print_line, print_success,
    print_warning, require_input, tensor_progress_bar,
};
use crate::cli::EncodeArgs;
use crate::config::QuantpackConfig;
use crate::error::{CliError, CliResult};

// =============================================================================
// Execute Command
// =============================================================================

/// Execute the `encode` command
pub fn execute(args: EncodeArgs) -> CliResult<()> {
    print_header("Tensor Quantization");

    require_input(&args.input)?;
    check_output(&args.output, args.overwrite)?;

    let config = QuantpackConfig::resolve(args.config.as_deref())?;
    let policy = build_policy(&args, &config)?;
    let options = EncodeOptions {
        policy,
        prune: config.prune_config(args.prune_ratio)?,
        threads: args.threads.or(config.runtime.threads).unwrap_or(0),
        batch_size: args
            .batch_size
            .or(config.runtime.batch_size)
            .unwrap_or(DEFAULT_BATCH_SIZE),
        cancel: CancelToken::new(),
    };

    print_kv("Input", &args.input.display().to_string());
    print_kv("Output", &args.output.display().to_string());
    print_kv("Policy", &describe_policy(&options.policy));
    if let Some(prune) = &options.prune {
        print_kv(
            "Pruning",
            &format!("{:.1}% of smallest weights per matrix", prune.ratio() * 100.0),
        );
    }
    print_line("");

    print_info("Loading tensors...");
    let catalog = load_catalog(&args.input)?;
    print_kv("Tensors", &format_number(catalog.len()));
    print_kv("Parameters", &format_number(catalog.total_params()));
    print_kv("Original size", &format_size(catalog.original_bytes() as u64));

    print_info("Quantizing...");
    let summary = write_archive(&catalog, &options, &args.output)?;
    let report = summary.report();

    print_success("Quantization complete!");
    print_header("Results");
    print_kv("Output file", &args.output.display().to_string());
    print_kv("Archive size", &format_size(report.archive_bytes));
    print_kv("Compression", &format!("{:.2}x", report.overall_ratio));
    print_kv("Size reduction", &format!("{:.1}%", report.savings_percent()));
    for (label, totals) in &report.per_scheme {
        print_kv(
            label,
            &format!(
                "{} tensors, {} -> {}",
                totals.count,
                format_size(totals.original_bytes),
                format_size(totals.encoded_bytes)
            ),
        );
    }

    if args.verify {
        verify_archive(&catalog, &args.output, options.prune.is_some())?;
    }

    Ok(())
}

// =============================================================================
// Policy
// =============================================================================

/// Layers the positional policy and flags over the configured policy.
fn build_policy(args: &EncodeArgs, config: &QuantpackConfig) -> CliResult<SchemePolicy> {
    let parsed = SchemePolicy::parse(&args.policy)?;
    let mut policy = config.apply_policy(SchemePolicy::default())?.with_mode(parsed.mode());

    // "block:N" carries its own size; plain "block" keeps the configured one.
    if args.policy.contains(':') {
        policy = policy.with_block_size(parsed.block_size())?;
    }
    if let Some(block_size) = args.block_size {
        policy = policy.with_block_size(block_size)?;
    }
    if let Some(threshold) = args.threshold {
        policy = policy.with_large_threshold(threshold);
    }
    if !args.critical.is_empty() {
        policy = policy.with_critical(args.critical.iter().cloned());
    }
    Ok(policy)
}

fn describe_policy(policy: &SchemePolicy) -> String {
    let mut text = format!(
        "{} above {} elements",
        policy.mode(),
        format_number(policy.large_threshold())
    );
    if policy.mode() == GlobalMode::Block {
        text.push_str(&format!(" (block size {})", policy.block_size()));
    }
    if !policy.critical().is_empty() {
        text.push_str(&format!(", int8 for {}", policy.critical().join(", ")));
    }
    text
}

// =============================================================================
// Archive Writing
// =============================================================================

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    output.with_file_name(name)
}

fn write_archive(
    catalog: &TensorCatalog,
    options: &EncodeOptions,
    output: &Path,
) -> CliResult<ArchiveSummary> {
    let partial = partial_path(output);
    let pb = tensor_progress_bar(catalog.len() as u64);
    let result = encode_into(&partial, catalog, options, &pb);
    pb.finish_and_clear();

    match result {
        Ok(summary) => {
            fs::rename(&partial, output)?;
            Ok(summary)
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&partial) {
                warn!(path = %partial.display(), error = %cleanup, "could not remove partial archive");
            }
            Err(e)
        }
    }
}

fn encode_into(
    path: &Path,
    catalog: &TensorCatalog,
    options: &EncodeOptions,
    pb: &ProgressBar,
) -> CliResult<ArchiveSummary> {
    let mut writer = ArchiveWriter::create(path)?;
    let stats = encode_catalog(catalog, options, &mut writer, |entry| {
        pb.set_message(entry.name.clone());
        pb.inc(1);
    })?;
    if stats.prune.tensors_pruned > 0 {
        print_kv(
            "Pruned",
            &format!(
                "{} values across {} tensors",
                format_number(stats.prune.values_zeroed),
                stats.prune.tensors_pruned
            ),
        );
    }
    Ok(writer.finish_file()?)
}

// =============================================================================
// Verification
// =============================================================================

/// Decodes the written archive and compares it with the input.
///
/// Without pruning, affine schemes must reconstruct every value within one
/// quantization step and passthrough must be exact.
fn verify_archive(original: &TensorCatalog, archive: &Path, pruned: bool) -> CliResult<()> {
    print_header("Verification");
    if pruned {
        print_warning("Pruning was applied; errors include the pruned weights.");
    }

    let mut reader = ArchiveReader::open_path(archive)?;
    let records = reader.read_all()?;

    print_line(&format!(
        "  {:<40} {:<14} {:>12} {:>12}",
        "Tensor", "Scheme", "RMSE", "Max error"
    ));
    print_line(&format!("  {}", "-".repeat(80)));

    let mut failures = Vec::new();
    for record in &records {
        let source = original
            .get(&record.name)
            .ok_or_else(|| QuantError::NotFound(record.name.clone()))?;
        let decoded = dequantize_tensor(record)?;
        let stats = compute_quantization_stats(source.values(), decoded.values());

        print_line(&format!(
            "  {:<40} {:<14} {:>12.3e} {:>12.3e}",
            record.name,
            record.scheme.label(),
            stats.rmse,
            stats.max_error
        ));

        if pruned {
            continue;
        }
        let max_abs = source.values().iter().fold(0.0f64, |m, v| m.max(f64::from(v.abs())));
        let bound = match record.scheme {
            Scheme::Passthrough => Some(0.0),
            Scheme::Float16 => None,
            _ => Some(record.params.max_step() + f64::from(f32::EPSILON) * max_abs),
        };
        if let Some(bound) = bound {
            if f64::from(stats.max_error) > bound {
                failures.push(format!(
                    "{}: max error {:.3e} exceeds {:.3e}",
                    record.name, stats.max_error, bound
                ));
            }
        }
    }

    if failures.is_empty() {
        print_success(&format!("{} tensors within tolerance", records.len()));
        Ok(())
    } else {
        Err(CliError::Verification(failures.join("; ")))
    }
}

// =============================================================================
// Tests
// =============================================================================
