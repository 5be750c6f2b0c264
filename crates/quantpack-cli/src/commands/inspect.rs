//! Inspect - Tensor Catalog Inspection Command
//!
//! Lists the tensors of a bundle or archive together with the scheme the
//! policy would pick and the resulting encoded size, without writing anything.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::collections::BTreeMap;

use colored::Colorize;
use quantpack_quant::{SchemePolicy, TensorCatalog};
use quantpack_serialize::{format_size, load_catalog, sniff_format};

use super::utils::{format_number, format_shape, require_input};
use crate::cli::InspectArgs;
use crate::config::QuantpackConfig;
use crate::error::CliResult;

/// One planned tensor.
#[derive(Debug, Clone, PartialEq)]
struct PlanRow {
    name: String,
    shape: Vec<usize>,
    numel: usize,
    scheme: String,
    label: &'static str,
    encoded_bytes: u64,
}

/// Plans every tensor of `catalog` under `policy`.
fn plan_rows(catalog: &TensorCatalog, policy: &SchemePolicy) -> Vec<PlanRow> {
    catalog
        .iter()
        .map(|tensor| {
            let scheme = policy.select_tensor(tensor);
            let numel = tensor.numel();
            PlanRow {
                name: tensor.name().to_string(),
                shape: tensor.shape().to_vec(),
                numel,
                scheme: scheme.to_string(),
                label: scheme.label(),
                encoded_bytes: scheme
                    .payload_len(numel)
                    .saturating_add(scheme.param_count(numel).saturating_mul(8))
                    as u64,
            }
        })
        .collect()
}

/// Execute the `inspect` command
pub fn execute(args: InspectArgs) -> CliResult<()> {
    require_input(&args.input)?;

    let config = QuantpackConfig::resolve(args.config.as_deref())?;
    let mut policy = config.apply_policy(SchemePolicy::default())?;
    if let Some(spec) = &args.policy {
        let parsed = SchemePolicy::parse(spec)?;
        policy = policy.with_mode(parsed.mode());
        if spec.contains(':') {
            policy = policy.with_block_size(parsed.block_size())?;
        }
    }

    let format = sniff_format(&args.input)?;
    let catalog = load_catalog(&args.input)?;
    let rows = plan_rows(&catalog, &policy);

    println!();
    println!("{}", "Tensor Catalog".bold().underline());
    println!();
    println!("  {}: {}", "Input".dimmed(), args.input.display());
    println!("  {}: {}", "Format".dimmed(), format);
    println!("  {}: {}", "Policy".dimmed(), policy.mode());
    println!("  {}: {}", "Tensors".dimmed(), format_number(catalog.len()));
    println!("  {}: {}", "Parameters".dimmed(), format_number(catalog.total_params()));
    println!();

    println!(
        "  {:<40} {:<16} {:>12} {:<16} {:>12}",
        "Name", "Shape", "Params", "Scheme", "Encoded"
    );
    println!("  {}", "-".repeat(100));
    let mut per_scheme: BTreeMap<&str, (usize, u64)> = BTreeMap::new();
    for row in &rows {
        println!(
            "  {:<40} {:<16} {:>12} {:<16} {:>12}",
            row.name,
            format_shape(&row.shape),
            format_number(row.numel),
            row.scheme,
            format_size(row.encoded_bytes)
        );
        let slot = per_scheme.entry(row.label).or_default();
        slot.0 += 1;
        slot.1 += row.encoded_bytes;
    }

    let original = catalog.original_bytes() as u64;
    let encoded: u64 = rows.iter().map(|r| r.encoded_bytes).sum();
    println!();
    for (label, (count, bytes)) in &per_scheme {
        println!("  {:<14} {:>6} tensors  {:>12}", label, count, format_size(*bytes));
    }
    println!();
    println!(
        "  {}: {} -> {} ({:.2}x)",
        "Estimated".dimmed(),
        format_size(original),
        format_size(encoded),
        if encoded == 0 { 0.0 } else { original as f64 / encoded as f64 }
    );
    println!();
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
