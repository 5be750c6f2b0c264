//! List - Available Schemes, Policies and Formats
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use colored::Colorize;
use quantpack_quant::{Scheme, DEFAULT_BLOCK_SIZE, DEFAULT_CRITICAL_PATTERNS, DEFAULT_LARGE_THRESHOLD};
use quantpack_serialize::Format;

use crate::error::CliResult;

fn describe(scheme: Scheme) -> &'static str {
    match scheme {
        Scheme::Passthrough => "Original f32 bytes, used for scalars",
        Scheme::Float16 => "Half precision, used for vectors and small matrices",
        Scheme::Int8Linear => "Whole-tensor affine int8, one scale and zero point",
        Scheme::Int4Packed => "Whole-tensor affine int4, two codes per byte",
        Scheme::BlockInt8 { .. } => "Affine int8 with a scale and zero point per block",
    }
}

fn section(title: &str) {
    println!();
    println!("{}", title.bold().underline());
    println!();
}

/// Execute the `list` command
pub fn execute() -> CliResult<()> {
    let schemes = [
        Scheme::Passthrough,
        Scheme::Float16,
        Scheme::Int8Linear,
        Scheme::Int4Packed,
        Scheme::BlockInt8 {
            block_size: DEFAULT_BLOCK_SIZE,
        },
    ];

    section("Available Schemes");
    println!("  {:<14} {:>5} {:>4}  Description", "Scheme", "Bits", "Tag");
    println!("  {}", "-".repeat(76));
    for scheme in schemes {
        println!(
            "  {:<14} {:>5} {:>4}  {}",
            scheme.label(),
            scheme.bits_per_value(),
            scheme.tag(),
            describe(scheme)
        );
    }

    section("Policies");
    println!("  int8       Large matrices as int8_linear (default)");
    println!("  int4       Large matrices as int4_packed");
    println!("  f16        Everything except scalars as float16");
    println!("  block      Large matrices as block_int8, {DEFAULT_BLOCK_SIZE} values per block");
    println!("  block:N    Large matrices as block_int8, N values per block");
    println!();
    println!(
        "  Matrices with more than {DEFAULT_LARGE_THRESHOLD} elements count as large. Names containing"
    );
    println!(
        "  {} always use int8_linear.",
        DEFAULT_CRITICAL_PATTERNS.join(", ")
    );

    section("Formats");
    for format in Format::all() {
        println!("  - {} (.{})", format.name(), format.extension());
    }

    section("Example Usage");
    println!("  # Quantize a bundle with int4 for large matrices");
    println!("  quantpack encode int4 model.json model.qpak");
    println!();
    println!("  # Block-wise int8 with 64 values per block, checked after writing");
    println!("  quantpack encode block:64 model.safetensors model.qpak --verify");
    println!();
    println!("  # Show compression statistics");
    println!("  quantpack stats model.qpak --detailed");
    println!();
    println!("  # Restore one tensor");
    println!("  quantpack decode model.qpak fc.json --tensor fc.weight");
    println!();

    Ok(())
}
