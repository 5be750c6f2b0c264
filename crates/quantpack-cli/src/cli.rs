//! CLI - Command Line Interface Definitions
//!
//! Defines the CLI structure using clap derive macros.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// Quantpack - tensor quantization for model weights
#[derive(Parser, Debug)]
#[command(
    name = "quantpack",
    author = "AutomataNexus Development Team",
    version,
    about = "Quantpack CLI - Quantize model weights into compact archives",
    long_about = "Quantpack re-encodes f32 weight tensors into int8, int4, block-wise int8 \
                  or float16 representations, chosen per tensor by a scheme policy, and \
                  stores them in a single archive that can be decoded back to f32."
)]
pub struct Cli {
    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors and requested data
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Quantize a tensor bundle into an archive
    Encode(EncodeArgs),

    /// Decode an archive back to f32 tensors
    Decode(DecodeArgs),

    /// Show compression statistics of an archive
    Stats(StatsArgs),

    /// List tensors and the scheme the policy would choose for each
    Inspect(InspectArgs),

    /// List available schemes, policies and formats
    List,
}

// =============================================================================
// Encode Command
// =============================================================================

/// Arguments for the `encode` command
#[derive(Parser, Debug)]
pub struct EncodeArgs {
    /// Scheme policy: int8, int4, f16, block or block:N
    pub policy: String,

    /// Input tensors (.json bundle, .safetensors, or an archive to re-encode)
    pub input: PathBuf,

    /// Output archive path
    pub output: PathBuf,

    /// Configuration file (defaults to ./quantpack.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Block size for block-wise int8
    #[arg(long)]
    pub block_size: Option<usize>,

    /// Name fragment marking a tensor as critical (repeatable, replaces defaults)
    #[arg(long = "critical", value_name = "PATTERN")]
    pub critical: Vec<String>,

    /// Element count above which matrices use the policy's global mode
    #[arg(long)]
    pub threshold: Option<usize>,

    /// Zero this fraction of the smallest weights of each matrix before encoding
    #[arg(long)]
    pub prune_ratio: Option<f64>,

    /// Worker threads (0 = all cores)
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,

    /// Tensors encoded per batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Decode the archive after writing and report reconstruction error
    #[arg(long)]
    pub verify: bool,

    /// Overwrite existing output file
    #[arg(long)]
    pub overwrite: bool,
}

// =============================================================================
// Decode Command
// =============================================================================

/// Arguments for the `decode` command
#[derive(Parser, Debug)]
pub struct DecodeArgs {
    /// Input archive
    pub input: PathBuf,

    /// Output tensors (.json or .safetensors)
    pub output: PathBuf,

    /// Decode only this tensor
    #[arg(short, long)]
    pub tensor: Option<String>,

    /// Worker threads (0 = all cores)
    #[arg(short = 'j', long, default_value = "0")]
    pub threads: usize,

    /// Overwrite existing output file
    #[arg(long)]
    pub overwrite: bool,
}

// =============================================================================
// Stats Command
// =============================================================================

/// Output format for reports
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON document on stdout
    Json,
}

/// Arguments for the `stats` command
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Archive to analyze
    pub archive: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Show per-tensor details
    #[arg(short, long)]
    pub detailed: bool,
}

// =============================================================================
// Inspect Command
// =============================================================================

/// Arguments for the `inspect` command
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Input tensors (.json bundle, .safetensors or archive)
    pub input: PathBuf,

    /// Scheme policy to plan with (defaults to the configured or int8 policy)
    #[arg(short, long)]
    pub policy: Option<String>,

    /// Configuration file (defaults to ./quantpack.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

// =============================================================================
// Tests
// =============================================================================
