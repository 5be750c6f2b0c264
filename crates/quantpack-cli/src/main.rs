//! Quantpack CLI - Command Line Interface for the Quantpack Engine
//!
//! The main entry point for the `quantpack` tool.
//!
//! # Commands
//! - `quantpack encode` - Quantize a tensor bundle into an archive
//! - `quantpack decode` - Decode an archive back to f32 tensors
//! - `quantpack stats` - Show compression statistics of an archive
//! - `quantpack inspect` - Preview the scheme chosen for each tensor
//! - `quantpack list` - List schemes, policies and formats
//!
//! # Exit Codes
//! - `0` success
//! - `1` other failure
//! - `2` invalid shape
//! - `3` corrupt payload
//! - `4` tensor not found
//! - `5` I/O failure
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// CLI-specific allowances
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::format_push_string)]
#![allow(clippy::items_after_statements)]

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod error;

use cli::{Cli, Commands};
use error::CliResult;

fn main() {
    let cli = Cli::parse();
    commands::utils::set_quiet(cli.quiet);
    init_tracing(cli.verbose, cli.quiet);

    if let Err(e) = run(cli) {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

/// Logs go to stderr so `stats --format json` stays machine readable.
fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn run(cli: Cli) -> CliResult<()> {
    match cli.command {
        Commands::Encode(args) => commands::encode::execute(args),
        Commands::Decode(args) => commands::decode::execute(args),
        Commands::Stats(args) => commands::stats::execute(args),
        Commands::Inspect(args) => commands::inspect::execute(args),
        Commands::List => commands::list::execute(),
    }
}
