//! Utils - Common Utilities for CLI Commands
//!
//! Shared output helpers used across CLI commands.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{CliError, CliResult};

static QUIET: AtomicBool = AtomicBool::new(false);

/// Silences the print helpers and progress bars for the rest of the process.
pub fn set_quiet(quiet: bool) {
    QUIET.store(quiet, Ordering::Relaxed);
}

fn is_quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

// =============================================================================
// Output Formatting
// =============================================================================

/// Print a success message
pub fn print_success(message: &str) {
    if !is_quiet() {
        println!("{} {}", "✓".green().bold(), message);
    }
}

/// Print an info message
pub fn print_info(message: &str) {
    if !is_quiet() {
        println!("{} {}", "ℹ".blue().bold(), message);
    }
}

/// Print a warning message
pub fn print_warning(message: &str) {
    if !is_quiet() {
        println!("{} {}", "⚠".yellow().bold(), message);
    }
}

/// Print a header
pub fn print_header(title: &str) {
    if !is_quiet() {
        println!();
        println!("{}", title.bold().underline());
        println!();
    }
}

/// Print a key-value pair
pub fn print_kv(key: &str, value: &str) {
    if !is_quiet() {
        println!("  {}: {}", key.dimmed(), value);
    }
}

/// Print a plain line
pub fn print_line(line: &str) {
    if !is_quiet() {
        println!("{line}");
    }
}

// =============================================================================
// Progress Bars
// =============================================================================

/// Create a per-tensor progress bar, hidden in quiet mode
pub fn tensor_progress_bar(total: u64) -> ProgressBar {
    if is_quiet() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

// =============================================================================
// File Operations
// =============================================================================

/// Fails with a not-found I/O error when `path` does not exist.
pub fn require_input(path: &Path) -> CliResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(CliError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("input not found: {}", path.display()),
        )))
    }
}

/// Fails when `path` exists and overwriting was not requested.
pub fn check_output(path: &Path, overwrite: bool) -> CliResult<()> {
    if path.exists() && !overwrite {
        return Err(CliError::OutputExists(path.display().to_string()));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

// =============================================================================
// Number Formatting
// =============================================================================

/// Format a number with thousands separators
pub fn format_number(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Format a shape as `[a, b, c]`
pub fn format_shape(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(ToString::to_string).collect();
    format!("[{}]", dims.join(", "))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn test_format_shape() {
        assert_eq!(format_shape(&[2, 3]), "[2, 3]");
        assert_eq!(format_shape(&[]), "[]");
    }

    #[test]
    fn test_check_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.qpak");
        check_output(&path, false).unwrap();
        assert!(path.parent().unwrap().exists());

        std::fs::write(&path, b"x").unwrap();
        assert!(matches!(check_output(&path, false), Err(CliError::OutputExists(_))));
        assert!(check_output(&path, true).is_ok());
    }

    #[test]
    fn test_require_input() {
        let err = require_input(Path::new("/no/such/file.json")).unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }
}
