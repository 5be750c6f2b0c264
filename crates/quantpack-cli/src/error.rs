//! Error - CLI Error Types
//!
//! Defines error types for CLI operations and their process exit codes.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use quantpack_quant::{ErrorKind, QuantError};
use quantpack_serialize::SerializeError;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Quantization error
    #[error(transparent)]
    Quant(#[from] QuantError),

    /// Archive or bundle error
    #[error(transparent)]
    Serialize(#[from] SerializeError),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Output file already exists
    #[error("Output already exists: {0} (use --overwrite to replace it)")]
    OutputExists(String),

    /// Decoded values exceeded their quantization step
    #[error("Verification failed: {0}")]
    Verification(String),
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

// =============================================================================
// Exit Codes
// =============================================================================

impl CliError {
    /// Failure classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CliError::Quant(e) => e.kind(),
            CliError::Serialize(e) => e.kind(),
            CliError::Io(_) => ErrorKind::Io,
            CliError::Config(_)
            | CliError::InvalidArgument(_)
            | CliError::OutputExists(_)
            | CliError::Verification(_) => ErrorKind::Other,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::InvalidShape => 2,
            ErrorKind::CorruptPayload => 3,
            ErrorKind::NotFound => 4,
            ErrorKind::Io => 5,
            ErrorKind::Overflow | ErrorKind::Other => 1,
        }
    }
}

// =============================================================================
// Error Conversion
// =============================================================================

impl From<toml::de::Error> for CliError {
    fn from(e: toml::de::Error) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Serialize(SerializeError::Json(e))
    }
}

// =============================================================================
// Tests
// =============================================================================
