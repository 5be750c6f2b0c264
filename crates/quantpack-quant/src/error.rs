//! Quantization Error Types
//!
//! Error types for catalog, codec and pruning operations.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use thiserror::Error;

/// Result type for quantization operations.
pub type QuantResult<T> = Result<T, QuantError>;

/// Errors that can occur during quantization.
#[derive(Error, Debug)]
pub enum QuantError {
    /// Zero-element or malformed tensor given to encode.
    #[error("Invalid shape for tensor '{name}': {reason}")]
    InvalidShape {
        /// Offending tensor.
        name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Encoded data does not match its declared shape or scheme.
    #[error("Corrupt payload for tensor '{name}': {reason}")]
    CorruptPayload {
        /// Offending tensor.
        name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Manifest lookup miss.
    #[error("Tensor not found: {0}")]
    NotFound(String),

    /// A quantized code left its target range. Never expected once clamping is applied.
    #[error("Numerical overflow while quantizing tensor '{name}'")]
    Overflow {
        /// Offending tensor.
        name: String,
    },

    /// Invalid block size.
    #[error("Invalid block size: {0}")]
    InvalidBlockSize(usize),

    /// Pruning ratio outside `[0, 1)`.
    #[error("Invalid prune ratio: {0}")]
    InvalidPruneRatio(f64),

    /// Unparseable scheme policy.
    #[error("Invalid scheme policy: {0}")]
    InvalidPolicy(String),

    /// A long-running job was cancelled between tensors.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Coarse classification of failures, stable across crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Zero-element or malformed input tensor.
    InvalidShape,
    /// Encoded data inconsistent with its metadata.
    CorruptPayload,
    /// Lookup of an unknown tensor name.
    NotFound,
    /// Code outside its target range; a defect, never user error.
    Overflow,
    /// Failure of the underlying storage.
    Io,
    /// Invalid configuration or cancellation.
    Other,
}

impl QuantError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuantError::InvalidShape { .. } => ErrorKind::InvalidShape,
            QuantError::CorruptPayload { .. } => ErrorKind::CorruptPayload,
            QuantError::NotFound(_) => ErrorKind::NotFound,
            QuantError::Overflow { .. } => ErrorKind::Overflow,
            QuantError::InvalidBlockSize(_)
            | QuantError::InvalidPruneRatio(_)
            | QuantError::InvalidPolicy(_)
            | QuantError::Cancelled => ErrorKind::Other,
        }
    }

    /// Builds an [`QuantError::InvalidShape`] for `name`.
    pub fn invalid_shape(name: &str, reason: impl Into<String>) -> Self {
        QuantError::InvalidShape {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Builds a [`QuantError::CorruptPayload`] for `name`.
    pub fn corrupt(name: &str, reason: impl Into<String>) -> Self {
        QuantError::CorruptPayload {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns the name of the tensor this error is about, if any.
    pub fn tensor_name(&self) -> Option<&str> {
        match self {
            QuantError::InvalidShape { name, .. }
            | QuantError::CorruptPayload { name, .. }
            | QuantError::Overflow { name } => Some(name),
            QuantError::NotFound(name) => Some(name),
            _ => None,
        }
    }
}
