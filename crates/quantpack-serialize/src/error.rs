//! Serialization Error Types
//!
//! Errors raised while reading or writing archives and tensor bundles.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use quantpack_quant::{ErrorKind, QuantError};
use thiserror::Error;

/// Result type for serialization operations.
pub type SerializeResult<T> = Result<T, SerializeError>;

/// Errors that can occur while moving tensors to and from storage.
#[derive(Error, Debug)]
pub enum SerializeError {
    /// Codec, catalog or manifest failure.
    #[error(transparent)]
    Quant(#[from] QuantError),

    /// Underlying storage failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON bundle.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The stream is not a quantpack archive, or its preamble is damaged.
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    /// Unsupported or unreadable bundle format.
    #[error("Format error: {0}")]
    Format(String),

    /// Worker pool could not be started.
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

impl SerializeError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SerializeError::Quant(e) => e.kind(),
            SerializeError::Io(_) => ErrorKind::Io,
            SerializeError::InvalidArchive(_) => ErrorKind::CorruptPayload,
            SerializeError::Json(_)
            | SerializeError::Format(_)
            | SerializeError::ThreadPool(_) => ErrorKind::Other,
        }
    }

    pub(crate) fn corrupt(name: &str, reason: impl Into<String>) -> Self {
        SerializeError::Quant(QuantError::corrupt(name, reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_follows_wrapped_error() {
        let err: SerializeError = QuantError::NotFound("a".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err: SerializeError = std::io::Error::other("disk gone").into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("disk gone"));

        assert_eq!(
            SerializeError::InvalidArchive("bad magic".into()).kind(),
            ErrorKind::CorruptPayload
        );
    }
}
