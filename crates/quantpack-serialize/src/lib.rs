//! Quantpack Serialize - Archive Storage for Quantized Tensors
//!
//! This crate stores quantized tensors in a single self-describing archive,
//! reads them back by name, reports compression, and drives whole catalogs
//! through the encode and decode pipelines.
//!
//! # Supported Formats
//!
//! - **Quantpack Archive** (.qpak) - Quantized records with a random-access manifest
//! - **JSON** (.json) - Plain f32 tensor bundles
//! - **`SafeTensors`** (.safetensors) - Plain tensors (optional feature)
//!
//! # Example
//!
//! ```
//! use std::io::Cursor;
//! use quantpack_quant::{Tensor, TensorCatalog};
//! use quantpack_serialize::{decode_archive, encode_catalog, ArchiveReader, ArchiveWriter, EncodeOptions};
//!
//! let catalog = TensorCatalog::from_tensors(vec![
//!     Tensor::new("fc.weight", vec![40, 40], vec![0.5; 1600]).unwrap(),
//! ]).unwrap();
//!
//! let mut writer = ArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
//! encode_catalog(&catalog, &EncodeOptions::default(), &mut writer, |_| {}).unwrap();
//! let (cursor, summary) = writer.finish().unwrap();
//! assert_eq!(summary.report().tensor_count, 1);
//!
//! let mut reader = ArchiveReader::open(Cursor::new(cursor.into_inner())).unwrap();
//! let restored = decode_archive(&mut reader).unwrap();
//! assert_eq!(restored.get("fc.weight").unwrap().values()[0], 0.5);
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::trivially_copy_pass_by_ref)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::too_many_lines)]

// =============================================================================
// Modules
// =============================================================================

mod archive;
mod bundle;
mod error;
mod format;
mod manifest;
mod pipeline;
mod report;

// =============================================================================
// Re-exports
// =============================================================================

pub use archive::{save_archive, ArchiveReader, ArchiveSummary, ArchiveWriter};
pub use bundle::{load_catalog, save_catalog, sniff_format, TensorBundle, TensorData};
pub use error::{SerializeError, SerializeResult};
pub use format::{
    detect_format, detect_format_from_bytes, encode_record, header_len, read_record_header, Format,
    RecordHeader, FORMAT_VERSION, MAGIC, PREAMBLE_LEN,
};
pub use manifest::{Manifest, ManifestEntry};
pub use pipeline::{
    decode_archive, decode_tensor, encode_catalog, thread_pool, CancelToken, EncodeOptions,
    EncodeStats, DEFAULT_BATCH_SIZE,
};
pub use report::{format_size, CompressionReport, SchemeTotals};

// =============================================================================
// Tests
// =============================================================================
