//! Quantpack Quant - Tensor Quantization Engine
//!
//! Re-encodes f32 weight tensors into compact, lossy representations with an
//! exact mapping back to floating point. Supported schemes:
//!
//! - **Int8Linear**: whole-tensor affine 8-bit codes
//! - **Int4Packed**: whole-tensor affine 4-bit codes, two per byte
//! - **BlockInt8**: affine 8-bit codes with one mapping per block
//! - **Float16**: half-precision narrowing
//! - **Passthrough**: original f32 bytes
//!
//! A [`SchemePolicy`] picks a scheme per tensor from its name and shape.
//!
//! # Example
//! ```
//! use quantpack_quant::{dequantize_tensor, quantize_with_policy, SchemePolicy, Tensor};
//!
//! let tensor = Tensor::new("fc.weight", vec![32, 64], vec![0.25; 2048]).unwrap();
//! let quantized = quantize_with_policy(&tensor, &SchemePolicy::default()).unwrap();
//! let restored = dequantize_tensor(&quantized).unwrap();
//! assert_eq!(restored.shape(), tensor.shape());
//! ```
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

pub mod catalog;
pub mod dequantize;
pub mod error;
pub mod prune;
pub mod quantize;
pub mod selector;
pub mod types;

pub use catalog::TensorCatalog;
pub use dequantize::{dequantize_block, dequantize_tensor, dequantize_values};
pub use error::{ErrorKind, QuantError, QuantResult};
pub use prune::{magnitude_prune, prune_catalog, prune_rows, PruneConfig, PruneOutcome, PruneSummary};
pub use quantize::{
    compute_quantization_error, compute_quantization_stats, quantize_catalog, quantize_tensor,
    quantize_with_policy, QuantizationStats,
};
pub use selector::{GlobalMode, SchemePolicy, DEFAULT_CRITICAL_PATTERNS};
pub use types::{AffineParams, DType, QuantParams, QuantizedTensor, Scheme, Tensor, TensorInfo};

// =============================================================================
// Constants
// =============================================================================

/// Default block size for block-wise quantization.
pub const DEFAULT_BLOCK_SIZE: usize = 128;

/// Element count above which a matrix is quantized with the global mode.
pub const DEFAULT_LARGE_THRESHOLD: usize = 1000;

// =============================================================================
// Tests
// =============================================================================
