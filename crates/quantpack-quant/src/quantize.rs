//! Quantization Functions
//!
//! Functions for encoding tensors under a quantization scheme.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use half::f16;
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::catalog::TensorCatalog;
use crate::error::{QuantError, QuantResult};
use crate::selector::SchemePolicy;
use crate::types::{AffineParams, QuantParams, QuantizedTensor, Scheme, Tensor};

/// Signed 8-bit code range.
const INT8_MIN: f64 = -128.0;
const INT8_MAX: f64 = 127.0;

/// Unsigned 4-bit code range.
const INT4_MAX: f64 = 15.0;

// =============================================================================
// Public API
// =============================================================================

/// Quantizes a tensor under the given scheme.
///
/// # Arguments
/// * `tensor` - The input tensor to quantize
/// * `scheme` - The target scheme
///
/// # Returns
/// The encoded tensor, or `InvalidShape` for empty tensors and for non-finite
/// values under an affine scheme.
///
/// # Example
/// ```
/// use quantpack_quant::{quantize_tensor, Scheme, Tensor};
///
/// let tensor = Tensor::new("w", vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
/// let quantized = quantize_tensor(&tensor, Scheme::Int8Linear).unwrap();
/// assert_eq!(quantized.payload.len(), 4);
/// ```
pub fn quantize_tensor(tensor: &Tensor, scheme: Scheme) -> QuantResult<QuantizedTensor> {
    let name = tensor.name();
    let data = tensor.values();

    if data.is_empty() {
        return Err(QuantError::invalid_shape(
            name,
            format!("cannot encode zero-element tensor of shape {:?}", tensor.shape()),
        ));
    }

    let (params, payload) = match scheme {
        Scheme::Passthrough => (QuantParams::None, encode_f32(data)),
        Scheme::Float16 => (QuantParams::None, encode_f16(data)),
        Scheme::Int8Linear => {
            let (params, codes) = encode_int8(name, data)?;
            (QuantParams::Affine(params), codes)
        }
        Scheme::Int4Packed => {
            let (params, packed) = encode_int4(name, data)?;
            (QuantParams::Affine(params), packed)
        }
        Scheme::BlockInt8 { block_size } => {
            if block_size == 0 {
                return Err(QuantError::InvalidBlockSize(block_size));
            }
            let (params, codes) = encode_blocks(name, data, block_size)?;
            (QuantParams::Blocks(params), codes)
        }
    };

    debug_assert_eq!(payload.len(), scheme.payload_len(data.len()));
    debug!(
        tensor = name,
        scheme = %scheme,
        numel = data.len(),
        payload_bytes = payload.len(),
        "encoded tensor"
    );

    Ok(QuantizedTensor {
        name: name.to_string(),
        scheme,
        shape: tensor.shape().to_vec(),
        params,
        payload,
    })
}

/// Quantizes a tensor with the scheme the policy selects for it.
pub fn quantize_with_policy(tensor: &Tensor, policy: &SchemePolicy) -> QuantResult<QuantizedTensor> {
    quantize_tensor(tensor, policy.select_tensor(tensor))
}

/// Quantizes a whole catalog in parallel, preserving catalog order.
pub fn quantize_catalog(
    catalog: &TensorCatalog,
    policy: &SchemePolicy,
) -> QuantResult<Vec<QuantizedTensor>> {
    catalog
        .as_slice()
        .par_iter()
        .map(|tensor| quantize_with_policy(tensor, policy))
        .collect()
}

// =============================================================================
// Affine Parameters
// =============================================================================

/// Returns `(min, max)` of `data`, rejecting NaN and infinities.
fn value_range(name: &str, data: &[f32]) -> QuantResult<(f32, f32)> {
    if let Some(pos) = data.iter().position(|v| !v.is_finite()) {
        return Err(QuantError::invalid_shape(
            name,
            format!("non-finite value {} at index {}", data[pos], pos),
        ));
    }

    let (min, max) = data
        .par_iter()
        .fold(
            || (f32::INFINITY, f32::NEG_INFINITY),
            |(lo, hi), &v| (lo.min(v), hi.max(v)),
        )
        .reduce(
            || (f32::INFINITY, f32::NEG_INFINITY),
            |(a_lo, a_hi), (b_lo, b_hi)| (a_lo.min(b_lo), a_hi.max(b_hi)),
        );

    Ok((min, max))
}

/// Int8 parameters mapping `[min, max]` onto `[-127, 127]`.
///
/// A constant range uses `scale = 1` and `zero_point = -min` so every code is 0
/// and decoding returns the constant exactly.
pub(crate) fn int8_params(min: f32, max: f32) -> AffineParams {
    let (min, max) = (f64::from(min), f64::from(max));
    if max == min {
        return AffineParams::new(1.0, -min);
    }
    let scale = (max - min) / 254.0;
    AffineParams::new(scale, -127.0 - min / scale)
}

/// Int4 parameters in min-offset form: `code = (v - zero_point) / scale`.
pub(crate) fn int4_params(min: f32, max: f32) -> AffineParams {
    let (min, max) = (f64::from(min), f64::from(max));
    if max == min {
        return AffineParams::new(1.0, min);
    }
    AffineParams::new((max - min) / INT4_MAX, min)
}

// =============================================================================
// Int8
// =============================================================================

fn encode_int8(name: &str, data: &[f32]) -> QuantResult<(AffineParams, Vec<u8>)> {
    let (min, max) = value_range(name, data)?;
    let params = int8_params(min, max);
    let codes = int8_codes(name, data, params)?;
    Ok((params, codes))
}

/// Maps values to clamped signed 8-bit codes, stored as their two's complement bytes.
fn int8_codes(name: &str, data: &[f32], params: AffineParams) -> QuantResult<Vec<u8>> {
    data.par_iter()
        .map(|&v| {
            let q = (f64::from(v) / params.scale + params.zero_point)
                .round()
                .clamp(INT8_MIN, INT8_MAX);
            if !(INT8_MIN..=INT8_MAX).contains(&q) {
                return Err(QuantError::Overflow {
                    name: name.to_string(),
                });
            }
            Ok(q as i8 as u8)
        })
        .collect()
}

// =============================================================================
// Int4
// =============================================================================

fn encode_int4(name: &str, data: &[f32]) -> QuantResult<(AffineParams, Vec<u8>)> {
    let (min, max) = value_range(name, data)?;
    let params = int4_params(min, max);

    let packed = data
        .par_chunks(2)
        .map(|pair| {
            let mut byte = 0u8;
            for (i, &v) in pair.iter().enumerate() {
                let q = ((f64::from(v) - params.zero_point) / params.scale)
                    .round()
                    .clamp(0.0, INT4_MAX);
                if !(0.0..=INT4_MAX).contains(&q) {
                    return Err(QuantError::Overflow {
                        name: name.to_string(),
                    });
                }
                byte |= (q as u8 & 0x0F) << (4 * i);
            }
            Ok(byte)
        })
        .collect::<QuantResult<Vec<u8>>>()?;

    Ok((params, packed))
}

// =============================================================================
// Block-wise Int8
// =============================================================================

fn encode_blocks(
    name: &str,
    data: &[f32],
    block_size: usize,
) -> QuantResult<(Vec<AffineParams>, Vec<u8>)> {
    let blocks = data
        .par_chunks(block_size)
        .map(|block| {
            let (min, max) = value_range(name, block)?;
            let params = int8_params(min, max);
            let codes = int8_codes(name, block, params)?;
            Ok((params, codes))
        })
        .collect::<QuantResult<Vec<_>>>()?;

    let mut params = Vec::with_capacity(blocks.len());
    let mut payload = Vec::with_capacity(data.len());
    for (p, codes) in blocks {
        params.push(p);
        payload.extend_from_slice(&codes);
    }
    Ok((params, payload))
}

// =============================================================================
// Float16 / Passthrough
// =============================================================================

fn encode_f16(data: &[f32]) -> Vec<u8> {
    data.par_iter()
        .flat_map_iter(|&v| f16::from_f32(v).to_le_bytes())
        .collect()
}

fn encode_f32(data: &[f32]) -> Vec<u8> {
    data.iter().flat_map(|v| v.to_le_bytes()).collect()
}

// =============================================================================
// Error Statistics
// =============================================================================

/// Computes the quantization error (RMSE) between original and dequantized.
pub fn compute_quantization_error(original: &[f32], dequantized: &[f32]) -> f32 {
    if original.len() != dequantized.len() || original.is_empty() {
        return f32::INFINITY;
    }

    let mse: f64 = original
        .iter()
        .zip(dequantized.iter())
        .map(|(a, b)| (f64::from(*a) - f64::from(*b)).powi(2))
        .sum::<f64>()
        / original.len() as f64;

    mse.sqrt() as f32
}

/// Error statistics of one decoded tensor against its original.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuantizationStats {
    /// Root mean square error.
    pub rmse: f32,
    /// Maximum absolute error.
    pub max_error: f32,
    /// Mean absolute error.
    pub mean_error: f32,
}

/// Computes detailed quantization statistics.
pub fn compute_quantization_stats(original: &[f32], dequantized: &[f32]) -> QuantizationStats {
    if original.len() != dequantized.len() || original.is_empty() {
        return QuantizationStats {
            rmse: f32::INFINITY,
            max_error: f32::INFINITY,
            mean_error: f32::INFINITY,
        };
    }

    let n = original.len() as f64;
    let (sum_sq, sum_abs, max_abs) = original
        .iter()
        .zip(dequantized.iter())
        .map(|(a, b)| (f64::from(*a) - f64::from(*b)).abs())
        .fold((0.0f64, 0.0f64, 0.0f64), |(sq, abs, max), e| {
            (sq + e * e, abs + e, max.max(e))
        });

    QuantizationStats {
        rmse: (sum_sq / n).sqrt() as f32,
        max_error: max_abs as f32,
        mean_error: (sum_abs / n) as f32,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(values: Vec<f32>) -> Tensor {
        let n = values.len();
        Tensor::new("t", vec![n], values).unwrap()
    }

    #[test]
    fn test_int8_size_is_exact() {
        let t = tensor((0..1000).map(|x| x as f32 / 100.0).collect());
        let q = quantize_tensor(&t, Scheme::Int8Linear).unwrap();
        assert_eq!(q.payload.len(), 1000);
        assert_eq!(q.encoded_size(), 1000 + 16);
    }

    #[test]
    fn test_int4_size_is_exact() {
        let t = tensor((0..999).map(|x| x as f32).collect());
        let q = quantize_tensor(&t, Scheme::Int4Packed).unwrap();
        assert_eq!(q.payload.len(), 500);
        assert_eq!(q.encoded_size(), 500 + 16);
    }

    #[test]
    fn test_int8_codes_span_range() {
        let t = tensor(vec![-1.0, 0.0, 1.0]);
        let q = quantize_tensor(&t, Scheme::Int8Linear).unwrap();
        let codes: Vec<i8> = q.payload.iter().map(|&b| b as i8).collect();
        assert_eq!(codes, vec![-127, 0, 127]);
    }

    #[test]
    fn test_int8_clamps_instead_of_wrapping() {
        // Parameters taken from a narrower range push the top value past 127.
        let params = int8_params(0.0, 1.0);
        let codes = int8_codes("t", &[0.0, 1.0, 1.01, 5.0, -3.0], params).unwrap();
        let codes: Vec<i8> = codes.iter().map(|&b| b as i8).collect();
        assert_eq!(codes, vec![-127, 127, 127, 127, -128]);
    }

    #[test]
    fn test_degenerate_range_params() {
        let p = int8_params(0.25, 0.25);
        assert_eq!(p.scale, 1.0);
        let t = tensor(vec![0.0; 100]);
        let q = quantize_tensor(&t, Scheme::Int8Linear).unwrap();
        assert!(q.payload.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_int4_nibble_order() {
        let t = tensor(vec![0.0, 15.0, 15.0]);
        let q = quantize_tensor(&t, Scheme::Int4Packed).unwrap();
        assert_eq!(q.payload, vec![0xF0, 0x0F]);
    }

    #[test]
    fn test_block_params_per_block() {
        let t = tensor((0..300).map(|x| x as f32).collect());
        let q = quantize_tensor(&t, Scheme::BlockInt8 { block_size: 128 }).unwrap();
        match &q.params {
            QuantParams::Blocks(blocks) => {
                assert_eq!(blocks.len(), 3);
                assert!((blocks[0].scale - 127.0 / 254.0).abs() < 1e-12);
                assert!((blocks[2].scale - 43.0 / 254.0).abs() < 1e-12);
            }
            other => panic!("unexpected params {other:?}"),
        }
        assert_eq!(q.payload.len(), 300);
        assert_eq!(q.encoded_size(), 300 + 8 * 7);
    }

    #[test]
    fn test_rejects_empty_and_non_finite() {
        let empty = Tensor::new("e", vec![0, 3], vec![]).unwrap();
        assert!(matches!(
            quantize_tensor(&empty, Scheme::Int8Linear),
            Err(QuantError::InvalidShape { .. })
        ));
        assert!(matches!(
            quantize_tensor(&empty, Scheme::Passthrough),
            Err(QuantError::InvalidShape { .. })
        ));

        let nan = tensor(vec![1.0, f32::NAN]);
        assert!(matches!(
            quantize_tensor(&nan, Scheme::Int4Packed),
            Err(QuantError::InvalidShape { .. })
        ));
        assert!(quantize_tensor(&nan, Scheme::Passthrough).is_ok());
    }

    #[test]
    fn test_quantize_catalog_preserves_order() {
        let catalog = TensorCatalog::from_tensors(vec![
            Tensor::new("b", vec![40, 40], vec![0.5; 1600]).unwrap(),
            Tensor::new("a", vec![8], vec![0.5; 8]).unwrap(),
        ])
        .unwrap();
        let out = quantize_catalog(&catalog, &SchemePolicy::default()).unwrap();
        assert_eq!(out[0].name, "b");
        assert_eq!(out[0].scheme, Scheme::Int8Linear);
        assert_eq!(out[1].name, "a");
        assert_eq!(out[1].scheme, Scheme::Float16);
    }

    #[test]
    fn test_quantization_error() {
        let original = vec![1.0, 2.0, 3.0, 4.0];
        let dequantized = vec![1.1, 2.0, 2.9, 4.1];

        let rmse = compute_quantization_error(&original, &dequantized);
        assert!(rmse > 0.0);
        assert!(rmse < 0.2);

        let stats = compute_quantization_stats(&original, &dequantized);
        assert!((stats.max_error - 0.1).abs() < 1e-5);
        assert!(stats.mean_error < stats.max_error);
    }
}
