//! Dequantization Functions
//!
//! Functions for converting quantized tensors back to floating point.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use half::f16;
use rayon::prelude::*;

use crate::error::{QuantError, QuantResult};
use crate::types::{checked_numel, AffineParams, QuantParams, QuantizedTensor, Scheme, Tensor};

// =============================================================================
// Public API
// =============================================================================

/// Dequantizes a quantized tensor back to f32.
///
/// # Arguments
/// * `quantized` - The quantized tensor to dequantize
///
/// # Returns
/// A tensor with the original name and shape, or `CorruptPayload` when the
/// payload or parameters do not match the declared shape and scheme.
///
/// # Example
/// ```
/// use quantpack_quant::{dequantize_tensor, quantize_tensor, Scheme, Tensor};
///
/// let tensor = Tensor::new("w", vec![4], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
/// let quantized = quantize_tensor(&tensor, Scheme::Passthrough).unwrap();
/// let restored = dequantize_tensor(&quantized).unwrap();
/// assert_eq!(restored, tensor);
/// ```
pub fn dequantize_tensor(quantized: &QuantizedTensor) -> QuantResult<Tensor> {
    let values = dequantize_values(quantized)?;
    Tensor::new(quantized.name.clone(), quantized.shape.clone(), values)
        .map_err(|e| QuantError::corrupt(&quantized.name, e.to_string()))
}

/// Dequantizes a quantized tensor to its flat row-major values.
pub fn dequantize_values(quantized: &QuantizedTensor) -> QuantResult<Vec<f32>> {
    let name = quantized.name.as_str();
    let numel = checked_numel(name, &quantized.shape)
        .map_err(|e| QuantError::corrupt(name, e.to_string()))?;
    let payload = &quantized.payload;

    let expected = quantized.scheme.payload_len(numel);
    if payload.len() != expected {
        return Err(QuantError::corrupt(
            name,
            format!(
                "{} payload for shape {:?} must be {} bytes, found {}",
                quantized.scheme.label(),
                quantized.shape,
                expected,
                payload.len()
            ),
        ));
    }

    let values = match (quantized.scheme, &quantized.params) {
        (Scheme::Passthrough, QuantParams::None) => decode_f32(payload),
        (Scheme::Float16, QuantParams::None) => decode_f16(payload),
        (Scheme::Int8Linear, QuantParams::Affine(p)) => dequantize_block(*p, payload),
        (Scheme::Int4Packed, QuantParams::Affine(p)) => decode_int4(*p, payload, numel),
        (Scheme::BlockInt8 { block_size }, QuantParams::Blocks(blocks)) => {
            decode_blocks(name, block_size, blocks, payload, numel)?
        }
        (scheme, params) => {
            return Err(QuantError::corrupt(
                name,
                format!(
                    "{} cannot use {} parameters",
                    scheme.label(),
                    params.wire_len()
                ),
            ))
        }
    };

    debug_assert_eq!(values.len(), numel);
    Ok(values)
}

/// Dequantizes one run of signed 8-bit codes sharing a single affine mapping.
pub fn dequantize_block(params: AffineParams, codes: &[u8]) -> Vec<f32> {
    codes
        .par_iter()
        .map(|&c| ((f64::from(c as i8) - params.zero_point) * params.scale) as f32)
        .collect()
}

// =============================================================================
// Int4
// =============================================================================

fn decode_int4(params: AffineParams, packed: &[u8], numel: usize) -> Vec<f32> {
    (0..numel)
        .into_par_iter()
        .map(|i| {
            let byte = packed[i / 2];
            let code = if i % 2 == 0 { byte & 0x0F } else { byte >> 4 };
            (f64::from(code) * params.scale + params.zero_point) as f32
        })
        .collect()
}

// =============================================================================
// Block-wise Int8
// =============================================================================

fn decode_blocks(
    name: &str,
    block_size: usize,
    blocks: &[AffineParams],
    payload: &[u8],
    numel: usize,
) -> QuantResult<Vec<f32>> {
    if block_size == 0 {
        return Err(QuantError::corrupt(name, "block size is zero"));
    }
    let expected = numel.div_ceil(block_size);
    if blocks.len() != expected {
        return Err(QuantError::corrupt(
            name,
            format!("expected {} block headers, found {}", expected, blocks.len()),
        ));
    }

    Ok(payload
        .par_chunks(block_size)
        .zip(blocks.par_iter())
        .flat_map_iter(|(codes, params)| {
            codes
                .iter()
                .map(move |&c| ((f64::from(c as i8) - params.zero_point) * params.scale) as f32)
        })
        .collect())
}

// =============================================================================
// Float16 / Passthrough
// =============================================================================

fn decode_f16(payload: &[u8]) -> Vec<f32> {
    payload
        .par_chunks_exact(2)
        .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
        .collect()
}

fn decode_f32(payload: &[u8]) -> Vec<f32> {
    payload
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantize::quantize_tensor;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_tensor(seed: u64, shape: Vec<usize>, spread: f32) -> Tensor {
        let mut rng = StdRng::seed_from_u64(seed);
        let numel = shape.iter().product();
        let values = (0..numel).map(|_| rng.gen_range(-spread..spread)).collect();
        Tensor::new("w", shape, values).unwrap()
    }

    fn max_error(a: &[f32], b: &[f32]) -> f64 {
        a.iter()
            .zip(b)
            .map(|(x, y)| (f64::from(*x) - f64::from(*y)).abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_roundtrip_within_step() {
        for (seed, shape) in [(1, vec![64, 33]), (2, vec![7, 5]), (3, vec![2, 3, 41])] {
            let t = random_tensor(seed, shape, 3.0);
            for scheme in [Scheme::Int8Linear, Scheme::Int4Packed] {
                let q = quantize_tensor(&t, scheme).unwrap();
                let restored = dequantize_tensor(&q).unwrap();
                assert_eq!(restored.shape(), t.shape());
                let err = max_error(t.values(), restored.values());
                assert!(
                    err <= q.params.max_step(),
                    "{scheme}: error {err} exceeds step {}",
                    q.params.max_step()
                );
            }
        }
    }

    #[test]
    fn test_block_roundtrip_within_block_step() {
        let mut values = random_tensor(7, vec![1000], 0.1).into_values();
        values[10] = 50.0;
        values[900] = -40.0;
        let t = Tensor::new("w", vec![10, 100], values).unwrap();

        let block_size = 64;
        let q = quantize_tensor(&t, Scheme::BlockInt8 { block_size }).unwrap();
        let restored = dequantize_tensor(&q).unwrap();
        let QuantParams::Blocks(blocks) = &q.params else {
            panic!("expected block params");
        };

        for (i, (orig, deq)) in t.values().iter().zip(restored.values()).enumerate() {
            let step = blocks[i / block_size].scale;
            let err = (f64::from(*orig) - f64::from(*deq)).abs();
            assert!(err <= step, "element {i}: error {err} exceeds block step {step}");
        }

        // Outliers only widen their own block.
        let whole = quantize_tensor(&t, Scheme::Int8Linear).unwrap();
        let whole_err = max_error(t.values(), dequantize_tensor(&whole).unwrap().values());
        let block_err = max_error(t.values(), restored.values());
        assert!(block_err <= whole_err);
    }

    #[test]
    fn test_passthrough_is_bit_exact() {
        let values = vec![1.0e-38, -0.0, f32::MAX, f32::MIN_POSITIVE, 1.234_567_8, f32::INFINITY];
        let t = Tensor::new("w", vec![2, 3], values).unwrap();
        let q = quantize_tensor(&t, Scheme::Passthrough).unwrap();
        let restored = dequantize_tensor(&q).unwrap();
        for (a, b) in t.values().iter().zip(restored.values()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_roundtrip_f16() {
        let original = vec![1.0f32, 2.5, -3.0, 4.25];
        let t = Tensor::new("w", vec![4], original.clone()).unwrap();
        let q = quantize_tensor(&t, Scheme::Float16).unwrap();
        assert_eq!(q.payload.len(), 8);
        let restored = dequantize_tensor(&q).unwrap();
        assert_eq!(restored.values(), original.as_slice());
    }

    #[test]
    fn test_degenerate_range_decodes_exactly() {
        for constant in [0.0f32, -2.75, 1234.5] {
            let t = Tensor::new("w", vec![10, 10], vec![constant; 100]).unwrap();
            for scheme in [Scheme::Int8Linear, Scheme::Int4Packed, Scheme::BlockInt8 { block_size: 32 }] {
                let q = quantize_tensor(&t, scheme).unwrap();
                let restored = dequantize_tensor(&q).unwrap();
                assert!(restored.values().iter().all(|&v| v == constant), "{scheme}");
            }
        }
    }

    #[test]
    fn test_int4_odd_count_ignores_padding() {
        let t = Tensor::new("w", vec![5], vec![0.0, 1.0, 2.0, 3.0, 15.0]).unwrap();
        let mut q = quantize_tensor(&t, Scheme::Int4Packed).unwrap();
        assert_eq!(q.payload.len(), 3);
        // Garbage in the padding nibble must not leak into the output.
        q.payload[2] |= 0xF0;
        let restored = dequantize_tensor(&q).unwrap();
        assert_eq!(restored.numel(), 5);
        assert_eq!(restored.values(), &[0.0, 1.0, 2.0, 3.0, 15.0]);
    }

    #[test]
    fn test_block_independence() {
        let t = random_tensor(11, vec![300], 1.0);
        let t = Tensor::new("w", vec![3, 100], t.into_values()).unwrap();
        let q = quantize_tensor(&t, Scheme::BlockInt8 { block_size: 128 }).unwrap();
        let QuantParams::Blocks(blocks) = &q.params else {
            panic!("expected block params");
        };
        assert_eq!(blocks.len(), 3);
        let clean = dequantize_tensor(&q).unwrap();

        let mut corrupted = q.clone();
        if let QuantParams::Blocks(blocks) = &mut corrupted.params {
            blocks[1] = AffineParams::new(1000.0, 42.0);
        }
        let dirty = dequantize_tensor(&corrupted).unwrap();

        assert_eq!(&clean.values()[..128], &dirty.values()[..128]);
        assert_eq!(&clean.values()[256..], &dirty.values()[256..]);
        assert_ne!(&clean.values()[128..256], &dirty.values()[128..256]);
    }

    #[test]
    fn test_rejects_wrong_payload_length() {
        let t = Tensor::new("w", vec![4, 4], vec![0.5; 16]).unwrap();
        let mut q = quantize_tensor(&t, Scheme::Int8Linear).unwrap();
        q.payload.pop();
        assert!(matches!(
            dequantize_tensor(&q),
            Err(QuantError::CorruptPayload { .. })
        ));
    }

    #[test]
    fn test_rejects_mismatched_params() {
        let t = Tensor::new("w", vec![4, 4], vec![0.5; 16]).unwrap();
        let mut q = quantize_tensor(&t, Scheme::Int8Linear).unwrap();
        q.params = QuantParams::None;
        assert!(matches!(
            dequantize_tensor(&q),
            Err(QuantError::CorruptPayload { .. })
        ));

        let mut b = quantize_tensor(&t, Scheme::BlockInt8 { block_size: 4 }).unwrap();
        if let QuantParams::Blocks(blocks) = &mut b.params {
            blocks.pop();
        }
        assert!(matches!(
            dequantize_tensor(&b),
            Err(QuantError::CorruptPayload { .. })
        ));
    }
}
