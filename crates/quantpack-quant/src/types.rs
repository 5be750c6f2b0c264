//! Quantization Types
//!
//! Defines tensors, quantization schemes and encoded tensor structures.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::fmt;

use serde::Serialize;

use crate::error::{QuantError, QuantResult};

// =============================================================================
// Tensor
// =============================================================================

/// Element type of catalog tensors.
///
/// Quantizable inputs are always f32; half-precision sources are widened when
/// they are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DType {
    /// 32-bit IEEE-754 float.
    F32,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
        }
    }
}

/// A named, dense, row-major f32 tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    name: String,
    shape: Vec<usize>,
    values: Vec<f32>,
}

impl Tensor {
    /// Creates a tensor, checking that `shape` describes exactly `values.len()` elements.
    ///
    /// Zero-sized dimensions are accepted here; encoding such a tensor fails.
    pub fn new(name: impl Into<String>, shape: Vec<usize>, values: Vec<f32>) -> QuantResult<Self> {
        let name = name.into();
        let numel = checked_numel(&name, &shape)?;
        if numel != values.len() {
            return Err(QuantError::invalid_shape(
                &name,
                format!(
                    "shape {:?} describes {} elements but {} values were given",
                    shape,
                    numel,
                    values.len()
                ),
            ));
        }
        Ok(Self { name, shape, values })
    }

    /// Tensor name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tensor shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flattened row-major values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.values.len()
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Consumes the tensor, returning its values.
    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    /// Metadata view of this tensor.
    pub fn info(&self) -> TensorInfo {
        TensorInfo {
            name: self.name.clone(),
            shape: self.shape.clone(),
            dtype: DType::F32,
            numel: self.numel(),
        }
    }
}

/// Metadata describing one catalog tensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TensorInfo {
    /// Tensor name.
    pub name: String,
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Element type.
    pub dtype: DType,
    /// Number of elements.
    pub numel: usize,
}

impl TensorInfo {
    /// Size of the tensor as f32, in bytes.
    pub fn size_bytes(&self) -> usize {
        self.numel * self.dtype.size_bytes()
    }
}

/// Product of `shape`, failing on overflow.
pub(crate) fn checked_numel(name: &str, shape: &[usize]) -> QuantResult<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| QuantError::invalid_shape(name, format!("shape {shape:?} overflows")))
}

// =============================================================================
// Quantization Scheme
// =============================================================================

/// Quantization scheme applied to one tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scheme {
    /// Original f32 bytes, unchanged.
    Passthrough,
    /// IEEE-754 half precision narrowing.
    Float16,
    /// Whole-tensor affine quantization to signed 8-bit codes.
    Int8Linear,
    /// Whole-tensor affine quantization to 4-bit codes, two per byte.
    Int4Packed,
    /// Affine 8-bit quantization with independent parameters per block.
    BlockInt8 {
        /// Elements per block (the last block may be shorter).
        block_size: usize,
    },
}

impl Scheme {
    /// Wire tag for [`Scheme::Passthrough`].
    pub const TAG_PASSTHROUGH: u8 = 0;
    /// Wire tag for [`Scheme::Float16`].
    pub const TAG_FLOAT16: u8 = 1;
    /// Wire tag for [`Scheme::Int8Linear`].
    pub const TAG_INT8_LINEAR: u8 = 2;
    /// Wire tag for [`Scheme::Int4Packed`].
    pub const TAG_INT4_PACKED: u8 = 3;
    /// Wire tag for [`Scheme::BlockInt8`].
    pub const TAG_BLOCK_INT8: u8 = 4;

    /// Creates a block-wise int8 scheme, rejecting a zero block size.
    pub fn block_int8(block_size: usize) -> QuantResult<Self> {
        if block_size == 0 {
            return Err(QuantError::InvalidBlockSize(block_size));
        }
        Ok(Scheme::BlockInt8 { block_size })
    }

    /// Returns the wire tag of this scheme.
    pub fn tag(&self) -> u8 {
        match self {
            Scheme::Passthrough => Self::TAG_PASSTHROUGH,
            Scheme::Float16 => Self::TAG_FLOAT16,
            Scheme::Int8Linear => Self::TAG_INT8_LINEAR,
            Scheme::Int4Packed => Self::TAG_INT4_PACKED,
            Scheme::BlockInt8 { .. } => Self::TAG_BLOCK_INT8,
        }
    }

    /// Stable label of the scheme family, without parameters.
    pub fn label(&self) -> &'static str {
        match self {
            Scheme::Passthrough => "passthrough",
            Scheme::Float16 => "float16",
            Scheme::Int8Linear => "int8_linear",
            Scheme::Int4Packed => "int4_packed",
            Scheme::BlockInt8 { .. } => "block_int8",
        }
    }

    /// Bits used by one encoded value, excluding parameters.
    pub fn bits_per_value(&self) -> usize {
        match self {
            Scheme::Passthrough => 32,
            Scheme::Float16 => 16,
            Scheme::Int8Linear | Scheme::BlockInt8 { .. } => 8,
            Scheme::Int4Packed => 4,
        }
    }

    /// Returns true if decoding reproduces the input bit for bit.
    pub fn is_lossless(&self) -> bool {
        matches!(self, Scheme::Passthrough)
    }

    /// Returns true if the scheme carries affine scale/zero-point parameters.
    pub fn is_affine(&self) -> bool {
        matches!(
            self,
            Scheme::Int8Linear | Scheme::Int4Packed | Scheme::BlockInt8 { .. }
        )
    }

    /// Number of blocks used for `numel` elements (1 for whole-tensor schemes).
    pub fn num_blocks(&self, numel: usize) -> usize {
        match self {
            Scheme::BlockInt8 { block_size } => numel.div_ceil(*block_size),
            _ => 1,
        }
    }

    /// Exact payload length in bytes for `numel` elements, or `None` when it
    /// does not fit in `usize`.
    ///
    /// Use this for element counts read from untrusted headers.
    pub fn checked_payload_len(&self, numel: usize) -> Option<usize> {
        match self {
            Scheme::Passthrough => numel.checked_mul(4),
            Scheme::Float16 => numel.checked_mul(2),
            Scheme::Int8Linear | Scheme::BlockInt8 { .. } => Some(numel),
            Scheme::Int4Packed => Some(numel.div_ceil(2)),
        }
    }

    /// Exact payload length in bytes for `numel` elements.
    ///
    /// Saturates at `usize::MAX`; exact for the element count of any tensor
    /// held in memory.
    pub fn payload_len(&self, numel: usize) -> usize {
        self.checked_payload_len(numel).unwrap_or(usize::MAX)
    }

    /// Number of f64 parameters stored for `numel` elements, or `None` when it
    /// does not fit in `usize`.
    pub fn checked_param_count(&self, numel: usize) -> Option<usize> {
        match self {
            Scheme::Passthrough | Scheme::Float16 => Some(0),
            Scheme::Int8Linear | Scheme::Int4Packed => Some(2),
            Scheme::BlockInt8 { .. } => self
                .num_blocks(numel)
                .checked_mul(2)
                .and_then(|n| n.checked_add(1)),
        }
    }

    /// Number of f64 parameters stored for `numel` elements.
    ///
    /// Saturates at `usize::MAX` like [`Scheme::payload_len`].
    pub fn param_count(&self, numel: usize) -> usize {
        self.checked_param_count(numel).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::BlockInt8 { block_size } => write!(f, "block_int8({block_size})"),
            other => write!(f, "{}", other.label()),
        }
    }
}

// =============================================================================
// Scheme Parameters
// =============================================================================

/// One affine mapping between real values and integer codes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AffineParams {
    /// Quantization step.
    pub scale: f64,
    /// Offset term of the mapping.
    pub zero_point: f64,
}

impl AffineParams {
    /// Creates new affine parameters.
    pub fn new(scale: f64, zero_point: f64) -> Self {
        Self { scale, zero_point }
    }
}

/// Scheme-specific parameters of a quantized tensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum QuantParams {
    /// Passthrough and Float16 carry no parameters.
    None,
    /// Whole-tensor affine parameters.
    Affine(AffineParams),
    /// One affine mapping per block, in block order.
    Blocks(Vec<AffineParams>),
}

impl QuantParams {
    /// Flattens the parameters into their wire representation.
    ///
    /// Block parameters are prefixed with the block size taken from `scheme`.
    pub fn to_wire(&self, scheme: Scheme) -> Vec<f64> {
        match (self, scheme) {
            (QuantParams::None, _) => Vec::new(),
            (QuantParams::Affine(p), _) => vec![p.scale, p.zero_point],
            (QuantParams::Blocks(blocks), Scheme::BlockInt8 { block_size }) => {
                let mut wire = Vec::with_capacity(1 + blocks.len() * 2);
                wire.push(block_size as f64);
                for p in blocks {
                    wire.push(p.scale);
                    wire.push(p.zero_point);
                }
                wire
            }
            (QuantParams::Blocks(blocks), _) => blocks
                .iter()
                .flat_map(|p| [p.scale, p.zero_point])
                .collect(),
        }
    }

    /// Rebuilds scheme and parameters from a wire tag and parameter list.
    ///
    /// Unknown tags, wrong parameter counts and unusable scales are reported as
    /// [`QuantError::CorruptPayload`]; there is no fallback scheme.
    pub fn from_wire(name: &str, tag: u8, wire: &[f64], numel: usize) -> QuantResult<(Scheme, Self)> {
        let scheme = match tag {
            Scheme::TAG_PASSTHROUGH => Scheme::Passthrough,
            Scheme::TAG_FLOAT16 => Scheme::Float16,
            Scheme::TAG_INT8_LINEAR => Scheme::Int8Linear,
            Scheme::TAG_INT4_PACKED => Scheme::Int4Packed,
            Scheme::TAG_BLOCK_INT8 => {
                let raw = *wire
                    .first()
                    .ok_or_else(|| QuantError::corrupt(name, "block_int8 record has no block size"))?;
                if !(raw.is_finite() && raw >= 1.0 && raw.fract() == 0.0 && raw <= u32::MAX as f64) {
                    return Err(QuantError::corrupt(name, format!("invalid block size {raw}")));
                }
                Scheme::BlockInt8 {
                    block_size: raw as usize,
                }
            }
            other => return Err(QuantError::corrupt(name, format!("unknown scheme tag {other}"))),
        };

        let expected = scheme.checked_param_count(numel).ok_or_else(|| {
            QuantError::corrupt(
                name,
                format!("{} parameter count for {} elements overflows", scheme.label(), numel),
            )
        })?;
        if wire.len() != expected {
            return Err(QuantError::corrupt(
                name,
                format!(
                    "{} expects {} parameters, found {}",
                    scheme.label(),
                    expected,
                    wire.len()
                ),
            ));
        }

        let params = match scheme {
            Scheme::Passthrough | Scheme::Float16 => QuantParams::None,
            Scheme::Int8Linear | Scheme::Int4Packed => {
                QuantParams::Affine(checked_affine(name, wire[0], wire[1])?)
            }
            Scheme::BlockInt8 { .. } => QuantParams::Blocks(
                wire[1..]
                    .chunks_exact(2)
                    .map(|pair| checked_affine(name, pair[0], pair[1]))
                    .collect::<QuantResult<Vec<_>>>()?,
            ),
        };

        Ok((scheme, params))
    }

    /// Number of f64 values this occupies on the wire.
    pub fn wire_len(&self) -> usize {
        match self {
            QuantParams::None => 0,
            QuantParams::Affine(_) => 2,
            QuantParams::Blocks(blocks) => 1 + blocks.len() * 2,
        }
    }

    /// Largest quantization step across all mappings, or 0 when there are none.
    pub fn max_step(&self) -> f64 {
        match self {
            QuantParams::None => 0.0,
            QuantParams::Affine(p) => p.scale,
            QuantParams::Blocks(blocks) => blocks.iter().map(|p| p.scale).fold(0.0, f64::max),
        }
    }
}

fn checked_affine(name: &str, scale: f64, zero_point: f64) -> QuantResult<AffineParams> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(QuantError::corrupt(name, format!("invalid scale {scale}")));
    }
    if !zero_point.is_finite() {
        return Err(QuantError::corrupt(name, format!("invalid zero point {zero_point}")));
    }
    Ok(AffineParams::new(scale, zero_point))
}

// =============================================================================
// Quantized Tensor
// =============================================================================

/// A tensor encoded under one scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensor {
    /// Source tensor name.
    pub name: String,
    /// Scheme used for encoding.
    pub scheme: Scheme,
    /// Original tensor shape.
    pub shape: Vec<usize>,
    /// Scheme parameters.
    pub params: QuantParams,
    /// Encoded bytes.
    pub payload: Vec<u8>,
}

impl QuantizedTensor {
    /// Number of elements of the original tensor.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of the encoded parameters in bytes.
    pub fn param_bytes(&self) -> usize {
        self.params.wire_len() * std::mem::size_of::<f64>()
    }

    /// Payload plus parameter overhead, in bytes.
    pub fn encoded_size(&self) -> usize {
        self.payload.len() + self.param_bytes()
    }

    /// Size of the original tensor as f32, in bytes.
    pub fn original_size(&self) -> usize {
        self.numel() * 4
    }

    /// Returns the compression ratio compared to F32.
    pub fn compression_ratio(&self) -> f64 {
        self.original_size() as f64 / self.encoded_size() as f64
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_shape_validation() {
        let t = Tensor::new("w", vec![2, 3], vec![0.0; 6]).unwrap();
        assert_eq!(t.numel(), 6);
        assert_eq!(t.rank(), 2);

        let err = Tensor::new("w", vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, QuantError::InvalidShape { .. }));

        let scalar = Tensor::new("s", vec![], vec![1.5]).unwrap();
        assert_eq!(scalar.numel(), 1);

        let overflow = Tensor::new("o", vec![usize::MAX, 2], vec![]).unwrap_err();
        assert!(matches!(overflow, QuantError::InvalidShape { .. }));
    }

    #[test]
    fn test_scheme_sizes() {
        assert_eq!(Scheme::Int8Linear.payload_len(1000), 1000);
        assert_eq!(Scheme::Int4Packed.payload_len(7), 4);
        assert_eq!(Scheme::Float16.payload_len(10), 20);
        assert_eq!(Scheme::Passthrough.payload_len(10), 40);

        let block = Scheme::block_int8(128).unwrap();
        assert_eq!(block.num_blocks(300), 3);
        assert_eq!(block.param_count(300), 7);
        assert!(Scheme::block_int8(0).is_err());
    }

    #[test]
    fn test_checked_sizes_detect_overflow() {
        let huge = usize::MAX / 2 + 1;
        assert_eq!(Scheme::Passthrough.checked_payload_len(huge), None);
        assert_eq!(Scheme::Float16.checked_payload_len(huge), None);
        assert_eq!(Scheme::Int8Linear.checked_payload_len(huge), Some(huge));
        assert_eq!(Scheme::Passthrough.payload_len(huge), usize::MAX);

        let unit = Scheme::block_int8(1).unwrap();
        assert_eq!(unit.checked_param_count(huge), None);
        assert_eq!(unit.checked_param_count(3), Some(7));

        let err = QuantParams::from_wire("w", Scheme::TAG_BLOCK_INT8, &[1.0], huge).unwrap_err();
        assert!(matches!(err, QuantError::CorruptPayload { .. }));
    }

    #[test]
    fn test_scheme_tags_and_display() {
        assert_eq!(Scheme::Passthrough.tag(), 0);
        assert_eq!(Scheme::Float16.tag(), 1);
        assert_eq!(Scheme::Int8Linear.tag(), 2);
        assert_eq!(Scheme::Int4Packed.tag(), 3);
        assert_eq!(Scheme::BlockInt8 { block_size: 64 }.tag(), 4);
        assert_eq!(Scheme::BlockInt8 { block_size: 64 }.to_string(), "block_int8(64)");
        assert_eq!(Scheme::Int8Linear.to_string(), "int8_linear");
    }

    #[test]
    fn test_params_wire_roundtrip() {
        let scheme = Scheme::BlockInt8 { block_size: 2 };
        let params = QuantParams::Blocks(vec![AffineParams::new(0.5, 1.0), AffineParams::new(0.25, -3.0)]);
        let wire = params.to_wire(scheme);
        assert_eq!(wire, vec![2.0, 0.5, 1.0, 0.25, -3.0]);

        let (decoded_scheme, decoded) = QuantParams::from_wire("t", 4, &wire, 4).unwrap();
        assert_eq!(decoded_scheme, scheme);
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_params_from_wire_rejects_bad_input() {
        let unknown = QuantParams::from_wire("t", 99, &[], 4).unwrap_err();
        assert!(matches!(unknown, QuantError::CorruptPayload { .. }));

        let wrong_count = QuantParams::from_wire("t", 2, &[1.0], 4).unwrap_err();
        assert!(matches!(wrong_count, QuantError::CorruptPayload { .. }));

        let zero_scale = QuantParams::from_wire("t", 2, &[0.0, 1.0], 4).unwrap_err();
        assert!(matches!(zero_scale, QuantError::CorruptPayload { .. }));

        let bad_block = QuantParams::from_wire("t", 4, &[1.5, 1.0, 0.0], 1).unwrap_err();
        assert!(matches!(bad_block, QuantError::CorruptPayload { .. }));
    }
}
