//! Scheme Selection
//!
//! Maps tensor metadata to a quantization scheme. Selection is a pure function
//! of the policy and the tensor's name, shape and element count, so running it
//! twice over the same catalog yields the same plan.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::catalog::TensorCatalog;
use crate::error::{QuantError, QuantResult};
use crate::types::{Scheme, Tensor};
use crate::{DEFAULT_BLOCK_SIZE, DEFAULT_LARGE_THRESHOLD};

/// Name fragments of accuracy-sensitive layers kept at 8 bits by default:
/// front-end convolutions, embedding tables and normalization weights.
pub const DEFAULT_CRITICAL_PATTERNS: &[&str] = &["conv1", "conv2", "embed", "norm"];

// =============================================================================
// Global Mode
// =============================================================================

/// Scheme used for large matrices that are not on the critical list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalMode {
    /// Whole-tensor int8 (default).
    #[default]
    Int8,
    /// Whole-tensor packed int4, the most aggressive mode.
    Int4,
    /// Block-wise int8, the most accurate integer mode.
    Block,
    /// Half precision only, no integer codes.
    Float16,
}

impl GlobalMode {
    /// Short name used on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            GlobalMode::Int8 => "int8",
            GlobalMode::Int4 => "int4",
            GlobalMode::Block => "block",
            GlobalMode::Float16 => "f16",
        }
    }

    /// All modes, in order of increasing compression.
    pub fn all() -> &'static [GlobalMode] {
        &[GlobalMode::Float16, GlobalMode::Block, GlobalMode::Int8, GlobalMode::Int4]
    }
}

impl FromStr for GlobalMode {
    type Err = QuantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "int8" | "q8" | "i8" => Ok(GlobalMode::Int8),
            "int4" | "q4" | "i4" => Ok(GlobalMode::Int4),
            "block" | "block_int8" | "blockwise" => Ok(GlobalMode::Block),
            "f16" | "fp16" | "float16" | "half" => Ok(GlobalMode::Float16),
            other => Err(QuantError::InvalidPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for GlobalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Scheme Policy
// =============================================================================

/// Configuration of the scheme selector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemePolicy {
    mode: GlobalMode,
    block_size: usize,
    large_threshold: usize,
    critical: Vec<String>,
}

impl Default for SchemePolicy {
    fn default() -> Self {
        Self {
            mode: GlobalMode::Int8,
            block_size: DEFAULT_BLOCK_SIZE,
            large_threshold: DEFAULT_LARGE_THRESHOLD,
            critical: DEFAULT_CRITICAL_PATTERNS
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
        }
    }
}

impl SchemePolicy {
    /// Creates the default policy (int8 for large matrices).
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a command-line policy such as `int8`, `int4`, `f16`, `block` or `block:64`.
    pub fn parse(spec: &str) -> QuantResult<Self> {
        let (mode, block) = match spec.split_once(':') {
            Some((mode, size)) => {
                let size: usize = size
                    .trim()
                    .parse()
                    .map_err(|_| QuantError::InvalidPolicy(spec.to_string()))?;
                (mode, Some(size))
            }
            None => (spec, None),
        };
        let mode: GlobalMode = mode.trim().parse()?;

        let policy = Self::default().with_mode(mode);
        match block {
            Some(_) if mode != GlobalMode::Block => Err(QuantError::InvalidPolicy(spec.to_string())),
            Some(size) => policy.with_block_size(size),
            None => Ok(policy),
        }
    }

    /// Sets the mode used for large matrices.
    pub fn with_mode(mut self, mode: GlobalMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the block size used in [`GlobalMode::Block`].
    pub fn with_block_size(mut self, block_size: usize) -> QuantResult<Self> {
        if block_size == 0 {
            return Err(QuantError::InvalidBlockSize(block_size));
        }
        self.block_size = block_size;
        Ok(self)
    }

    /// Sets the element count above which a matrix counts as large.
    pub fn with_large_threshold(mut self, threshold: usize) -> Self {
        self.large_threshold = threshold;
        self
    }

    /// Replaces the critical name patterns.
    pub fn with_critical<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.critical = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Global mode.
    pub fn mode(&self) -> GlobalMode {
        self.mode
    }

    /// Block size for block mode.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Large-matrix threshold.
    pub fn large_threshold(&self) -> usize {
        self.large_threshold
    }

    /// Critical name patterns.
    pub fn critical(&self) -> &[String] {
        &self.critical
    }

    /// Returns true if `name` contains one of the critical patterns.
    pub fn is_critical(&self, name: &str) -> bool {
        self.critical
            .iter()
            .any(|p| !p.is_empty() && name.contains(p.as_str()))
    }

    /// Selects the scheme for one tensor. First matching rule wins.
    pub fn select(&self, name: &str, shape: &[usize], numel: usize) -> Scheme {
        if numel <= 1 {
            return Scheme::Passthrough;
        }
        if shape.len() < 2 {
            return Scheme::Float16;
        }
        if self.is_critical(name) {
            return Scheme::Int8Linear;
        }
        if numel > self.large_threshold {
            return match self.mode {
                GlobalMode::Int8 => Scheme::Int8Linear,
                GlobalMode::Int4 => Scheme::Int4Packed,
                GlobalMode::Block => Scheme::BlockInt8 {
                    block_size: self.block_size,
                },
                GlobalMode::Float16 => Scheme::Float16,
            };
        }
        Scheme::Float16
    }

    /// Selects the scheme for a tensor.
    pub fn select_tensor(&self, tensor: &Tensor) -> Scheme {
        self.select(tensor.name(), tensor.shape(), tensor.numel())
    }

    /// Selects a scheme for every catalog tensor, in catalog order.
    pub fn plan(&self, catalog: &TensorCatalog) -> Vec<(String, Scheme)> {
        catalog
            .iter()
            .map(|t| (t.name().to_string(), self.select_tensor(t)))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
