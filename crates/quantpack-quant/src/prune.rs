//! Pruning
//!
//! Optional pre-processing applied before scheme selection. Pruning produces
//! new, smaller or sparser tensors which then flow through the codec unchanged.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::catalog::TensorCatalog;
use crate::error::{QuantError, QuantResult};
use crate::types::Tensor;

/// Name fragments of tensors never magnitude-pruned (normalization layers).
pub const DEFAULT_PRUNE_SKIP: &[&str] = &["ln", "norm"];

// =============================================================================
// Configuration
// =============================================================================

/// Magnitude pruning configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PruneConfig {
    ratio: f64,
    skip_patterns: Vec<String>,
}

impl PruneConfig {
    /// Prunes the smallest `ratio` fraction of weights of every eligible matrix.
    pub fn new(ratio: f64) -> QuantResult<Self> {
        if !ratio.is_finite() || !(0.0..1.0).contains(&ratio) {
            return Err(QuantError::InvalidPruneRatio(ratio));
        }
        Ok(Self {
            ratio,
            skip_patterns: DEFAULT_PRUNE_SKIP.iter().map(|p| (*p).to_string()).collect(),
        })
    }

    /// Replaces the skip patterns.
    pub fn with_skip_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Fraction of weights to zero.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Name fragments excluded from pruning.
    pub fn skip_patterns(&self) -> &[String] {
        &self.skip_patterns
    }

    /// Returns true if the tensor is eligible for magnitude pruning.
    pub fn applies_to(&self, tensor: &Tensor) -> bool {
        tensor.rank() >= 2
            && !self
                .skip_patterns
                .iter()
                .any(|p| !p.is_empty() && tensor.name().contains(p.as_str()))
    }
}

/// Result of pruning one tensor.
#[derive(Debug, Clone)]
pub struct PruneOutcome {
    /// The pruned tensor (a copy of the input when nothing applied).
    pub tensor: Tensor,
    /// Number of values set to zero by pruning.
    pub zeroed: usize,
}

impl PruneOutcome {
    /// Fraction of values zeroed by pruning.
    pub fn sparsity(&self) -> f64 {
        if self.tensor.numel() == 0 {
            0.0
        } else {
            self.zeroed as f64 / self.tensor.numel() as f64
        }
    }
}

/// Aggregate statistics of a catalog pruning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PruneSummary {
    /// Tensors eligible for pruning.
    pub tensors_pruned: usize,
    /// Values set to zero across the catalog.
    pub values_zeroed: usize,
}

// =============================================================================
// Magnitude Pruning
// =============================================================================

/// Zeroes every value whose magnitude is below the `ratio` quantile.
///
/// The quantile is linearly interpolated between order statistics, so a ratio
/// of 0 never removes anything.
pub fn magnitude_prune(tensor: &Tensor, config: &PruneConfig) -> QuantResult<PruneOutcome> {
    if !config.applies_to(tensor) || tensor.numel() == 0 || config.ratio == 0.0 {
        return Ok(PruneOutcome {
            tensor: tensor.clone(),
            zeroed: 0,
        });
    }

    let threshold = magnitude_quantile(tensor.values(), config.ratio);
    let values: Vec<f32> = tensor
        .values()
        .par_iter()
        .map(|&v| if v.abs() >= threshold { v } else { 0.0 })
        .collect();
    let zeroed = tensor
        .values()
        .par_iter()
        .filter(|v| v.abs() < threshold)
        .count();

    debug!(
        tensor = tensor.name(),
        threshold,
        zeroed,
        "magnitude pruned tensor"
    );

    Ok(PruneOutcome {
        tensor: Tensor::new(tensor.name(), tensor.shape().to_vec(), values)?,
        zeroed,
    })
}

/// Prunes every tensor of a catalog, preserving order.
pub fn prune_catalog(
    catalog: &TensorCatalog,
    config: &PruneConfig,
) -> QuantResult<(TensorCatalog, PruneSummary)> {
    let outcomes = catalog
        .as_slice()
        .par_iter()
        .map(|t| magnitude_prune(t, config))
        .collect::<QuantResult<Vec<_>>>()?;

    let mut summary = PruneSummary::default();
    let mut pruned = TensorCatalog::new();
    for (outcome, original) in outcomes.into_iter().zip(catalog.iter()) {
        if config.applies_to(original) {
            summary.tensors_pruned += 1;
        }
        summary.values_zeroed += outcome.zeroed;
        pruned.push(outcome.tensor)?;
    }
    Ok((pruned, summary))
}

fn magnitude_quantile(values: &[f32], q: f64) -> f32 {
    let mut mags: Vec<f32> = values.iter().map(|v| v.abs()).collect();
    mags.par_sort_unstable_by(f32::total_cmp);

    let pos = q * (mags.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    (f64::from(mags[lo]) + (f64::from(mags[hi]) - f64::from(mags[lo])) * frac) as f32
}

// =============================================================================
// Row Pruning
// =============================================================================

/// Keeps only the rows (slices along dimension 0) whose mask entry is true.
///
/// Used to drop unused vocabulary entries from embedding tables.
pub fn prune_rows(tensor: &Tensor, keep: &[bool]) -> QuantResult<Tensor> {
    let name = tensor.name();
    let rows = *tensor
        .shape()
        .first()
        .ok_or_else(|| QuantError::invalid_shape(name, "cannot prune rows of a scalar"))?;
    if keep.len() != rows {
        return Err(QuantError::invalid_shape(
            name,
            format!("row mask has {} entries for {} rows", keep.len(), rows),
        ));
    }
    let kept = keep.iter().filter(|&&k| k).count();
    if kept == 0 {
        return Err(QuantError::invalid_shape(name, "row mask keeps no rows"));
    }

    let row_len = tensor.numel() / rows;
    if row_len == 0 {
        return Err(QuantError::invalid_shape(name, "cannot prune rows of an empty tensor"));
    }
    let values: Vec<f32> = tensor
        .values()
        .chunks_exact(row_len)
        .zip(keep)
        .filter(|(_, &k)| k)
        .flat_map(|(row, _)| row.iter().copied())
        .collect();

    let mut shape = tensor.shape().to_vec();
    shape[0] = kept;
    Tensor::new(name, shape, values)
}

// =============================================================================
// Tests
// =============================================================================
