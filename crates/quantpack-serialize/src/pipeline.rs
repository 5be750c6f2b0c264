//! Encode and Decode Pipelines
//!
//! Drives a whole catalog through pruning, scheme selection and encoding.
//! Tensors are processed in batches: each batch is encoded on a rayon pool and
//! the calling thread then writes the results in catalog order, so the
//! archive layout never depends on scheduling.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::io::{Read, Seek, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use quantpack_quant::{
    dequantize_tensor, magnitude_prune, quantize_with_policy, PruneConfig, PruneSummary,
    QuantError, QuantResult, QuantizedTensor, SchemePolicy, Tensor, TensorCatalog,
};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use tracing::{debug, info};

use crate::archive::{ArchiveReader, ArchiveWriter};
use crate::error::{SerializeError, SerializeResult};
use crate::manifest::ManifestEntry;

/// Default number of tensors encoded per batch.
pub const DEFAULT_BATCH_SIZE: usize = 32;

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancellation flag, checked between tensors.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Work already past its check completes.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> QuantResult<()> {
        if self.is_cancelled() {
            Err(QuantError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// =============================================================================
// Options
// =============================================================================

/// Settings for [`encode_catalog`].
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Scheme selection policy.
    pub policy: SchemePolicy,
    /// Optional magnitude pruning applied before encoding.
    pub prune: Option<PruneConfig>,
    /// Worker threads; 0 uses every core.
    pub threads: usize,
    /// Tensors encoded per batch.
    pub batch_size: usize,
    /// Cancellation flag.
    pub cancel: CancelToken,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            policy: SchemePolicy::default(),
            prune: None,
            threads: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            cancel: CancelToken::new(),
        }
    }
}

impl EncodeOptions {
    /// Options using `policy` and defaults for everything else.
    pub fn new(policy: SchemePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }
}

/// Counters from one encode run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EncodeStats {
    /// Records written.
    pub tensors_written: usize,
    /// Pruning counters, zero when pruning was off.
    pub prune: PruneSummary,
}

/// Builds a rayon pool with `threads` workers, or one per core when 0.
pub fn thread_pool(threads: usize) -> SerializeResult<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| SerializeError::ThreadPool(e.to_string()))
}

// =============================================================================
// Encode
// =============================================================================

/// Encodes every tensor of `catalog` into `writer`, in catalog order.
///
/// `on_entry` is called on the coordinating thread after each record is
/// committed. The first failure, in catalog order, aborts the run; records
/// written before it stay committed.
pub fn encode_catalog<W, F>(
    catalog: &TensorCatalog,
    options: &EncodeOptions,
    writer: &mut ArchiveWriter<W>,
    mut on_entry: F,
) -> SerializeResult<EncodeStats>
where
    W: Write + Seek,
    F: FnMut(&ManifestEntry),
{
    let pool = thread_pool(options.threads)?;
    let batch_size = options.batch_size.max(1);
    let mut stats = EncodeStats::default();

    info!(
        tensors = catalog.len(),
        workers = pool.current_num_threads(),
        batch_size,
        "encoding catalog"
    );

    for batch in catalog.as_slice().chunks(batch_size) {
        options.cancel.check()?;
        let encoded: Vec<QuantResult<(QuantizedTensor, Option<usize>)>> = pool.install(|| {
            batch
                .par_iter()
                .map(|tensor| encode_one(tensor, options))
                .collect()
        });

        for result in encoded {
            options.cancel.check()?;
            let (quantized, zeroed) = result?;
            if let Some(zeroed) = zeroed {
                stats.prune.tensors_pruned += 1;
                stats.prune.values_zeroed += zeroed;
            }
            let entry = writer.write(&quantized)?;
            on_entry(entry);
            stats.tensors_written += 1;
        }
    }

    info!(
        tensors = stats.tensors_written,
        bytes = writer.bytes_written(),
        pruned = stats.prune.tensors_pruned,
        "encoded catalog"
    );
    Ok(stats)
}

/// Prunes (when configured and eligible) and encodes one tensor.
fn encode_one(
    tensor: &Tensor,
    options: &EncodeOptions,
) -> QuantResult<(QuantizedTensor, Option<usize>)> {
    options.cancel.check()?;
    match &options.prune {
        Some(config) if config.applies_to(tensor) => {
            let outcome = magnitude_prune(tensor, config)?;
            let quantized = quantize_with_policy(&outcome.tensor, &options.policy)?;
            Ok((quantized, Some(outcome.zeroed)))
        }
        _ => Ok((quantize_with_policy(tensor, &options.policy)?, None)),
    }
}

// =============================================================================
// Decode
// =============================================================================

/// Decodes every record of an archive, in archive order.
///
/// Runs on the current rayon pool; wrap the call in
/// [`ThreadPool::install`] to bound the worker count.
pub fn decode_archive<R: Read + Seek>(reader: &mut ArchiveReader<R>) -> SerializeResult<TensorCatalog> {
    let records = reader.read_all()?;
    debug!(records = records.len(), "decoding archive");
    let tensors = records
        .par_iter()
        .map(dequantize_tensor)
        .collect::<QuantResult<Vec<_>>>()?;
    Ok(TensorCatalog::from_tensors(tensors)?)
}

/// Decodes a single named record.
pub fn decode_tensor<R: Read + Seek>(reader: &mut ArchiveReader<R>, name: &str) -> SerializeResult<Tensor> {
    let record = reader.read(name)?;
    Ok(dequantize_tensor(&record)?)
}

// =============================================================================
// Tests
// =============================================================================
