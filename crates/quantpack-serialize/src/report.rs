//! Compression Report
//!
//! Size accounting for a written archive: totals, per-scheme breakdown and
//! ratios. Reports are built from a manifest that was committed to, or read
//! back from, real storage, so every number describes bytes that exist.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::manifest::Manifest;

/// Totals for the tensors encoded with one scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchemeTotals {
    /// Number of tensors.
    pub count: usize,
    /// Original f32 bytes.
    pub original_bytes: u64,
    /// Payload plus parameter bytes.
    pub encoded_bytes: u64,
}

impl SchemeTotals {
    /// Original size divided by encoded size.
    pub fn ratio(&self) -> f64 {
        ratio(self.original_bytes, self.encoded_bytes)
    }
}

/// Summary of an archive's compression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionReport {
    /// Number of tensors.
    pub tensor_count: usize,
    /// Total elements across all tensors.
    pub total_params: u64,
    /// Sum of `numel * 4` over all tensors.
    pub total_original: u64,
    /// Sum of payload and parameter bytes over all tensors.
    pub total_encoded: u64,
    /// Actual archive length, headers included.
    pub archive_bytes: u64,
    /// `total_original / total_encoded`.
    pub overall_ratio: f64,
    /// `total_original / archive_bytes`.
    pub archive_ratio: f64,
    /// `total_original - total_encoded`; negative when encoding grew the data.
    pub bytes_saved: i64,
    /// Breakdown keyed by scheme label.
    pub per_scheme: BTreeMap<String, SchemeTotals>,
}

impl CompressionReport {
    /// Aggregates a manifest. `archive_bytes` is the real length of the archive.
    pub fn from_manifest(manifest: &Manifest, archive_bytes: u64) -> Self {
        let mut per_scheme: BTreeMap<String, SchemeTotals> = BTreeMap::new();
        let mut total_original = 0u64;
        let mut total_encoded = 0u64;
        let mut total_params = 0u64;

        for entry in manifest {
            let original = entry.original_bytes();
            let encoded = entry.encoded_bytes();
            total_original += original;
            total_encoded += encoded;
            total_params += entry.numel() as u64;

            let totals = per_scheme.entry(entry.scheme.label().to_string()).or_default();
            totals.count += 1;
            totals.original_bytes += original;
            totals.encoded_bytes += encoded;
        }

        Self {
            tensor_count: manifest.len(),
            total_params,
            total_original,
            total_encoded,
            archive_bytes,
            overall_ratio: ratio(total_original, total_encoded),
            archive_ratio: ratio(total_original, archive_bytes),
            bytes_saved: total_original as i64 - total_encoded as i64,
            per_scheme,
        }
    }

    /// Fraction of the original size removed, in percent.
    pub fn savings_percent(&self) -> f64 {
        if self.total_original == 0 {
            return 0.0;
        }
        self.bytes_saved as f64 / self.total_original as f64 * 100.0
    }

    /// Multi-line human-readable summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Tensors:        {}", self.tensor_count);
        let _ = writeln!(out, "Parameters:     {}", self.total_params);
        let _ = writeln!(out, "Original size:  {}", format_size(self.total_original));
        let _ = writeln!(out, "Encoded size:   {}", format_size(self.total_encoded));
        let _ = writeln!(out, "Archive size:   {}", format_size(self.archive_bytes));
        let _ = writeln!(out, "Compression:    {:.2}x", self.overall_ratio);
        let _ = writeln!(out, "Saved:          {:.1}%", self.savings_percent());
        for (label, totals) in &self.per_scheme {
            let _ = writeln!(
                out,
                "  {:<12} {:>4} tensors  {:>10} -> {:>10}  ({:.2}x)",
                label,
                totals.count,
                format_size(totals.original_bytes),
                format_size(totals.encoded_bytes),
                totals.ratio()
            );
        }
        out
    }
}

fn ratio(original: u64, encoded: u64) -> f64 {
    if encoded == 0 {
        0.0
    } else {
        original as f64 / encoded as f64
    }
}

/// Formats a byte count with binary units.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

// =============================================================================
// Tests
// =============================================================================
