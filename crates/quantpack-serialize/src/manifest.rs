//! Archive Manifest
//!
//! Ordered index of the records in an archive, enough to seek to any payload
//! and to report sizes without decoding anything.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::collections::HashMap;

use quantpack_quant::{QuantError, QuantParams, QuantResult, Scheme};
use serde::Serialize;

// =============================================================================
// Manifest Entry
// =============================================================================

/// Location and metadata of one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestEntry {
    /// Tensor name.
    pub name: String,
    /// Encoding scheme.
    pub scheme: Scheme,
    /// Original shape.
    pub shape: Vec<usize>,
    /// Scheme parameters.
    #[serde(skip)]
    pub params: QuantParams,
    /// Byte offset of the record header from the start of the archive.
    pub record_offset: u64,
    /// Byte offset of the payload from the start of the archive.
    pub payload_offset: u64,
    /// Payload length in bytes.
    pub payload_len: u64,
}

impl ManifestEntry {
    /// Number of elements of the original tensor.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of the original tensor as f32.
    pub fn original_bytes(&self) -> u64 {
        (self.numel() as u64).saturating_mul(4)
    }

    /// Size of the scheme parameters on the wire.
    pub fn param_bytes(&self) -> u64 {
        self.params.wire_len() as u64 * 8
    }

    /// Payload plus parameters, the data this tensor costs.
    pub fn encoded_bytes(&self) -> u64 {
        self.payload_len + self.param_bytes()
    }

    /// Full record length including header fields.
    pub fn record_len(&self) -> u64 {
        self.payload_offset + self.payload_len - self.record_offset
    }

    /// Original size divided by encoded size.
    pub fn compression_ratio(&self) -> f64 {
        if self.encoded_bytes() == 0 {
            return 0.0;
        }
        self.original_bytes() as f64 / self.encoded_bytes() as f64
    }
}

// =============================================================================
// Manifest
// =============================================================================

/// Records of an archive in write order, indexed by name.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
    index: HashMap<String, usize>,
}

impl Manifest {
    /// Creates an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, handing it back if its name is already present.
    pub fn insert(&mut self, entry: ManifestEntry) -> Result<(), ManifestEntry> {
        if self.index.contains_key(&entry.name) {
            return Err(entry);
        }
        self.index.insert(entry.name.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Looks up an entry by name.
    pub fn get(&self, name: &str) -> Option<&ManifestEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Looks up an entry by name, failing with `NotFound`.
    pub fn lookup(&self, name: &str) -> QuantResult<&ManifestEntry> {
        self.get(name)
            .ok_or_else(|| QuantError::NotFound(name.to_string()))
    }

    /// Returns true if an entry with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in write order.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Iterates entries in write order.
    pub fn iter(&self) -> std::slice::Iter<'_, ManifestEntry> {
        self.entries.iter()
    }

    /// Entry names in write order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a ManifestEntry;
    type IntoIter = std::slice::Iter<'a, ManifestEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// =============================================================================
// Tests
// =============================================================================
