//! Tensor Bundles
//!
//! Plain f32 tensor collections used as encode input and decode output:
//! a JSON bundle that keeps tensor order, and SafeTensors files (optional
//! feature). Archives can be loaded too, which decodes them.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use quantpack_quant::{QuantResult, Tensor, TensorCatalog};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::archive::ArchiveReader;
use crate::error::{SerializeError, SerializeResult};
use crate::format::{detect_format, detect_format_from_bytes, Format};
use crate::pipeline::decode_archive;

// =============================================================================
// TensorData
// =============================================================================

/// Serializable tensor data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    /// Tensor name.
    pub name: String,
    /// Shape of the tensor.
    pub shape: Vec<usize>,
    /// Flattened row-major f32 values.
    pub values: Vec<f32>,
}

impl TensorData {
    /// Create `TensorData` from a tensor.
    pub fn from_tensor(tensor: &Tensor) -> Self {
        Self {
            name: tensor.name().to_string(),
            shape: tensor.shape().to_vec(),
            values: tensor.values().to_vec(),
        }
    }

    /// Convert back to a validated tensor.
    pub fn into_tensor(self) -> QuantResult<Tensor> {
        Tensor::new(self.name, self.shape, self.values)
    }

    /// Get the number of elements.
    pub fn numel(&self) -> usize {
        self.values.len()
    }
}

// =============================================================================
// TensorBundle
// =============================================================================

/// Ordered list of tensors, the JSON bundle document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TensorBundle {
    /// Tensors in order.
    pub tensors: Vec<TensorData>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl TensorBundle {
    /// Create an empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies a catalog into a bundle.
    pub fn from_catalog(catalog: &TensorCatalog) -> Self {
        Self {
            tensors: catalog.iter().map(TensorData::from_tensor).collect(),
            metadata: BTreeMap::new(),
        }
    }

    /// Validates every tensor and builds a catalog in bundle order.
    pub fn into_catalog(self) -> QuantResult<TensorCatalog> {
        let tensors = self
            .tensors
            .into_iter()
            .map(TensorData::into_tensor)
            .collect::<QuantResult<Vec<_>>>()?;
        TensorCatalog::from_tensors(tensors)
    }

    /// Add metadata to the bundle.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Number of tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Returns true if the bundle holds no tensors.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

// =============================================================================
// High-Level API
// =============================================================================

/// Determines a file's format from its leading bytes, falling back to its extension.
pub fn sniff_format<P: AsRef<Path>>(path: P) -> SerializeResult<Format> {
    let path = path.as_ref();
    let mut head = Vec::with_capacity(16);
    File::open(path)?.take(16).read_to_end(&mut head)?;
    Ok(detect_format_from_bytes(&head).unwrap_or_else(|| detect_format(path)))
}

/// Loads a tensor catalog from a JSON bundle, SafeTensors file or archive.
///
/// Archives are decoded, so the result is always plain f32.
pub fn load_catalog<P: AsRef<Path>>(path: P) -> SerializeResult<TensorCatalog> {
    let path = path.as_ref();
    let format = sniff_format(path)?;
    debug!(path = %path.display(), format = %format, "loading tensors");

    match format {
        Format::Json => {
            let reader = BufReader::new(File::open(path)?);
            let bundle: TensorBundle = serde_json::from_reader(reader)?;
            Ok(bundle.into_catalog()?)
        }
        Format::Archive => {
            let mut reader = ArchiveReader::open_path(path)?;
            decode_archive(&mut reader)
        }
        #[cfg(feature = "safetensors")]
        Format::SafeTensors => load_safetensors(path),
        #[cfg(not(feature = "safetensors"))]
        Format::SafeTensors => Err(SerializeError::Format(
            "SafeTensors format requires 'safetensors' feature".to_string(),
        )),
    }
}

/// Saves a catalog as a JSON bundle or SafeTensors file, chosen by extension.
pub fn save_catalog<P: AsRef<Path>>(catalog: &TensorCatalog, path: P) -> SerializeResult<()> {
    let path = path.as_ref();
    let format = detect_format(path);
    debug!(path = %path.display(), format = %format, tensors = catalog.len(), "saving tensors");

    match format {
        Format::Json => {
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer(&mut writer, &TensorBundle::from_catalog(catalog))?;
            writer.flush()?;
            Ok(())
        }
        Format::Archive => Err(SerializeError::Format(format!(
            "cannot save plain tensors as an archive: {} (use a .json or .safetensors path)",
            path.display()
        ))),
        #[cfg(feature = "safetensors")]
        Format::SafeTensors => save_safetensors(catalog, path),
        #[cfg(not(feature = "safetensors"))]
        Format::SafeTensors => Err(SerializeError::Format(
            "SafeTensors format requires 'safetensors' feature".to_string(),
        )),
    }
}

// =============================================================================
// SafeTensors Support
// =============================================================================

#[cfg(feature = "safetensors")]
fn load_safetensors(path: &Path) -> SerializeResult<TensorCatalog> {
    use half::{bf16, f16};
    use safetensors::{Dtype, SafeTensors};

    let bytes = std::fs::read(path)?;
    let file = SafeTensors::deserialize(&bytes).map_err(|e| SerializeError::Format(e.to_string()))?;

    let mut views = file.tensors();
    views.sort_by(|a, b| a.0.cmp(&b.0));

    let mut catalog = TensorCatalog::new();
    for (name, view) in views {
        let data = view.data();
        let values: Vec<f32> = match view.dtype() {
            Dtype::F32 => data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            Dtype::F16 => data
                .chunks_exact(2)
                .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect(),
            Dtype::BF16 => data
                .chunks_exact(2)
                .map(|b| bf16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect(),
            other => {
                return Err(SerializeError::Format(format!(
                    "tensor '{name}' has unsupported dtype {other:?}"
                )))
            }
        };
        catalog.push(Tensor::new(name, view.shape().to_vec(), values)?)?;
    }
    Ok(catalog)
}

#[cfg(feature = "safetensors")]
fn save_safetensors(catalog: &TensorCatalog, path: &Path) -> SerializeResult<()> {
    use safetensors::tensor::TensorView;
    use safetensors::Dtype;

    let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = catalog
        .iter()
        .map(|t| {
            let bytes = t.values().iter().flat_map(|v| v.to_le_bytes()).collect();
            (t.name().to_string(), t.shape().to_vec(), bytes)
        })
        .collect();

    let views = buffers
        .iter()
        .map(|(name, shape, bytes)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (name.clone(), view))
                .map_err(|e| SerializeError::Format(e.to_string()))
        })
        .collect::<SerializeResult<Vec<_>>>()?;

    let bytes = safetensors::serialize(views, &None).map_err(|e| SerializeError::Format(e.to_string()))?;
    std::fs::write(path, bytes)?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use quantpack_quant::ErrorKind;

    fn sample() -> TensorCatalog {
        TensorCatalog::from_tensors(vec![
            Tensor::new("z.weight", vec![2, 2], vec![1.0, -2.0, 3.5, 0.25]).unwrap(),
            Tensor::new("a.bias", vec![3], vec![0.1, 0.2, 0.3]).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_bundle_json_keeps_order() {
        let json = r#"{"tensors":[
            {"name":"z","shape":[2],"values":[1.0,2.0]},
            {"name":"a","shape":[1,3],"values":[3.0,4.0,5.0]}
        ]}"#;
        let bundle: TensorBundle = serde_json::from_str(json).unwrap();
        let catalog = bundle.into_catalog().unwrap();
        let names: Vec<&str> = catalog.names().collect();
        assert_eq!(names, vec!["z", "a"]);
        assert_eq!(catalog.get("a").unwrap().shape(), &[1, 3]);
    }

    #[test]
    fn test_bundle_rejects_shape_mismatch() {
        let json = r#"{"tensors":[{"name":"w","shape":[2,2],"values":[1.0]}]}"#;
        let bundle: TensorBundle = serde_json::from_str(json).unwrap();
        assert_eq!(
            bundle.into_catalog().unwrap_err().kind(),
            ErrorKind::InvalidShape
        );
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.json");
        let catalog = sample();
        save_catalog(&catalog, &path).unwrap();

        assert_eq!(sniff_format(&path).unwrap(), Format::Json);
        let loaded = load_catalog(&path).unwrap();
        assert_eq!(loaded.as_slice(), catalog.as_slice());
    }

    #[test]
    fn test_load_archive_decodes() {
        use crate::archive::save_archive;
        use quantpack_quant::{quantize_tensor, Scheme};

        let dir = tempfile::tempdir().unwrap();
        // Extension deliberately misleading; magic bytes win.
        let path = dir.path().join("weights.bin");
        let catalog = sample();
        let quantized: Vec<_> = catalog
            .iter()
            .map(|t| quantize_tensor(t, Scheme::Passthrough).unwrap())
            .collect();
        save_archive(&path, &quantized).unwrap();

        assert_eq!(sniff_format(&path).unwrap(), Format::Archive);
        let loaded = load_catalog(&path).unwrap();
        assert_eq!(loaded.as_slice(), catalog.as_slice());
    }

    #[test]
    fn test_save_archive_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_catalog(&sample(), dir.path().join("out.qpak")).unwrap_err();
        assert!(matches!(err, SerializeError::Format(_)));
    }

    #[test]
    fn test_missing_file_is_io() {
        let err = load_catalog("/definitely/not/here.json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[cfg(feature = "safetensors")]
    #[test]
    fn test_safetensors_roundtrip_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");
        save_catalog(&sample(), &path).unwrap();

        let loaded = load_catalog(&path).unwrap();
        let names: Vec<&str> = loaded.names().collect();
        assert_eq!(names, vec!["a.bias", "z.weight"]);
        assert_eq!(loaded.get("z.weight").unwrap().values(), &[1.0, -2.0, 3.5, 0.25]);
    }
}
