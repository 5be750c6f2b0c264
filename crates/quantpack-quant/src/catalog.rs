//! Tensor Catalog
//!
//! Ordered, name-unique collection of the tensors of one model.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::collections::HashMap;

use crate::error::{QuantError, QuantResult};
use crate::types::{Tensor, TensorInfo};

// =============================================================================
// TensorCatalog
// =============================================================================

/// Ordered collection of named tensors.
///
/// Iteration order is insertion order and defines the layout order of any
/// archive written from the catalog.
#[derive(Debug, Clone, Default)]
pub struct TensorCatalog {
    tensors: Vec<Tensor>,
    index: HashMap<String, usize>,
}

impl TensorCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from tensors, rejecting duplicate names.
    pub fn from_tensors(tensors: Vec<Tensor>) -> QuantResult<Self> {
        let mut catalog = Self::new();
        for tensor in tensors {
            catalog.push(tensor)?;
        }
        Ok(catalog)
    }

    /// Appends a tensor.
    pub fn push(&mut self, tensor: Tensor) -> QuantResult<()> {
        if self.index.contains_key(tensor.name()) {
            return Err(QuantError::invalid_shape(
                tensor.name(),
                "duplicate tensor name in catalog",
            ));
        }
        self.index.insert(tensor.name().to_string(), self.tensors.len());
        self.tensors.push(tensor);
        Ok(())
    }

    /// Looks up a tensor by name.
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.index.get(name).map(|&i| &self.tensors[i])
    }

    /// Returns true if a tensor with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Returns true if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Iterates tensors in catalog order.
    pub fn iter(&self) -> std::slice::Iter<'_, Tensor> {
        self.tensors.iter()
    }

    /// Tensors as a slice, in catalog order.
    pub fn as_slice(&self) -> &[Tensor] {
        &self.tensors
    }

    /// Metadata of every tensor, in catalog order.
    pub fn infos(&self) -> Vec<TensorInfo> {
        self.tensors.iter().map(Tensor::info).collect()
    }

    /// Names in catalog order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.iter().map(Tensor::name)
    }

    /// Total number of elements across all tensors.
    pub fn total_params(&self) -> usize {
        self.tensors.iter().map(Tensor::numel).sum()
    }

    /// Size of the catalog as f32 data, in bytes.
    pub fn original_bytes(&self) -> usize {
        self.total_params() * 4
    }

    /// Consumes the catalog, returning its tensors in order.
    pub fn into_tensors(self) -> Vec<Tensor> {
        self.tensors
    }
}

impl<'a> IntoIterator for &'a TensorCatalog {
    type Item = &'a Tensor;
    type IntoIter = std::slice::Iter<'a, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.iter()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(name: &str, shape: Vec<usize>) -> Tensor {
        let numel = shape.iter().product();
        Tensor::new(name, shape, vec![0.5; numel]).unwrap()
    }

    #[test]
    fn test_catalog_preserves_order() {
        let catalog = TensorCatalog::from_tensors(vec![
            tensor("c", vec![2]),
            tensor("a", vec![3, 3]),
            tensor("b", vec![1]),
        ])
        .unwrap();

        let names: Vec<&str> = catalog.names().collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert_eq!(catalog.total_params(), 12);
        assert_eq!(catalog.original_bytes(), 48);
        assert_eq!(catalog.get("a").unwrap().shape(), &[3, 3]);
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn test_catalog_rejects_duplicates() {
        let mut catalog = TensorCatalog::new();
        catalog.push(tensor("w", vec![4])).unwrap();
        let err = catalog.push(tensor("w", vec![2])).unwrap_err();
        assert!(matches!(err, QuantError::InvalidShape { .. }));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_catalog_infos() {
        let catalog = TensorCatalog::from_tensors(vec![tensor("w", vec![4, 2])]).unwrap();
        let infos = catalog.infos();
        assert_eq!(infos[0].numel, 8);
        assert_eq!(infos[0].size_bytes(), 32);
        assert_eq!(infos[0].dtype.to_string(), "f32");
    }
}
