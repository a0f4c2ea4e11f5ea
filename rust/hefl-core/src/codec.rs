//! Flattening of structured parameter sets into flat vectors and back.
//!
//! A [`ParameterSet`] keeps its layers in insertion order. [`flatten()`] concatenates the layers
//! in that order, each one in row-major element order, and [`unflatten()`] reverses it given the
//! [`ShapeSignature`] of the original set. Neither step touches the values, so the round trip is
//! exact.

use std::iter::FromIterator;

use derive_more::{AsRef, Deref, From, Index, Into};
use ndarray::{ArrayD, IxDyn, ShapeError};
use thiserror::Error;

use crate::chunk::block_count;

/// The identifier of a layer in a [`ParameterSet`].
pub type LayerId = String;

#[derive(Debug, Error, PartialEq)]
/// Errors related to the reconstruction of parameter sets.
pub enum CodecError {
    #[error("shape mismatch: the signature expects {expected} values but got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("invalid layer shape: {0}")]
    InvalidShape(#[from] ShapeError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// An ordered mapping from layer identifiers to n-dimensional arrays.
pub struct ParameterSet(Vec<(LayerId, ArrayD<f64>)>);

impl ParameterSet {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a layer.
    ///
    /// If the layer already exists, its array is replaced in place and the old one is returned.
    /// The layer keeps the position of its first insertion.
    pub fn insert(&mut self, id: impl Into<LayerId>, array: ArrayD<f64>) -> Option<ArrayD<f64>> {
        let id = id.into();
        match self.0.iter_mut().find(|(layer, _)| *layer == id) {
            Some((_, existing)) => Some(std::mem::replace(existing, array)),
            None => {
                self.0.push((id, array));
                None
            }
        }
    }

    /// Gets the array of a layer.
    pub fn get(&self, id: &str) -> Option<&ArrayD<f64>> {
        self.0
            .iter()
            .find_map(|(layer, array)| (layer.as_str() == id).then(|| array))
    }

    /// Gets the array of a layer mutably.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut ArrayD<f64>> {
        self.0
            .iter_mut()
            .find_map(|(layer, array)| (layer.as_str() == id).then(|| array))
    }

    /// Gets the number of layers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the layers in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f64>)> {
        self.0.iter().map(|(layer, array)| (layer.as_str(), array))
    }

    /// Gets the total number of elements over all layers.
    pub fn element_count(&self) -> usize {
        self.0.iter().map(|(_, array)| array.len()).sum()
    }

    /// Gets the shape signature of this set.
    pub fn shape_signature(&self) -> ShapeSignature {
        self.0
            .iter()
            .map(|(layer, array)| (layer.clone(), array.shape().to_vec()))
            .collect()
    }
}

impl<K: Into<LayerId>> FromIterator<(K, ArrayD<f64>)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (K, ArrayD<f64>)>>(iter: I) -> Self {
        let mut params = ParameterSet::new();
        for (id, array) in iter {
            params.insert(id, array);
        }
        params
    }
}

impl IntoIterator for ParameterSet {
    type Item = (LayerId, ArrayD<f64>);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// The ordered (identifier, dimensions) pairs describing the structure of a [`ParameterSet`].
pub struct ShapeSignature(Vec<(LayerId, Vec<usize>)>);

impl ShapeSignature {
    pub fn new(entries: Vec<(LayerId, Vec<usize>)>) -> Self {
        Self(entries)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.0
            .iter()
            .map(|(layer, shape)| (layer.as_str(), shape.as_slice()))
    }

    /// Gets the number of values a [`FlatVector`] of this signature holds.
    pub fn element_count(&self) -> usize {
        self.0
            .iter()
            .map(|(_, shape)| shape.iter().product::<usize>())
            .sum()
    }

    /// Gets the number of blocks of the given capacity a flattened set of this signature splits
    /// into.
    ///
    /// # Panics
    /// Panics if `capacity` is `0`.
    pub fn block_count(&self, capacity: usize) -> usize {
        block_count(self.element_count(), capacity)
    }
}

impl FromIterator<(LayerId, Vec<usize>)> for ShapeSignature {
    fn from_iter<I: IntoIterator<Item = (LayerId, Vec<usize>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(
    AsRef, Deref, From, Into, Index, Debug, Clone, Default, PartialEq, Serialize, Deserialize,
)]
/// All values of a [`ParameterSet`] in one ordered sequence.
pub struct FlatVector(Vec<f64>);

impl FromIterator<f64> for FlatVector {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Concatenates all layers of `params` in order, each in row-major element order.
pub fn flatten(params: &ParameterSet) -> FlatVector {
    params
        .iter()
        .flat_map(|(_, array)| array.iter().copied())
        .collect()
}

/// Rebuilds a parameter set of the given `signature` from a flat sequence of values.
///
/// # Errors
/// Fails with [`CodecError::ShapeMismatch`] if the length of `flat` differs from the number of
/// elements of the `signature`.
pub fn unflatten(flat: &[f64], signature: &ShapeSignature) -> Result<ParameterSet, CodecError> {
    let expected = signature.element_count();
    if flat.len() != expected {
        return Err(CodecError::ShapeMismatch {
            expected,
            actual: flat.len(),
        });
    }

    let mut offset = 0;
    signature
        .iter()
        .map(|(layer, shape)| {
            let count = shape.iter().product::<usize>();
            let values = flat[offset..offset + count].to_vec();
            offset += count;
            let array = ArrayD::from_shape_vec(IxDyn(shape), values)?;
            Ok((layer.to_string(), array))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use ndarray::{arr0, array};

    use super::*;
    use crate::chunk::{chunk, dechunk};

    fn two_layers() -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert("dense/kernel", array![[1., 2.], [3., 4.]].into_dyn());
        params.insert("dense/bias", array![5., 6., 7.].into_dyn());
        params
    }

    #[test]
    fn test_flatten_is_row_major_in_insertion_order() {
        let flat = flatten(&two_layers());
        assert_eq!(flat.as_ref(), &vec![1., 2., 3., 4., 5., 6., 7.]);
    }

    #[test]
    fn test_flatten_transposed_layout() {
        // a transposed view is iterated in logical order, not memory order
        let mut params = ParameterSet::new();
        params.insert("w", array![[1., 3.], [2., 4.]].reversed_axes().into_dyn());
        assert_eq!(flatten(&params).as_ref(), &vec![1., 2., 3., 4.]);
    }

    #[test]
    fn test_roundtrip() {
        let params = two_layers();
        let signature = params.shape_signature();
        let restored = unflatten(&flatten(&params), &signature).unwrap();
        assert_eq!(restored, params);
        assert_eq!(restored.get("dense/kernel").unwrap().shape(), &[2, 2]);
        assert_eq!(restored.get("dense/bias").unwrap().shape(), &[3]);
    }

    #[test]
    fn test_blocks_restore_both_layers() {
        let params = two_layers();
        let signature = params.shape_signature();
        let flat = flatten(&params);
        assert_eq!(flat.len(), 7);

        let blocks = chunk(&flat, 4).unwrap();
        assert_eq!(
            blocks.iter().map(|block| block.len()).collect::<Vec<_>>(),
            vec![4, 3]
        );
        assert_eq!(blocks.len(), signature.block_count(4));

        let restored = unflatten(&dechunk(&blocks), &signature).unwrap();
        assert_eq!(restored.get("dense/kernel").unwrap().shape(), &[2, 2]);
        assert_eq!(restored.get("dense/bias").unwrap().shape(), &[3]);
        assert_eq!(restored, params);
    }

    #[test]
    fn test_roundtrip_scalar_and_empty_layers() {
        let mut params = ParameterSet::new();
        params.insert("step", arr0(42.).into_dyn());
        params.insert("unused", ArrayD::zeros(IxDyn(&[0, 3])));
        params.insert("bias", array![-0.5].into_dyn());
        let signature = params.shape_signature();
        assert_eq!(signature.element_count(), 2);
        assert_eq!(unflatten(&flatten(&params), &signature).unwrap(), params);
    }

    #[test]
    fn test_empty() {
        let params = ParameterSet::new();
        assert!(flatten(&params).is_empty());
        assert_eq!(
            unflatten(&[], &params.shape_signature()).unwrap(),
            ParameterSet::new()
        );
    }

    #[test]
    fn test_unflatten_shape_mismatch() {
        let signature = two_layers().shape_signature();
        assert_eq!(
            unflatten(&[0.; 6], &signature).unwrap_err(),
            CodecError::ShapeMismatch {
                expected: 7,
                actual: 6
            }
        );
        assert_eq!(
            unflatten(&[0.; 8], &signature).unwrap_err(),
            CodecError::ShapeMismatch {
                expected: 7,
                actual: 8
            }
        );
    }

    #[test]
    fn test_insert_keeps_first_position() {
        let mut params = two_layers();
        let old = params.insert("dense/kernel", array![[0., 0.], [0., 0.]].into_dyn());
        assert_eq!(old, Some(array![[1., 2.], [3., 4.]].into_dyn()));
        assert_eq!(params.len(), 2);
        assert_eq!(flatten(&params).as_ref(), &vec![0., 0., 0., 0., 5., 6., 7.]);
    }

    #[test]
    fn test_block_count_depends_on_signature_only() {
        let a = two_layers();
        let mut b = two_layers();
        b.get_mut("dense/bias").unwrap().fill(-100.);
        assert_eq!(a.shape_signature(), b.shape_signature());
        for capacity in 1..10 {
            assert_eq!(
                a.shape_signature().block_count(capacity),
                b.shape_signature().block_count(capacity)
            );
        }
        assert_eq!(a.shape_signature().block_count(4), 2);
    }
}
