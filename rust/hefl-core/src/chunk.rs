//! Splitting of flat vectors into fixed-capacity blocks and reassembly.

use std::cmp;

use derive_more::{Deref, From, Into};
use displaydoc::Display;
use thiserror::Error;

use crate::codec::FlatVector;

/// The reference block capacity.
///
/// It must not exceed the slot count of the encryption context the blocks are encrypted under.
pub const DEFAULT_BLOCK_CAPACITY: usize = 4096;

#[derive(Debug, Display, Error, PartialEq, Eq)]
/// Errors related to chunking.
pub enum ChunkError {
    /// the block capacity must be at least 1
    ZeroCapacity,
}

#[derive(Deref, From, Into, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// A contiguous window of a [`FlatVector`].
pub struct Block(Vec<f64>);

impl AsRef<[f64]> for Block {
    fn as_ref(&self) -> &[f64] {
        &self.0
    }
}

impl From<&[f64]> for Block {
    fn from(values: &[f64]) -> Self {
        Self(values.to_vec())
    }
}

/// A struct that yields the blocks of the given data.
pub struct Chunker<'a> {
    data: &'a [f64],
    capacity: usize,
}

impl<'a> Chunker<'a> {
    /// Creates a new [`Chunker`] that yields blocks of at most `capacity` values.
    ///
    /// # Errors
    /// Fails if `capacity` is `0`.
    pub fn new(data: &'a [f64], capacity: usize) -> Result<Self, ChunkError> {
        if capacity == 0 {
            return Err(ChunkError::ZeroCapacity);
        }
        Ok(Self { data, capacity })
    }

    /// Gets the total number of blocks.
    pub fn nb_blocks(&self) -> usize {
        block_count(self.data.len(), self.capacity)
    }

    /// Gets the block with the given ID, or `None` if `id >= self.nb_blocks()`.
    pub fn get_block(&self, id: usize) -> Option<&'a [f64]> {
        if id >= self.nb_blocks() {
            return None;
        }
        let start = id * self.capacity;
        let end = cmp::min(start + self.capacity, self.data.len());
        Some(&self.data[start..end])
    }

    /// Iterates over all blocks in order.
    pub fn blocks(&self) -> impl Iterator<Item = &'a [f64]> + 'a {
        self.data.chunks(self.capacity)
    }
}

/// Splits `flat` into sequential, non-overlapping blocks of `capacity` values. The last block
/// may be shorter.
///
/// # Errors
/// Fails if `capacity` is `0`.
pub fn chunk(flat: &[f64], capacity: usize) -> Result<Vec<Block>, ChunkError> {
    Ok(Chunker::new(flat, capacity)?.blocks().map(Block::from).collect())
}

/// Concatenates the `blocks` in order.
pub fn dechunk<I, B>(blocks: I) -> FlatVector
where
    I: IntoIterator<Item = B>,
    B: AsRef<[f64]>,
{
    let mut flat = Vec::new();
    for block in blocks {
        flat.extend_from_slice(block.as_ref());
    }
    flat.into()
}

/// Gets the number of blocks a vector of `len` values splits into.
///
/// # Panics
/// Panics if `capacity` is `0`.
pub fn block_count(len: usize, capacity: usize) -> usize {
    ceiling_div(len, capacity)
}

/// A helper that performs division with ceil.
///
/// # Panic
///
/// This function panic if `d` is 0.
fn ceiling_div(n: usize, d: usize) -> usize {
    (n + d - 1) / d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity() {
        assert!(matches!(
            Chunker::new(&[1., 2.], 0),
            Err(ChunkError::ZeroCapacity)
        ));
        assert_eq!(chunk(&[1., 2.], 0).unwrap_err(), ChunkError::ZeroCapacity);
    }

    #[test]
    fn test_empty() {
        let chunker = Chunker::new(&[], 4).unwrap();
        assert_eq!(chunker.nb_blocks(), 0);
        assert!(chunker.get_block(0).is_none());
        assert!(chunk(&[], 4).unwrap().is_empty());
        assert!(dechunk(Vec::<Block>::new()).is_empty());
    }

    #[test]
    fn test_even_split() {
        let data = [0., 1., 2., 3., 4., 5., 6., 7., 8., 9.];
        let chunker = Chunker::new(&data, 2).unwrap();
        assert_eq!(chunker.nb_blocks(), 5);
        assert_eq!(chunker.get_block(0).unwrap(), &[0., 1.]);
        assert_eq!(chunker.get_block(4).unwrap(), &[8., 9.]);
        assert!(chunker.get_block(5).is_none());
    }

    #[test]
    fn test_short_tail() {
        let data = [0., 1., 2., 3., 4., 5., 6., 7., 8., 9.];
        let chunker = Chunker::new(&data, 3).unwrap();
        assert_eq!(chunker.nb_blocks(), 4);
        assert_eq!(chunker.get_block(2).unwrap(), &[6., 7., 8.]);
        assert_eq!(chunker.get_block(3).unwrap(), &[9.]);
        assert!(chunker.get_block(4).is_none());
    }

    #[test]
    fn test_single_block() {
        let data = [0., 1., 2.];
        let blocks = chunk(&data, 4096).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].as_ref(), &data);
    }

    #[test]
    fn test_seven_values_capacity_four() {
        let data = [1., 2., 3., 4., 5., 6., 7.];
        let blocks = chunk(&data, 4).unwrap();
        let sizes = blocks.iter().map(|block| block.len()).collect::<Vec<_>>();
        assert_eq!(sizes, vec![4, 3]);
    }

    #[test]
    fn test_roundtrip() {
        let data = (0..1000).map(|i| i as f64 * 0.25 - 17.).collect::<Vec<_>>();
        for capacity in [1, 2, 3, 7, 64, 999, 1000, 1001, DEFAULT_BLOCK_CAPACITY] {
            let blocks = chunk(&data, capacity).unwrap();
            assert_eq!(blocks.len(), block_count(data.len(), capacity));
            assert!(blocks.iter().all(|block| block.len() <= capacity));
            assert_eq!(dechunk(&blocks).as_ref(), &data);
        }
    }
}
