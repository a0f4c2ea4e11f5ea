//! Homomorphic aggregation of encrypted blocks.
//!
//! The aggregator adds the blocks of every contributor position-wise and multiplies the sums by
//! the plaintext weight `1 / n`. It works on ciphertexts only and has no way to decrypt.
//!
//! The weight is the fixed-point integer `w = round(2^weight_bits / n)`. The mean records the
//! divisor `n * w` instead of `2^weight_bits`, so the rounding of `w` does not bias the decoded
//! mean, whatever the number of contributors.
//!
//! Blocks are zero beyond their true length, and blocks at the same position must have the same
//! length. The short tail block is therefore averaged like any other block: its unused slots stay
//! zero under addition and scalar multiplication.

use std::sync::Arc;

use fhe::bfv::{BfvParameters, Encoding, Plaintext};
use fhe_traits::FheEncoder;
use rayon::prelude::*;
use thiserror::Error;

use crate::crypto::{
    params::averaging_weight,
    CryptoError,
    EncryptedBlock,
    EncryptionContext,
    Fingerprint,
};

#[derive(Debug, Error)]
/// Errors related to the aggregation of encrypted blocks.
pub enum AggregationError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("there are no contributions to aggregate")]
    NoContributions,

    #[error("the weight precision cannot average {0} contributions")]
    TooManyContributions(usize),

    #[error("aggregation failed: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Clone)]
/// An aggregator for the encrypted blocks of several contributors.
pub struct Aggregation {
    nb_models: usize,
    fingerprint: Fingerprint,
    weight_bits: u32,
    params: Arc<BfvParameters>,
    block_count: Option<usize>,
    sums: Vec<EncryptedBlock>,
}

impl Aggregation {
    /// Creates a new, empty aggregator for blocks produced under `context`.
    pub fn new(context: &impl EncryptionContext) -> Self {
        Self {
            nb_models: 0,
            fingerprint: context.fingerprint(),
            weight_bits: context.scheme().weight_bits,
            params: context.params().clone(),
            block_count: None,
            sums: Vec::new(),
        }
    }

    /// Pins the number of blocks every submission must have.
    pub fn with_block_count(mut self, block_count: usize) -> Self {
        self.block_count = Some(block_count);
        self
    }

    /// Gets the number of aggregated submissions.
    pub fn nb_models(&self) -> usize {
        self.nb_models
    }

    /// Gets the number of blocks per submission, if already known.
    pub fn block_count(&self) -> Option<usize> {
        if self.nb_models > 0 {
            Some(self.sums.len())
        } else {
            self.block_count
        }
    }

    /// Validates if the aggregation of the given `blocks` may be safely performed.
    ///
    /// This should be checked before calling [`aggregate()`], since aggregation may return garbage
    /// values otherwise.
    ///
    /// # Errors
    /// Fails in one of the following cases:
    /// - A block was produced under another context.
    /// - The number of blocks differs from the pinned or already aggregated block count.
    /// - The length or the fixed-point encoding of a block differs from the block at the same
    ///   position of the already aggregated submissions.
    ///
    /// [`aggregate()`]: Aggregation::aggregate
    pub fn validate_aggregation(&self, blocks: &[EncryptedBlock]) -> Result<(), AggregationError> {
        if let Some(block) = blocks
            .iter()
            .find(|block| block.fingerprint() != self.fingerprint)
        {
            return Err(CryptoError::ContextMismatch(format!(
                "block was produced under {} but the aggregation runs under {}",
                block.fingerprint(),
                self.fingerprint
            ))
            .into());
        }

        if let Some(expected) = self.block_count() {
            if blocks.len() != expected {
                return Err(AggregationError::ProtocolViolation(format!(
                    "expected {} blocks but got {}",
                    expected,
                    blocks.len()
                )));
            }
        }

        for (i, (sum, block)) in self.sums.iter().zip(blocks).enumerate() {
            if sum.len() != block.len() {
                return Err(AggregationError::ProtocolViolation(format!(
                    "block {} holds {} values but the aggregated one holds {}",
                    i,
                    block.len(),
                    sum.len()
                )));
            }
            if (sum.scale_bits(), sum.divisor()) != (block.scale_bits(), block.divisor()) {
                return Err(AggregationError::ProtocolViolation(format!(
                    "block {} has a scale of {} bits and a divisor of {} but the aggregated one \
                     has {} bits and {}",
                    i,
                    block.scale_bits(),
                    block.divisor(),
                    sum.scale_bits(),
                    sum.divisor()
                )));
            }
        }

        Ok(())
    }

    /// Adds the given `blocks` into the position-wise sums.
    ///
    /// It should be checked that [`validate_aggregation()`] succeeds before calling this, since
    /// aggregation may return garbage values otherwise.
    ///
    /// # Errors
    /// Fails if a block cannot be bound to the parameters of the aggregation.
    ///
    /// [`validate_aggregation()`]: Aggregation::validate_aggregation
    pub fn aggregate(&mut self, blocks: Vec<EncryptedBlock>) -> Result<(), AggregationError> {
        let blocks = blocks
            .into_par_iter()
            .map(|block| block.bind(&self.params))
            .collect::<Result<Vec<_>, _>>()?;
        if self.nb_models == 0 {
            self.sums = blocks;
            self.nb_models = 1;
            return Ok(());
        }

        let params = &self.params;
        self.sums
            .par_iter_mut()
            .zip(blocks.par_iter())
            .for_each(|(sum, block)| {
                *sum = EncryptedBlock::from_parts(
                    sum.fingerprint(),
                    sum.scale_bits(),
                    sum.divisor(),
                    sum.len(),
                    params,
                    sum.ciphertext() + block.ciphertext(),
                );
            });
        self.nb_models += 1;
        Ok(())
    }

    /// Multiplies the sums by the plaintext weight `1 / n` and returns the encrypted mean.
    ///
    /// The mean keeps the scale of the submissions and multiplies their divisor by `n * w`.
    ///
    /// # Errors
    /// Fails with [`AggregationError::NoContributions`] if nothing was aggregated and with
    /// [`AggregationError::TooManyContributions`] if the weight precision cannot represent `1 / n`.
    pub fn finalize(self) -> Result<Vec<EncryptedBlock>, AggregationError> {
        if self.nb_models == 0 {
            return Err(AggregationError::NoContributions);
        }

        let weight = averaging_weight(self.nb_models, self.weight_bits);
        let scaling = (self.nb_models as u64)
            .checked_mul(weight)
            .filter(|scaling| *scaling > 0)
            .ok_or(AggregationError::TooManyContributions(self.nb_models))?;
        let divisors = self
            .sums
            .iter()
            .map(|sum| sum.divisor().checked_mul(scaling))
            .collect::<Option<Vec<_>>>()
            .ok_or(AggregationError::TooManyContributions(self.nb_models))?;
        let weight = Plaintext::try_encode(&[weight][..], Encoding::poly(), &self.params)
            .map_err(CryptoError::from)?;
        debug!(
            "averaging {} blocks of {} submissions",
            self.sums.len(),
            self.nb_models
        );
        let params = &self.params;
        Ok(self
            .sums
            .into_par_iter()
            .zip(divisors)
            .map(|(sum, divisor)| {
                EncryptedBlock::from_parts(
                    sum.fingerprint(),
                    sum.scale_bits(),
                    divisor,
                    sum.len(),
                    params,
                    sum.ciphertext() * &weight,
                )
            })
            .collect())
    }
}

/// Computes the encrypted position-wise mean of all `submissions`.
///
/// Either all submissions are consumed or none: every submission is validated before the first
/// ciphertext is touched.
///
/// # Errors
/// Fails with [`AggregationError::NoContributions`] if there are no submissions and with
/// [`AggregationError::ProtocolViolation`] if the submissions disagree in their block layout.
pub fn aggregate<I>(
    context: &impl EncryptionContext,
    submissions: I,
) -> Result<Vec<EncryptedBlock>, AggregationError>
where
    I: IntoIterator<Item = Vec<EncryptedBlock>>,
{
    let submissions = submissions.into_iter().collect::<Vec<_>>();
    let mut aggregation = Aggregation::new(context);
    if let Some(first) = submissions.first() {
        aggregation = aggregation.with_block_count(first.len());
        let layout = first
            .iter()
            .map(|block| (block.len(), block.scale_bits()))
            .collect::<Vec<_>>();
        for (i, blocks) in submissions.iter().enumerate() {
            aggregation.validate_aggregation(blocks)?;
            let matches = blocks
                .iter()
                .map(|block| (block.len(), block.scale_bits()))
                .eq(layout.iter().copied());
            if !matches {
                return Err(AggregationError::ProtocolViolation(format!(
                    "submission {} disagrees with the block layout of the first submission",
                    i
                )));
            }
        }
    }
    for blocks in submissions {
        aggregation.aggregate(blocks)?;
    }
    aggregation.finalize()
}
