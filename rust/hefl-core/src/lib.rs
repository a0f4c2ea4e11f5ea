#![cfg_attr(docsrs, feature(doc_cfg))]
//! # hefl: chunked homomorphic secure aggregation
//!
//! Several contributors jointly compute the average of their model parameters across rounds while
//! the coordinator only ever sees ciphertexts. The coordinator holds a [`PublicContext`] and
//! performs additions and plaintext multiplications on encrypted blocks. Contributors hold the
//! shared [`FullContext`] and are the only parties able to decrypt.
//!
//! The pipeline from a structured set of tensors to the wire and back is:
//!
//! ```text
//! ParameterSet --flatten--> FlatVector --chunk--> [Block] --encrypt--> [EncryptedBlock]
//!                                                                          |
//!                                                               aggregate (coordinator)
//!                                                                          |
//! ParameterSet <-unflatten- FlatVector <-dechunk- [Block] <--decrypt-- [EncryptedBlock]
//! ```
//!
//! ## Trust model
//!
//! Every contributor holds the *same* full context. Confidentiality therefore holds against the
//! coordinator only: any contributor is able to decrypt the raw submission of any other
//! contributor if it gets hold of it. Per-contributor key shares with threshold decryption would
//! be needed to protect contributors from each other, which this crate does not provide.
//!
//! ## Numerical behaviour
//!
//! Reals are encoded as fixed-point integers (see [`SchemeParams`]), so decrypted values differ
//! from the originals by at most `2^-(scale_bits + 1)`. The mean of `n` blocks records the exact
//! divisor of its fixed-point weight, so averaging adds no bias whatever `n` is. With the
//! reference parameters, means must stay below `1024` in magnitude.
//!
//! [`PublicContext`]: crate::crypto::PublicContext
//! [`FullContext`]: crate::crypto::FullContext
//! [`SchemeParams`]: crate::crypto::SchemeParams

#[macro_use]
extern crate serde;
#[macro_use]
extern crate tracing;

pub mod aggregation;
pub mod chunk;
pub mod codec;
pub mod common;
pub mod crypto;
#[cfg(any(test, feature = "testutils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testutils")))]
pub mod testutils;

pub use self::{
    aggregation::{Aggregation, AggregationError},
    chunk::{chunk, dechunk, Block, ChunkError, Chunker, DEFAULT_BLOCK_CAPACITY},
    codec::{flatten, unflatten, CodecError, FlatVector, LayerId, ParameterSet, ShapeSignature},
    common::{
        ContributorId,
        EvaluationReport,
        EvaluationSummary,
        GlobalModel,
        Payload,
        PhaseName,
        RoundParameters,
        Submission,
    },
};
