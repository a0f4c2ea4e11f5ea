//! Encryption contexts and the encrypted block channel.
//!
//! The homomorphic primitives come from the [fhe] crate (BFV). Real values are mapped onto BFV
//! plaintext coefficients as fixed-point integers, which gives the approximate real arithmetic
//! the aggregation needs: ciphertext addition and multiplication by a plaintext scalar.
//!
//! A context exists at two capability levels, represented by two types:
//! - [`FullContext`]: encrypts and decrypts. Shared by all contributors.
//! - [`PublicContext`]: encrypts and performs ciphertext arithmetic. Held by the coordinator.
//!
//! Decryption is only defined on [`FullContext`]. When a context is loaded from bytes of unknown
//! capability, the [`Context`] enum reports [`CryptoError::InsufficientCapability`] on a decrypt
//! attempt with the public variant.
//!
//! # Examples
//! ```no_run
//! # use hefl_core::crypto::{decrypt_block, encrypt_block, FullContext, SchemeParams};
//! let full = FullContext::generate(SchemeParams::default()).unwrap();
//! let public = full.to_public();
//! let block = encrypt_block(&[0.5, -1.25, 3.], &public).unwrap();
//! let values = decrypt_block(&block, &full).unwrap();
//! assert!((values[1] + 1.25).abs() < 1e-6);
//! ```
//!
//! [fhe]: https://docs.rs/fhe/

pub(crate) mod channel;
pub(crate) mod context;
pub(crate) mod hash;
pub(crate) mod params;

use sodiumoxide::randombytes::randombytes;
use thiserror::Error;

pub use self::{
    channel::{decrypt_block, decrypt_blocks, encrypt_block, encrypt_blocks, EncryptedBlock},
    context::{Context, EncryptionContext, FullContext, PublicContext, SecretSeed},
    hash::Fingerprint,
    params::SchemeParams,
};

#[derive(Debug, Error)]
/// Errors related to encryption contexts and encrypted blocks.
pub enum CryptoError {
    #[error("invalid context: {0}")]
    InvalidContext(String),

    #[error("insufficient capability: decryption requires a full context")]
    InsufficientCapability,

    #[error("context mismatch: {0}")]
    ContextMismatch(String),

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("malformed encoding: {0}")]
    Malformed(#[from] bincode::Error),

    #[error("homomorphic scheme failure: {0}")]
    Scheme(#[from] fhe::Error),

    #[error("failed to access the context file: {0}")]
    Io(#[from] std::io::Error),
}

/// An interface for slicing into cryptographic byte objects.
pub trait ByteObject: Sized {
    /// Length in bytes of this object
    const LENGTH: usize;

    /// Gets the object byte representation.
    fn as_slice(&self) -> &[u8];

    /// Creates an object from the given buffer.
    ///
    /// # Errors
    /// Returns `None` if the length of the byte-slice isn't equal to the length of the object.
    fn from_slice(bytes: &[u8]) -> Option<Self>;

    /// Generates an object with random bytes
    fn generate() -> Option<Self> {
        Self::from_slice(randombytes(Self::LENGTH).as_slice())
    }
}
