//! Encryption, decryption and wire encoding of blocks.
//!
//! See the [crypto module] documentation since this is a private module anyways.
//!
//! [crypto module]: crate::crypto

use std::{borrow::Cow, convert::TryFrom, sync::Arc};

use fhe::bfv::{BfvParameters, Ciphertext, Encoding, Plaintext};
use fhe_traits::{
    DeserializeParametrized,
    FheDecoder,
    FheDecrypter,
    FheEncoder,
    FheEncrypter,
    Serialize as FheSerialize,
};
use rayon::prelude::*;

use super::{
    params::{decode_fixed, encode_fixed},
    CryptoError,
    EncryptionContext,
    Fingerprint,
    FullContext,
};

#[derive(Debug, Clone, PartialEq)]
/// One block encrypted under a context.
///
/// The block remembers the fingerprint of its context, the fixed-point encoding of the values it
/// encrypts and its true length. Slots past the length are zero.
///
/// A decrypted slot `v` decodes to `v / (2^scale_bits * divisor)`. Fresh blocks have a divisor of
/// `1`. The mean of `n` blocks is multiplied by the fixed-point weight `w = round(2^weight_bits /
/// n)` and carries the divisor `n * w`, so the rounding of `w` cancels out when decoding.
pub struct EncryptedBlock {
    fingerprint: Fingerprint,
    scale_bits: u32,
    divisor: u64,
    len: usize,
    params: Arc<BfvParameters>,
    ciphertext: Ciphertext,
}

/// The wire form of an [`EncryptedBlock`].
#[derive(Serialize, Deserialize)]
struct Envelope {
    fingerprint: Fingerprint,
    scale_bits: u32,
    divisor: u64,
    len: u32,
    ciphertext: Vec<u8>,
}

#[allow(clippy::len_without_is_empty)]
impl EncryptedBlock {
    pub(crate) fn from_parts(
        fingerprint: Fingerprint,
        scale_bits: u32,
        divisor: u64,
        len: usize,
        params: &Arc<BfvParameters>,
        ciphertext: Ciphertext,
    ) -> Self {
        Self {
            fingerprint,
            scale_bits,
            divisor,
            len,
            params: params.clone(),
            ciphertext,
        }
    }

    /// Gets the fingerprint of the context this block was produced under.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Gets the fixed-point scale of the encrypted values.
    pub fn scale_bits(&self) -> u32 {
        self.scale_bits
    }

    /// Gets the integer the decoded values are divided by on top of the fixed-point scale.
    pub fn divisor(&self) -> u64 {
        self.divisor
    }

    /// Gets the number of encrypted values.
    pub fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn ciphertext(&self) -> &Ciphertext {
        &self.ciphertext
    }

    /// Gets the ciphertext bound to the given BFV parameters.
    ///
    /// The arithmetic and the decryption of `fhe` require both operands to share the same
    /// parameters instance. Equal parameters of another instance, for instance those of a
    /// reloaded context, are bound by re-reading the ciphertext.
    fn ciphertext_under(
        &self,
        params: &Arc<BfvParameters>,
    ) -> Result<Cow<'_, Ciphertext>, CryptoError> {
        if Arc::ptr_eq(&self.params, params) {
            return Ok(Cow::Borrowed(&self.ciphertext));
        }
        if self.params != *params {
            return Err(CryptoError::ContextMismatch(
                "the block was produced under other BFV parameters".into(),
            ));
        }
        Ciphertext::from_bytes(&self.ciphertext.to_bytes(), params)
            .map(Cow::Owned)
            .map_err(|err| CryptoError::ContextMismatch(err.to_string()))
    }

    /// Binds the block to the given BFV parameters.
    pub(crate) fn bind(self, params: &Arc<BfvParameters>) -> Result<Self, CryptoError> {
        if Arc::ptr_eq(&self.params, params) {
            return Ok(self);
        }
        let ciphertext = self.ciphertext_under(params)?.into_owned();
        Ok(Self {
            params: params.clone(),
            ciphertext,
            ..self
        })
    }

    /// Serializes the block into the bytes sent over the wire.
    pub fn serialize(&self) -> Result<Vec<u8>, CryptoError> {
        let len = u32::try_from(self.len).map_err(|_| {
            CryptoError::InvalidContext(format!("block length {} is not encodable", self.len))
        })?;
        let envelope = Envelope {
            fingerprint: self.fingerprint,
            scale_bits: self.scale_bits,
            divisor: self.divisor,
            len,
            ciphertext: self.ciphertext.to_bytes(),
        };
        bincode::serialize(&envelope).map_err(CryptoError::from)
    }

    /// Deserializes a block received over the wire.
    ///
    /// # Errors
    /// Fails with [`CryptoError::ContextMismatch`] if the block was produced under other scheme
    /// parameters than the ones of `context`, and with [`CryptoError::Malformed`] or
    /// [`CryptoError::InvalidBlock`] if the bytes are not a block at all.
    pub fn deserialize(
        bytes: &[u8],
        context: &impl EncryptionContext,
    ) -> Result<Self, CryptoError> {
        let envelope: Envelope = bincode::deserialize(bytes)?;
        if envelope.fingerprint != context.fingerprint() {
            return Err(CryptoError::ContextMismatch(format!(
                "block was produced under {} but the context is {}",
                envelope.fingerprint,
                context.fingerprint()
            )));
        }
        if envelope.divisor == 0 {
            return Err(CryptoError::InvalidBlock("the divisor is zero".into()));
        }
        let len = envelope.len as usize;
        if len > context.slot_count() {
            return Err(CryptoError::ContextMismatch(format!(
                "block of {} values exceeds the {} slots of the context",
                len,
                context.slot_count()
            )));
        }
        let ciphertext = Ciphertext::from_bytes(&envelope.ciphertext, context.params())
            .map_err(|err| CryptoError::ContextMismatch(err.to_string()))?;
        Ok(Self::from_parts(
            envelope.fingerprint,
            envelope.scale_bits,
            envelope.divisor,
            len,
            context.params(),
            ciphertext,
        ))
    }
}

/// Encrypts a block of reals under the given context.
///
/// The values are encoded with the global scale of the context. Only values whose magnitude stays
/// below [`SchemeParams::max_magnitude()`] survive the averaging.
///
/// # Errors
/// Fails with [`CryptoError::InvalidContext`] if the block does not fit into the slots of the
/// context.
///
/// [`SchemeParams::max_magnitude()`]: crate::crypto::SchemeParams::max_magnitude
pub fn encrypt_block(
    block: &[f64],
    context: &impl EncryptionContext,
) -> Result<EncryptedBlock, CryptoError> {
    if block.len() > context.slot_count() {
        return Err(CryptoError::InvalidContext(format!(
            "block of {} values exceeds the {} slots of the context",
            block.len(),
            context.slot_count()
        )));
    }
    let scale_bits = context.scheme().scale_bits;
    let coefficients = encode_fixed(block, scale_bits);
    let plaintext =
        Plaintext::try_encode(coefficients.as_slice(), Encoding::poly(), context.params())?;
    let ciphertext = context
        .public_key()
        .try_encrypt(&plaintext, &mut rand::rng())?;
    Ok(EncryptedBlock::from_parts(
        context.fingerprint(),
        scale_bits,
        1,
        block.len(),
        context.params(),
        ciphertext,
    ))
}

/// Decrypts a block.
///
/// # Errors
/// Fails with [`CryptoError::ContextMismatch`] if the block was produced under another context.
pub fn decrypt_block(
    block: &EncryptedBlock,
    context: &FullContext,
) -> Result<Vec<f64>, CryptoError> {
    if block.fingerprint != context.fingerprint() {
        return Err(CryptoError::ContextMismatch(format!(
            "block was produced under {} but the context is {}",
            block.fingerprint,
            context.fingerprint()
        )));
    }
    let ciphertext = block.ciphertext_under(context.params())?;
    let plaintext = context.secret_key().try_decrypt(&ciphertext)?;
    let coefficients = Vec::<i64>::try_decode(&plaintext, Encoding::poly())?;
    Ok(decode_fixed(
        &coefficients[..block.len],
        block.scale_bits,
        block.divisor,
    ))
}

/// Encrypts all blocks in parallel, keeping their order.
pub fn encrypt_blocks<B, C>(blocks: &[B], context: &C) -> Result<Vec<EncryptedBlock>, CryptoError>
where
    B: AsRef<[f64]> + Sync,
    C: EncryptionContext + Sync,
{
    blocks
        .par_iter()
        .map(|block| encrypt_block(block.as_ref(), context))
        .collect()
}

/// Decrypts all blocks in parallel, keeping their order.
pub fn decrypt_blocks(
    blocks: &[EncryptedBlock],
    context: &FullContext,
) -> Result<Vec<Vec<f64>>, CryptoError> {
    blocks
        .par_iter()
        .map(|block| decrypt_block(block, context))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{assert_close, full_context, test_scheme};

    #[test]
    fn test_encrypt_decrypt() {
        let full = full_context();
        let values = [0.1, -0.2, 3.75, 1000., -999.5, 0.];
        let block = encrypt_block(&values, &full.to_public()).unwrap();
        assert_eq!(block.len(), values.len());
        assert_eq!(block.scale_bits(), full.scheme().scale_bits);
        assert_close(&decrypt_block(&block, &full).unwrap(), &values, 1e-6);
    }

    #[test]
    fn test_full_capacity_block() {
        let full = full_context();
        let values = (0..full.slot_count())
            .map(|i| (i as f64).sin())
            .collect::<Vec<_>>();
        let block = encrypt_block(&values, &full).unwrap();
        assert_close(&decrypt_block(&block, &full).unwrap(), &values, 1e-6);
    }

    #[test]
    fn test_block_exceeds_slots() {
        let full = full_context();
        let values = vec![1.; full.slot_count() + 1];
        assert!(matches!(
            encrypt_block(&values, &full),
            Err(CryptoError::InvalidContext(_))
        ));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let full = full_context();
        let public = full.to_public();
        let block = encrypt_block(&[1., 2., 3.], &public).unwrap();
        let bytes = block.serialize().unwrap();
        let restored = EncryptedBlock::deserialize(&bytes, &public).unwrap();
        assert_eq!(restored, block);
        assert_close(&decrypt_block(&restored, &full).unwrap(), &[1., 2., 3.], 1e-6);
    }

    #[test]
    fn test_deserialize_under_other_context() {
        let full = full_context();
        let block = encrypt_block(&[1., 2., 3.], &full).unwrap();
        let bytes = block.serialize().unwrap();

        let other = FullContext::generate(test_scheme()).unwrap();
        assert!(matches!(
            EncryptedBlock::deserialize(&bytes, &other),
            Err(CryptoError::ContextMismatch(_))
        ));
        assert!(matches!(
            decrypt_block(&block, &other),
            Err(CryptoError::ContextMismatch(_))
        ));
    }

    #[test]
    fn test_deserialize_garbage() {
        let full = full_context();
        assert!(matches!(
            EncryptedBlock::deserialize(&[0; 5], &full),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn test_parallel_blocks_keep_order() {
        let full = full_context();
        let blocks = vec![vec![1., 1.], vec![2., 2.], vec![3.]];
        let encrypted = encrypt_blocks(&blocks, &full.to_public()).unwrap();
        let decrypted = decrypt_blocks(&encrypted, &full).unwrap();
        for (decrypted, block) in decrypted.iter().zip(&blocks) {
            assert_close(decrypted, block, 1e-6);
        }
    }
}
