//! Full and public encryption contexts.
//!
//! See the [crypto module] documentation since this is a private module anyways.
//!
//! [crypto module]: crate::crypto

use std::{convert::TryInto, fmt, fs, path::Path, sync::Arc};

use fhe::bfv::{BfvParameters, PublicKey, SecretKey};
use fhe_traits::{DeserializeParametrized, Serialize as FheSerialize};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use super::{ByteObject, CryptoError, Fingerprint, SchemeParams};
use crate::crypto::{channel, EncryptedBlock};

/// Read access to a context with at least encryption capability.
///
/// Both [`FullContext`] and [`PublicContext`] implement it. Decryption is deliberately not part of
/// this interface.
pub trait EncryptionContext {
    /// Gets the scheme parameters of the context.
    fn scheme(&self) -> &SchemeParams;

    /// Gets the BFV parameters built from the scheme parameters.
    fn params(&self) -> &Arc<BfvParameters>;

    /// Gets the public key used for encryption.
    fn public_key(&self) -> &PublicKey;

    /// Gets the fingerprint that binds ciphertexts to this context.
    fn fingerprint(&self) -> Fingerprint;

    /// Gets the number of values one encrypted block holds.
    fn slot_count(&self) -> usize {
        self.scheme().slot_count()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
/// The seed from which the secret key of a deployment is derived.
pub struct SecretSeed([u8; 32]);

impl ByteObject for SecretSeed {
    const LENGTH: usize = 32;

    fn as_slice(&self) -> &[u8] {
        &self.0
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }
}

impl SecretSeed {
    fn derive_secret_key(&self, params: &Arc<BfvParameters>) -> SecretKey {
        SecretKey::random(params, &mut ChaCha20Rng::from_seed(self.0))
    }
}

impl fmt::Debug for SecretSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretSeed(..)")
    }
}

/// The persisted form of a context. A public context has no seed.
#[derive(Serialize, Deserialize)]
struct ContextBlob {
    scheme: SchemeParams,
    public_key: Vec<u8>,
    secret_seed: Option<SecretSeed>,
}

impl ContextBlob {
    fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        bincode::serialize(self).map_err(CryptoError::from)
    }
}

#[derive(Debug, Clone)]
/// A context that encrypts and performs ciphertext arithmetic but cannot decrypt.
pub struct PublicContext {
    scheme: SchemeParams,
    params: Arc<BfvParameters>,
    public_key: PublicKey,
    fingerprint: Fingerprint,
}

impl PublicContext {
    fn from_parts(scheme: SchemeParams, public_key: &[u8]) -> Result<Self, CryptoError> {
        let params = scheme.build()?;
        let public_key = PublicKey::from_bytes(public_key, &params)
            .map_err(|err| CryptoError::InvalidContext(format!("invalid public key: {}", err)))?;
        Ok(Self::with_key(scheme, params, public_key))
    }

    fn with_key(scheme: SchemeParams, params: Arc<BfvParameters>, public_key: PublicKey) -> Self {
        let mut bytes = params.to_bytes();
        bytes.extend(public_key.to_bytes());
        let fingerprint = Fingerprint::of(&bytes);
        Self {
            scheme,
            params,
            public_key,
            fingerprint,
        }
    }

    /// Serializes the context.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        ContextBlob {
            scheme: self.scheme.clone(),
            public_key: self.public_key.to_bytes(),
            secret_seed: None,
        }
        .to_bytes()
    }

    /// Deserializes a public context.
    ///
    /// # Errors
    /// Fails if the bytes are malformed or if they hold the decryption capability. A coordinator
    /// must never be handed a full context.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        match Context::from_bytes(bytes)? {
            Context::Public(context) => Ok(context),
            Context::Full(_) => Err(CryptoError::InvalidContext(
                "expected a public context but the blob holds the decryption capability".into(),
            )),
        }
    }

    /// Writes the context to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CryptoError> {
        fs::write(path, self.to_bytes()?).map_err(CryptoError::from)
    }

    /// Reads a public context from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        Self::from_bytes(&fs::read(path)?)
    }
}

impl EncryptionContext for PublicContext {
    fn scheme(&self) -> &SchemeParams {
        &self.scheme
    }

    fn params(&self) -> &Arc<BfvParameters> {
        &self.params
    }

    fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }
}

/// A context that encrypts and decrypts.
///
/// One full context is generated per deployment and distributed identically to every contributor.
/// Stripping it into a [`PublicContext`] is one-way.
pub struct FullContext {
    public: PublicContext,
    secret_key: SecretKey,
    secret_seed: SecretSeed,
}

impl FullContext {
    /// Generates a new context with a random secret.
    ///
    /// # Errors
    /// Fails if the scheme parameters are invalid.
    pub fn generate(scheme: SchemeParams) -> Result<Self, CryptoError> {
        sodiumoxide::init()
            .map_err(|_| CryptoError::InvalidContext("failed to initialize libsodium".into()))?;
        let seed = SecretSeed::generate()
            .ok_or_else(|| CryptoError::InvalidContext("failed to draw a secret seed".into()))?;
        let params = scheme.build()?;
        let secret_key = seed.derive_secret_key(&params);
        let public_key = PublicKey::new(&secret_key, &mut rand::rng());
        Ok(Self {
            public: PublicContext::with_key(scheme, params, public_key),
            secret_key,
            secret_seed: seed,
        })
    }

    fn with_public(public: PublicContext, secret_seed: SecretSeed) -> Self {
        let secret_key = secret_seed.derive_secret_key(&public.params);
        Self {
            public,
            secret_key,
            secret_seed,
        }
    }

    /// Gets a public view of this context.
    pub fn to_public(&self) -> PublicContext {
        self.public.clone()
    }

    /// Strips the decryption capability.
    pub fn into_public(self) -> PublicContext {
        self.public
    }

    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    /// Decrypts an encrypted block.
    pub fn decrypt_block(&self, block: &EncryptedBlock) -> Result<Vec<f64>, CryptoError> {
        channel::decrypt_block(block, self)
    }

    /// Serializes the context including its decryption capability.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        ContextBlob {
            scheme: self.public.scheme.clone(),
            public_key: self.public.public_key.to_bytes(),
            secret_seed: Some(self.secret_seed.clone()),
        }
        .to_bytes()
    }

    /// Deserializes a full context.
    ///
    /// # Errors
    /// Fails with [`CryptoError::InsufficientCapability`] if the bytes hold a public context.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        Context::from_bytes(bytes)?.into_full()
    }

    /// Writes the context to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CryptoError> {
        fs::write(path, self.to_bytes()?).map_err(CryptoError::from)
    }

    /// Reads a full context from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        Self::from_bytes(&fs::read(path)?)
    }
}

impl EncryptionContext for FullContext {
    fn scheme(&self) -> &SchemeParams {
        &self.public.scheme
    }

    fn params(&self) -> &Arc<BfvParameters> {
        &self.public.params
    }

    fn public_key(&self) -> &PublicKey {
        &self.public.public_key
    }

    fn fingerprint(&self) -> Fingerprint {
        self.public.fingerprint
    }
}

impl fmt::Debug for FullContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FullContext")
            .field("scheme", &self.public.scheme)
            .field("fingerprint", &self.public.fingerprint)
            .finish()
    }
}

#[derive(Debug)]
/// A context loaded from bytes of not yet known capability.
pub enum Context {
    Full(FullContext),
    Public(PublicContext),
}

impl Context {
    /// Deserializes a context of either capability.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let blob: ContextBlob = bincode::deserialize(bytes)?;
        let public = PublicContext::from_parts(blob.scheme, &blob.public_key)?;
        Ok(match blob.secret_seed {
            Some(seed) => Context::Full(FullContext::with_public(public, seed)),
            None => Context::Public(public),
        })
    }

    /// Reads a context of either capability from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        Self::from_bytes(&fs::read(path)?)
    }

    /// Checks whether the context holds the decryption capability.
    pub fn is_full(&self) -> bool {
        matches!(self, Context::Full(_))
    }

    /// Gets the full context.
    ///
    /// # Errors
    /// Fails with [`CryptoError::InsufficientCapability`] for a public context.
    pub fn as_full(&self) -> Result<&FullContext, CryptoError> {
        match self {
            Context::Full(context) => Ok(context),
            Context::Public(_) => Err(CryptoError::InsufficientCapability),
        }
    }

    /// Converts into the full context.
    ///
    /// # Errors
    /// Fails with [`CryptoError::InsufficientCapability`] for a public context.
    pub fn into_full(self) -> Result<FullContext, CryptoError> {
        match self {
            Context::Full(context) => Ok(context),
            Context::Public(_) => Err(CryptoError::InsufficientCapability),
        }
    }

    /// Strips the decryption capability, if any.
    pub fn into_public(self) -> PublicContext {
        match self {
            Context::Full(context) => context.into_public(),
            Context::Public(context) => context,
        }
    }

    /// Decrypts an encrypted block.
    ///
    /// # Errors
    /// Fails with [`CryptoError::InsufficientCapability`] for a public context.
    pub fn decrypt_block(&self, block: &EncryptedBlock) -> Result<Vec<f64>, CryptoError> {
        self.as_full()?.decrypt_block(block)
    }

    fn inner(&self) -> &PublicContext {
        match self {
            Context::Full(context) => &context.public,
            Context::Public(context) => context,
        }
    }
}

impl EncryptionContext for Context {
    fn scheme(&self) -> &SchemeParams {
        &self.inner().scheme
    }

    fn params(&self) -> &Arc<BfvParameters> {
        &self.inner().params
    }

    fn public_key(&self) -> &PublicKey {
        &self.inner().public_key
    }

    fn fingerprint(&self) -> Fingerprint {
        self.inner().fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::{encrypt_block, CryptoError},
        testutils::{full_context, test_scheme},
    };

    #[test]
    fn test_public_context_roundtrip() {
        let full = full_context();
        let public = full.to_public();
        let restored = PublicContext::from_bytes(&public.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.fingerprint(), full.fingerprint());
        assert_eq!(restored.scheme(), full.scheme());
    }

    #[test]
    fn test_full_context_roundtrip_decrypts() {
        let full = full_context();
        let restored = FullContext::from_bytes(&full.to_bytes().unwrap()).unwrap();
        let block = encrypt_block(&[1.5, -2.], &full.to_public()).unwrap();
        let values = restored.decrypt_block(&block).unwrap();
        assert!((values[0] - 1.5).abs() < 1e-6);
        assert!((values[1] + 2.).abs() < 1e-6);
    }

    #[test]
    fn test_regenerated_keys_are_detected() {
        let a = full_context();
        let b = FullContext::generate(test_scheme()).unwrap();
        assert_eq!(a.scheme(), b.scheme());
        assert_ne!(a.fingerprint(), b.fingerprint());
        let block = encrypt_block(&[0.25], &a).unwrap();
        assert!(matches!(
            b.decrypt_block(&block),
            Err(CryptoError::ContextMismatch(_))
        ));
    }

    #[test]
    fn test_public_blob_is_not_full() {
        let public = full_context().to_public();
        let bytes = public.to_bytes().unwrap();
        assert!(matches!(
            FullContext::from_bytes(&bytes),
            Err(CryptoError::InsufficientCapability)
        ));

        let context = Context::from_bytes(&bytes).unwrap();
        assert!(!context.is_full());
        let block = encrypt_block(&[1., 2., 3.], &context).unwrap();
        assert!(matches!(
            context.decrypt_block(&block),
            Err(CryptoError::InsufficientCapability)
        ));
    }

    #[test]
    fn test_full_blob_is_not_public() {
        let bytes = full_context().to_bytes().unwrap();
        assert!(matches!(
            PublicContext::from_bytes(&bytes),
            Err(CryptoError::InvalidContext(_))
        ));
        assert!(Context::from_bytes(&bytes).unwrap().is_full());
    }

    #[test]
    fn test_garbage_blob() {
        assert!(matches!(
            Context::from_bytes(&[1, 2, 3]),
            Err(CryptoError::Malformed(_))
        ));
    }
}
