//! Fingerprints of scheme parameters.
//!
//! See the [crypto module] documentation since this is a private module anyways.
//!
//! [crypto module]: crate::crypto

use std::fmt;

use derive_more::{AsRef, From};
use sodiumoxide::crypto::hash::sha256;

use super::ByteObject;

#[derive(AsRef, From, Serialize, Deserialize, Hash, Eq, PartialEq, Copy, Clone)]
/// The `SHA256` digest of serialized scheme parameters.
///
/// Every encrypted block carries the fingerprint of the context it was produced under, so that
/// blocks of another deployment are detected before any ciphertext is parsed.
pub struct Fingerprint(sha256::Digest);

impl ByteObject for Fingerprint {
    const LENGTH: usize = sha256::DIGESTBYTES;

    fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        sha256::Digest::from_slice(bytes).map(Self)
    }
}

impl Fingerprint {
    /// Computes the fingerprint of the serialized parameters `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        Self(sha256::hash(bytes))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint(")?;
        for byte in &self.as_slice()[..8] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..)")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.as_slice() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint() {
        let a = Fingerprint::of(b"params-a");
        assert_eq!(a, Fingerprint::of(b"params-a"));
        assert_ne!(a, Fingerprint::of(b"params-b"));
        assert_eq!(a.as_slice().len(), Fingerprint::LENGTH);
        assert_eq!(Fingerprint::from_slice(a.as_slice()), Some(a));
        assert_eq!(Fingerprint::from_slice(&[0; 31]), None);
        assert_eq!(a.to_string().len(), 2 * Fingerprint::LENGTH);
    }
}
