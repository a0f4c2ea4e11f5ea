//! Scheme parameters and the fixed-point encoding of reals.
//!
//! See the [crypto module] documentation since this is a private module anyways.
//!
//! [crypto module]: crate::crypto

use std::sync::Arc;

use fhe::bfv::{BfvParameters, BfvParametersBuilder};

use super::CryptoError;

/// `2^61 - 1`, the reference plaintext modulus.
pub const REFERENCE_PLAINTEXT_MODULUS: u64 = (1 << 61) - 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// The parameters of a deployment's encryption scheme.
///
/// Changing any of them invalidates all previously serialized ciphertexts.
pub struct SchemeParams {
    /// The polynomial degree. It is also the number of slots of one ciphertext, which bounds the
    /// block capacity.
    pub degree: usize,
    /// The plaintext modulus `t`. Decoded integers live in `(-t/2, t/2)`.
    pub plaintext_modulus: u64,
    /// The bit sizes of the ciphertext moduli.
    pub moduli_sizes: Vec<usize>,
    /// The global fixed-point scale: a real `x` is encoded as `round(x * 2^scale_bits)`.
    pub scale_bits: u32,
    /// The fixed-point precision of the averaging weight `1 / n`.
    pub weight_bits: u32,
}

impl Default for SchemeParams {
    fn default() -> Self {
        Self {
            degree: 8192,
            plaintext_modulus: REFERENCE_PLAINTEXT_MODULUS,
            moduli_sizes: vec![62, 62, 62],
            scale_bits: 30,
            weight_bits: 20,
        }
    }
}

impl SchemeParams {
    /// Gets the number of values one ciphertext holds.
    pub fn slot_count(&self) -> usize {
        self.degree
    }

    /// Gets the magnitude below which an averaged value decodes correctly.
    pub fn max_magnitude(&self) -> f64 {
        let headroom = self.plaintext_bits() as i32 - 1;
        2_f64.powi(headroom - (self.scale_bits + self.weight_bits) as i32)
    }

    /// Builds the BFV parameters.
    ///
    /// # Errors
    /// Fails if the fixed-point scales leave no room for values in the plaintext space or if the
    /// BFV parameters themselves are invalid.
    pub fn build(&self) -> Result<Arc<BfvParameters>, CryptoError> {
        if self.scale_bits + self.weight_bits + 1 >= self.plaintext_bits() {
            return Err(CryptoError::InvalidContext(format!(
                "scale of {} bits and weight of {} bits exceed the {} bits plaintext modulus",
                self.scale_bits,
                self.weight_bits,
                self.plaintext_bits()
            )));
        }
        BfvParametersBuilder::new()
            .set_degree(self.degree)
            .set_plaintext_modulus(self.plaintext_modulus)
            .set_moduli_sizes(&self.moduli_sizes)
            .build_arc()
            .map_err(CryptoError::from)
    }

    fn plaintext_bits(&self) -> u32 {
        u64::BITS - self.plaintext_modulus.leading_zeros()
    }
}

/// Encodes reals as fixed-point integers of the given scale.
pub(crate) fn encode_fixed(values: &[f64], scale_bits: u32) -> Vec<i64> {
    let scale = 2_f64.powi(scale_bits as i32);
    values
        .iter()
        .map(|value| (value * scale).round() as i64)
        .collect()
}

/// Decodes fixed-point integers of the given scale into reals, dividing them by `divisor`.
pub(crate) fn decode_fixed(values: &[i64], scale_bits: u32, divisor: u64) -> Vec<f64> {
    let scale = 2_f64.powi(scale_bits as i32) * divisor as f64;
    values.iter().map(|value| *value as f64 / scale).collect()
}

/// Gets the fixed-point weight `round(2^weight_bits / n)` used to average `n` values.
///
/// The weight is `0` if `n` exceeds `2^(weight_bits + 1)`.
pub(crate) fn averaging_weight(n: usize, weight_bits: u32) -> u64 {
    (2_f64.powi(weight_bits as i32) / n as f64).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_point_roundtrip() {
        let values = [0., 1., -1., 0.5, 1e-6, -123.456, 1000.];
        let decoded = decode_fixed(&encode_fixed(&values, 30), 30, 1);
        for (value, decoded) in values.iter().zip(decoded) {
            assert!((value - decoded).abs() <= 2_f64.powi(-31));
        }
    }

    #[test]
    fn test_averaging_weight() {
        assert_eq!(averaging_weight(1, 20), 1 << 20);
        assert_eq!(averaging_weight(2, 20), 1 << 19);
        assert_eq!(averaging_weight(3, 20), 349525);
        assert_eq!(averaging_weight(1 << 22, 20), 0);
    }

    #[test]
    fn test_divisor_cancels_the_weight_rounding() {
        // the sum 3000 of three contributions averaged with the weight of three
        let weight = averaging_weight(3, 20);
        let sum = encode_fixed(&[3000.], 30)[0] * weight as i64;
        let mean = decode_fixed(&[sum], 30, 3 * weight);
        assert_eq!(mean, vec![1000.]);
    }

    #[test]
    fn test_reference_bounds() {
        let params = SchemeParams::default();
        assert_eq!(params.plaintext_bits(), 61);
        assert_eq!(params.max_magnitude(), 1024.);
        assert_eq!(params.slot_count(), 8192);
    }

    #[test]
    fn test_scales_exceed_plaintext_space() {
        let params = SchemeParams {
            scale_bits: 40,
            weight_bits: 20,
            ..SchemeParams::default()
        };
        assert!(matches!(
            params.build(),
            Err(CryptoError::InvalidContext(_))
        ));
    }
}
