//! Helpers for tests of this crate and of the crates depending on it.

use crate::{
    chunk::chunk,
    codec::ParameterSet,
    crypto::{
        encrypt_blocks,
        params::REFERENCE_PLAINTEXT_MODULUS,
        EncryptedBlock,
        EncryptionContext,
        FullContext,
        SchemeParams,
    },
};

/// Scheme parameters small enough for fast tests.
///
/// They keep the reference plaintext modulus and moduli count, so they leave the same noise budget
/// for one round of averaging.
pub fn test_scheme() -> SchemeParams {
    SchemeParams {
        degree: 2048,
        plaintext_modulus: REFERENCE_PLAINTEXT_MODULUS,
        moduli_sizes: vec![62, 62, 62],
        scale_bits: 30,
        weight_bits: 20,
    }
}

/// Generates a fresh full context with the [`test_scheme()`].
pub fn full_context() -> FullContext {
    FullContext::generate(test_scheme()).unwrap()
}

/// Chunks and encrypts `values`.
pub fn encrypt_vector(
    values: &[f64],
    capacity: usize,
    context: &(impl EncryptionContext + Sync),
) -> Vec<EncryptedBlock> {
    let blocks = chunk(values, capacity).unwrap();
    encrypt_blocks(&blocks, context).unwrap()
}

/// A small parameter set with a `(2, 2)` and a `(3,)` layer.
pub fn parameter_set(offset: f64) -> ParameterSet {
    let weights = ndarray::ArrayD::from_shape_vec(
        ndarray::IxDyn(&[2, 2]),
        vec![1. + offset, 2. + offset, 3. + offset, 4. + offset],
    )
    .unwrap();
    let bias =
        ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&[3]), vec![offset, -offset, 0.5]).unwrap();
    vec![("weights", weights), ("bias", bias)]
        .into_iter()
        .collect()
}

/// Asserts that both slices are equal up to `tolerance`.
pub fn assert_close(actual: &[f64], expected: &[f64], tolerance: f64) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "element {}: {} differs from {}",
            i,
            a,
            e
        );
    }
}
