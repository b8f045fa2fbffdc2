//! Security utilities for protecting key material
//!
//! This module provides:
//! - A zeroizing wrapper for secret scalars (private keys, re-key shares)
//! - The zeroizing symmetric key produced by encapsulation
//! - Constant-time comparison for byte strings and serialized curve points

use ark_ff::Field;
use ark_serialize::{
    CanonicalDeserialize, CanonicalSerialize, Compress, Read, SerializationError, Valid, Validate,
    Write,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length in bytes of a [`SymmetricKey`].
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Holds a private key scalar, or the polynomial evaluation a proxy applies
/// to capsules as its re-key share.
///
/// Serializes exactly like the bare field element, so a fragment's wire form
/// does not change; the share is cleared when the holder drops it and never
/// shows up in logs.
#[derive(Clone)]
pub struct SensitiveScalar<F: Field> {
    scalar: F,
}

impl<F: Field> SensitiveScalar<F> {
    pub fn new(scalar: F) -> Self {
        Self { scalar }
    }

    /// The share itself, for the group operation that applies it.
    pub fn expose_secret(&self) -> &F {
        &self.scalar
    }
}

impl<F: Field> Zeroize for SensitiveScalar<F> {
    fn zeroize(&mut self) {
        self.scalar.set_zero();
    }
}

impl<F: Field> Drop for SensitiveScalar<F> {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl<F: Field> ZeroizeOnDrop for SensitiveScalar<F> {}

impl<F: Field> Valid for SensitiveScalar<F> {
    fn check(&self) -> Result<(), SerializationError> {
        self.scalar.check()
    }
}

impl<F: Field> CanonicalSerialize for SensitiveScalar<F> {
    fn serialize_with_mode<W: Write>(
        &self,
        writer: W,
        compress: Compress,
    ) -> Result<(), SerializationError> {
        self.scalar.serialize_with_mode(writer, compress)
    }

    fn serialized_size(&self, compress: Compress) -> usize {
        self.scalar.serialized_size(compress)
    }
}

impl<F: Field> CanonicalDeserialize for SensitiveScalar<F> {
    fn deserialize_with_mode<R: Read>(
        reader: R,
        compress: Compress,
        validate: Validate,
    ) -> Result<Self, SerializationError> {
        F::deserialize_with_mode(reader, compress, validate).map(Self::new)
    }
}

impl<F: Field> std::fmt::Debug for SensitiveScalar<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SensitiveScalar").field(&"[REDACTED]").finish()
    }
}

/// Symmetric key bound to a capsule.
///
/// Produced by encapsulation and recovered by decapsulation. Zeroized on drop,
/// compared in constant time.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: [u8; SYMMETRIC_KEY_SIZE],
}

impl SymmetricKey {
    pub(crate) fn from_bytes(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Raw key bytes, for handing to a symmetric cipher.
    pub fn expose_secret(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.bytes
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.bytes, &other.bytes)
    }
}

impl Eq for SymmetricKey {}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// Constant-time byte slice comparison
///
/// Slices of different length compare unequal; the length itself is not secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }

    result == 0
}

/// Constant-time equality for any canonically serializable value (curve
/// points, capsule components).
///
/// Serialization failure is treated as inequality.
pub fn constant_time_eq_canonical<T: CanonicalSerialize>(a: &T, b: &T) -> bool {
    let mut a_bytes = Vec::new();
    let mut b_bytes = Vec::new();

    if a.serialize_compressed(&mut a_bytes).is_err() {
        return false;
    }
    if b.serialize_compressed(&mut b_bytes).is_err() {
        return false;
    }

    constant_time_eq(&a_bytes, &b_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bls12_381::{Fr, G1Projective};
    use ark_ec::{AdditiveGroup, PrimeGroup};
    use ark_std::{UniformRand, Zero};

    #[test]
    fn test_sensitive_scalar_zeroization() {
        let mut rng = ark_std::test_rng();
        let secret = Fr::rand(&mut rng);

        let mut sensitive = SensitiveScalar::new(secret);
        assert_eq!(sensitive.expose_secret(), &secret);

        sensitive.zeroize();
        assert_eq!(sensitive.expose_secret(), &Fr::zero());
    }

    #[test]
    fn test_sensitive_scalar_debug() {
        let mut rng = ark_std::test_rng();
        let secret = Fr::rand(&mut rng);
        let sensitive = SensitiveScalar::new(secret);

        let debug_str = format!("{:?}", sensitive);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains(&format!("{:?}", secret)));
    }

    #[test]
    fn test_sensitive_scalar_serialization() {
        let mut rng = ark_std::test_rng();
        let sensitive = SensitiveScalar::new(Fr::rand(&mut rng));

        let mut bytes = Vec::new();
        sensitive.serialize_compressed(&mut bytes).unwrap();
        let back = SensitiveScalar::<Fr>::deserialize_compressed(&bytes[..]).unwrap();
        assert_eq!(back.expose_secret(), sensitive.expose_secret());
    }

    #[test]
    fn test_constant_time_eq() {
        let a = [1u8, 2, 3, 4];
        let b = [1u8, 2, 3, 4];
        let c = [1u8, 2, 3, 5];

        assert!(constant_time_eq(&a, &b));
        assert!(!constant_time_eq(&a, &c));
        assert!(!constant_time_eq(&a, &c[..3]));
    }

    #[test]
    fn test_constant_time_eq_points() {
        let g = G1Projective::generator();
        let g_double = g.double();

        assert!(constant_time_eq_canonical(&g, &g));
        assert!(constant_time_eq_canonical(&g_double, &(g + g)));
        assert!(!constant_time_eq_canonical(&g, &g_double));
    }

    #[test]
    fn test_symmetric_key_debug_and_eq() {
        let a = SymmetricKey::from_bytes([7u8; SYMMETRIC_KEY_SIZE]);
        let b = SymmetricKey::from_bytes([7u8; SYMMETRIC_KEY_SIZE]);
        let c = SymmetricKey::from_bytes([8u8; SYMMETRIC_KEY_SIZE]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(format!("{:?}", a).contains("[REDACTED]"));
    }
}
