use ark_ec::CurveGroup;
use ark_serialize::*;
use ark_std::{rand::RngCore, UniformRand, Zero};

use crate::error::PreError;
use crate::security::SensitiveScalar;
use crate::utils::to_bytes;

/// Private key of a delegator or delegatee.
///
/// Never leaves its holder: fragments are derived from it, but it cannot be
/// recovered from any number of fragments short of the policy threshold
/// combined with the delegatee's own key.
#[derive(CanonicalSerialize, CanonicalDeserialize, Clone, Debug)]
pub struct SecretKey<C: CurveGroup> {
    scalar: SensitiveScalar<C::ScalarField>,
}

/// Public key: `G·sk` on the suite's curve.
#[derive(CanonicalSerialize, CanonicalDeserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PublicKey<C: CurveGroup> {
    pub point: C,
}

impl<C: CurveGroup> SecretKey<C> {
    /// Creates a new secret key with a random non-zero scalar.
    ///
    /// # Arguments
    /// * `rng` - A random number generator
    pub fn random<R: RngCore>(rng: &mut R) -> Self {
        loop {
            let scalar = C::ScalarField::rand(rng);
            if !scalar.is_zero() {
                return SecretKey {
                    scalar: SensitiveScalar::new(scalar),
                };
            }
        }
    }

    /// Builds a secret key from an existing scalar.
    ///
    /// # Errors
    /// Returns an error if the scalar is zero
    pub fn from_scalar(scalar: C::ScalarField) -> Result<Self, PreError> {
        if scalar.is_zero() {
            return Err(PreError::InvalidParameter(
                "secret scalar cannot be zero".to_string(),
            ));
        }
        Ok(SecretKey {
            scalar: SensitiveScalar::new(scalar),
        })
    }

    /// Derives the matching public key.
    pub fn public_key(&self) -> PublicKey<C> {
        PublicKey {
            point: C::generator() * self.scalar.expose_secret(),
        }
    }

    pub(crate) fn scalar(&self) -> &C::ScalarField {
        self.scalar.expose_secret()
    }

    /// Deserializes a secret key, rejecting the zero scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PreError> {
        let key = Self::deserialize_compressed(bytes)?;
        if key.scalar().is_zero() {
            return Err(PreError::InvalidParameter(
                "secret scalar cannot be zero".to_string(),
            ));
        }
        Ok(key)
    }
}

impl<C: CurveGroup> PublicKey<C> {
    /// Compressed canonical encoding of the point.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PreError> {
        to_bytes(&self.point)
    }

    /// Decodes a public key, rejecting the identity point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PreError> {
        let point = C::deserialize_compressed(bytes)?;
        if point.is_zero() {
            return Err(PreError::InvalidParameter(
                "public key cannot be the identity".to_string(),
            ));
        }
        Ok(PublicKey { point })
    }
}
