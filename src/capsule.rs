use ark_ec::CurveGroup;
use ark_ff::Field;
use ark_serialize::*;
use ark_std::{rand::RngCore, UniformRand, Zero};

use crate::error::PreError;
use crate::keys::{PublicKey, SecretKey};
use crate::policy::{CapsuleId, PolicyId};
use crate::security::{constant_time_eq_canonical, SymmetricKey};
use crate::utils::{hash_to_id, hash_to_scalar, kdf, to_bytes, DST_CAPSULE, DST_CAPSULE_ID, DST_NON_INTERACTIVE};

/// An encapsulated symmetric key bound to one public key.
///
/// `point_e = G·r`, `point_v = G·u` and `signature = u + r·H(E, V)`. The
/// signature lets anyone (proxies included) check the capsule was formed
/// honestly before transforming it.
#[derive(CanonicalSerialize, CanonicalDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capsule<C: CurveGroup> {
    pub point_e: C,
    pub point_v: C,
    pub signature: C::ScalarField,
}

/// The delegatee-bound capsule reconstructed by the combiner.
///
/// `point_e`/`point_v` are the original points raised to `sk_delegator / d`,
/// where `d` is the non-interactive secret only the delegatee can recompute
/// from `precursor`.
#[derive(CanonicalSerialize, CanonicalDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReencryptedCapsule<C: CurveGroup> {
    pub point_e: C,
    pub point_v: C,
    pub precursor: C,
    pub policy: PolicyId,
    pub capsule_id: CapsuleId,
}

/// Either form of capsule a key holder can open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncapsulatedKey<C: CurveGroup> {
    /// Produced by [`encapsulate`]; opened with the original recipient's key
    Original(Capsule<C>),
    /// Produced by the combiner; opened with the delegatee's key
    Reencrypted(ReencryptedCapsule<C>),
}

impl<C: CurveGroup> From<Capsule<C>> for EncapsulatedKey<C> {
    fn from(capsule: Capsule<C>) -> Self {
        EncapsulatedKey::Original(capsule)
    }
}

impl<C: CurveGroup> From<ReencryptedCapsule<C>> for EncapsulatedKey<C> {
    fn from(capsule: ReencryptedCapsule<C>) -> Self {
        EncapsulatedKey::Reencrypted(capsule)
    }
}

impl<C: CurveGroup> EncapsulatedKey<C> {
    /// Identifier of the original capsule this key descends from.
    pub fn capsule_id(&self) -> Result<CapsuleId, PreError> {
        match self {
            EncapsulatedKey::Original(capsule) => capsule.id(),
            EncapsulatedKey::Reencrypted(capsule) => Ok(capsule.capsule_id),
        }
    }
}

impl<C: CurveGroup> Capsule<C> {
    fn challenge(point_e: &C, point_v: &C) -> Result<C::ScalarField, PreError> {
        let e_bytes = to_bytes(point_e)?;
        let v_bytes = to_bytes(point_v)?;
        Ok(hash_to_scalar(DST_CAPSULE, &[&e_bytes, &v_bytes]))
    }

    /// Checks `G·s == V + E·H(E, V)`.
    pub fn verify(&self) -> bool {
        let Ok(h) = Self::challenge(&self.point_e, &self.point_v) else {
            return false;
        };
        let lhs = C::generator() * self.signature;
        let rhs = self.point_v + self.point_e * h;
        constant_time_eq_canonical(&lhs, &rhs)
    }

    /// Digest of the canonical encoding.
    pub fn id(&self) -> Result<CapsuleId, PreError> {
        let bytes = to_bytes(self)?;
        Ok(CapsuleId::new(hash_to_id(DST_CAPSULE_ID, &[&bytes])))
    }

    /// Decodes a capsule and checks its signature.
    ///
    /// # Errors
    /// Returns `InvalidCapsule` if the decoded capsule does not verify
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PreError> {
        let capsule = Self::deserialize_compressed(bytes)?;
        if !capsule.verify() {
            return Err(PreError::InvalidCapsule);
        }
        Ok(capsule)
    }
}

/// Binds a fresh symmetric key to `public_key`.
///
/// Fresh randomness per call: two capsules for the same key are unrelated.
///
/// # Arguments
/// * `public_key` - The recipient's public key
/// * `rng` - A random number generator
pub fn encapsulate<C: CurveGroup, R: RngCore>(
    public_key: &PublicKey<C>,
    rng: &mut R,
) -> Result<(SymmetricKey, Capsule<C>), PreError> {
    let r = C::ScalarField::rand(rng);
    let u = C::ScalarField::rand(rng);

    let point_e = C::generator() * r;
    let point_v = C::generator() * u;
    let h = Capsule::<C>::challenge(&point_e, &point_v)?;
    let signature = u + r * h;

    let shared = public_key.point * (r + u);
    let key = kdf(&shared)?;

    Ok((
        key,
        Capsule {
            point_e,
            point_v,
            signature,
        },
    ))
}

/// Recovers the symmetric key from either form of capsule.
///
/// A wrong key yields a different symmetric key, which the consuming cipher
/// rejects. A capsule that fails its own integrity check yields
/// `DecapsulationFailure`, the same error the hybrid layer reports for a bad
/// key.
pub fn decapsulate<C: CurveGroup>(
    secret_key: &SecretKey<C>,
    encapsulated: &EncapsulatedKey<C>,
) -> Result<SymmetricKey, PreError> {
    match encapsulated {
        EncapsulatedKey::Original(capsule) => {
            if !capsule.verify() {
                return Err(PreError::DecapsulationFailure);
            }
            let shared = (capsule.point_e + capsule.point_v) * secret_key.scalar();
            kdf(&shared)
        }
        EncapsulatedKey::Reencrypted(capsule) => {
            let delegatee = secret_key.public_key();
            let dh = capsule.precursor * secret_key.scalar();
            let d = non_interactive_secret(&capsule.precursor, &delegatee, &dh)?;
            let shared = (capsule.point_e + capsule.point_v) * d;
            if shared.is_zero() {
                return Err(PreError::DecapsulationFailure);
            }
            kdf(&shared)
        }
    }
}

/// The scalar `d = H(X, pk_delegatee, dh)` shared between the delegator (who
/// knows `x`) and the delegatee (who knows `b`), where `dh = pk_b·x = X·b`.
pub(crate) fn non_interactive_secret<C: CurveGroup>(
    precursor: &C,
    delegatee: &PublicKey<C>,
    dh: &C,
) -> Result<C::ScalarField, PreError> {
    let precursor_bytes = to_bytes(precursor)?;
    let delegatee_bytes = to_bytes(&delegatee.point)?;
    let dh_bytes = to_bytes(dh)?;
    let d: C::ScalarField = hash_to_scalar(
        DST_NON_INTERACTIVE,
        &[&precursor_bytes, &delegatee_bytes, &dh_bytes],
    );
    // zero would make the transform non-invertible
    if d.inverse().is_none() {
        return Err(PreError::DecapsulationFailure);
    }
    Ok(d)
}
