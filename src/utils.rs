use ark_ff::{Field, PrimeField};
use ark_serialize::CanonicalSerialize;
use blake2::{Blake2b512, Digest};

use crate::error::PreError;
use crate::security::{SymmetricKey, SYMMETRIC_KEY_SIZE};

/// Prefix mixed into every hash so digests can't collide with other protocols.
const DOMAIN_PREFIX: &[u8] = b"threshold-pre-v1:";

pub(crate) const DST_CAPSULE: &[u8] = b"capsule";
pub(crate) const DST_NON_INTERACTIVE: &[u8] = b"non-interactive";
pub(crate) const DST_FRAGMENT_INDEX: &[u8] = b"fragment-index";
pub(crate) const DST_PROOF_CHALLENGE: &[u8] = b"correctness-challenge";
pub(crate) const DST_PROOF_NONCE: &[u8] = b"correctness-nonce";
pub(crate) const DST_CAPSULE_ID: &[u8] = b"capsule-id";
const DST_KDF: &[u8] = b"kdf";

/// Serializes a value in compressed canonical form.
pub fn to_bytes<T: CanonicalSerialize>(value: &T) -> Result<Vec<u8>, PreError> {
    let mut bytes = Vec::with_capacity(value.compressed_size());
    value.serialize_compressed(&mut bytes)?;
    Ok(bytes)
}

fn domain_hasher(domain: &[u8], parts: &[&[u8]]) -> Blake2b512 {
    let mut hasher = Blake2b512::new();
    hasher.update(DOMAIN_PREFIX);
    hasher.update((domain.len() as u64).to_le_bytes());
    hasher.update(domain);
    // length-prefix each part so concatenations can't be shifted
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher
}

/// Hashes a list of byte strings to a scalar under a domain separation tag.
///
/// The 512-bit digest is reduced modulo the field order, so the bias is
/// negligible for any curve used here.
pub fn hash_to_scalar<F: PrimeField>(domain: &[u8], parts: &[&[u8]]) -> F {
    let digest = domain_hasher(domain, parts).finalize();
    F::from_le_bytes_mod_order(&digest)
}

/// Hashes a list of byte strings to a fixed 32-byte identifier.
pub fn hash_to_id(domain: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let digest = domain_hasher(domain, parts).finalize();
    let mut id = [0u8; 32];
    id.copy_from_slice(&digest[..32]);
    id
}

/// Derives the symmetric key from a shared curve point.
pub fn kdf<T: CanonicalSerialize>(shared_point: &T) -> Result<SymmetricKey, PreError> {
    let point_bytes = to_bytes(shared_point)?;
    let digest = domain_hasher(DST_KDF, &[&point_bytes]).finalize();
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    key.copy_from_slice(&digest[..SYMMETRIC_KEY_SIZE]);
    Ok(SymmetricKey::from_bytes(key))
}

/// Computes the Lagrange basis coefficient for `points[i]` evaluated at zero:
///
/// `λ_i = Π_{j≠i} x_j / (x_j - x_i)`
///
/// # Returns
/// `None` if two points coincide (the basis is undefined).
pub fn lagrange_coefficient_at_zero<F: Field>(points: &[F], i: usize) -> Option<F> {
    let x_i = points.get(i)?;
    let mut numerator = F::one();
    let mut denominator = F::one();
    for (j, x_j) in points.iter().enumerate() {
        if j == i {
            continue;
        }
        numerator *= x_j;
        denominator *= *x_j - x_i;
    }
    Some(numerator * denominator.inverse()?)
}
