//! Hybrid encryption: a capsule carries the key, an AEAD carries the data.
//!
//! Ciphertext layout is `nonce || aead(plaintext)` with the capsule id as
//! associated data, so a ciphertext only opens under the capsule it was
//! produced with.

use ark_std::rand::RngCore;

use crate::capsule::{decapsulate, encapsulate, Capsule, EncapsulatedKey};
use crate::error::PreError;
use crate::keys::{PublicKey, SecretKey};
use crate::suite::{CipherSuite, SymmetricCipher};

/// Encrypts `plaintext` for `public_key`.
///
/// # Returns
/// The capsule to hand to proxies (or the recipient) and the symmetric
/// ciphertext
pub fn encrypt<S: CipherSuite, R: RngCore>(
    public_key: &PublicKey<S::Curve>,
    plaintext: &[u8],
    rng: &mut R,
) -> Result<(Capsule<S::Curve>, Vec<u8>), PreError> {
    let (key, capsule) = encapsulate(public_key, rng)?;
    let capsule_id = capsule.id()?;

    let mut nonce = vec![0u8; S::Cipher::NONCE_SIZE];
    rng.fill_bytes(&mut nonce);

    let sealed = S::Cipher::seal(&key, &nonce, capsule_id.as_bytes(), plaintext)?;
    let mut ciphertext = nonce;
    ciphertext.extend_from_slice(&sealed);
    Ok((capsule, ciphertext))
}

/// Decrypts `ciphertext` with either the original recipient's key (original
/// capsule) or the delegatee's key (re-encrypted capsule).
///
/// # Errors
/// Every failure (wrong key, tampered ciphertext, mismatched capsule, short
/// input) is reported as `DecapsulationFailure`
pub fn decrypt<S: CipherSuite>(
    secret_key: &SecretKey<S::Curve>,
    encapsulated: &EncapsulatedKey<S::Curve>,
    ciphertext: &[u8],
) -> Result<Vec<u8>, PreError> {
    let nonce_size = S::Cipher::NONCE_SIZE;
    if ciphertext.len() < nonce_size {
        return Err(PreError::DecapsulationFailure);
    }
    let (nonce, sealed) = ciphertext.split_at(nonce_size);

    let key = decapsulate(secret_key, encapsulated).map_err(|_| PreError::DecapsulationFailure)?;
    let capsule_id = encapsulated
        .capsule_id()
        .map_err(|_| PreError::DecapsulationFailure)?;

    S::Cipher::open(&key, nonce, capsule_id.as_bytes(), sealed)
}
