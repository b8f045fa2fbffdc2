//! Cipher suites: one curve paired with one AEAD.
//!
//! The suite is a type parameter, fixed at compile time. [`SuiteId`] is only a
//! tag written into wire envelopes and accepted on the command line.

use std::fmt::Debug;

use ark_ec::CurveGroup;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce, XChaCha20Poly1305, XNonce,
};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::PreError;
use crate::security::SymmetricKey;

/// Tag identifying a suite in serialized data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[repr(u8)]
pub enum SuiteId {
    /// BLS12-381 G1 with XChaCha20-Poly1305
    #[value(name = "bls12-381")]
    Bls12_381XChaCha = 1,
    /// BN254 G1 with ChaCha20-Poly1305
    #[value(name = "bn254")]
    Bn254ChaCha = 2,
}

/// Authenticated symmetric cipher keyed by a [`SymmetricKey`].
pub trait SymmetricCipher: Debug + Send + Sync {
    /// Nonce length in bytes
    const NONCE_SIZE: usize;

    /// Encrypts and authenticates `plaintext` and `aad`.
    fn seal(
        key: &SymmetricKey,
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, PreError>;

    /// Decrypts `ciphertext`, failing uniformly if anything was altered or the
    /// key is wrong.
    fn open(
        key: &SymmetricKey,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, PreError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct XChaCha20Poly1305Cipher;

#[derive(Debug, Clone, Copy, Default)]
pub struct ChaCha20Poly1305Cipher;

fn check_nonce(nonce: &[u8], expected: usize) -> Result<(), PreError> {
    if nonce.len() != expected {
        return Err(PreError::InvalidParameter(format!(
            "nonce must be {} bytes, got {}",
            expected,
            nonce.len()
        )));
    }
    Ok(())
}

impl SymmetricCipher for XChaCha20Poly1305Cipher {
    const NONCE_SIZE: usize = 24;

    fn seal(
        key: &SymmetricKey,
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, PreError> {
        check_nonce(nonce, Self::NONCE_SIZE)?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.expose_secret()));
        cipher
            .encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad })
            .map_err(|_| PreError::InvalidParameter("encryption failed".to_string()))
    }

    fn open(
        key: &SymmetricKey,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, PreError> {
        if nonce.len() != Self::NONCE_SIZE {
            return Err(PreError::DecapsulationFailure);
        }
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.expose_secret()));
        cipher
            .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| PreError::DecapsulationFailure)
    }
}

impl SymmetricCipher for ChaCha20Poly1305Cipher {
    const NONCE_SIZE: usize = 12;

    fn seal(
        key: &SymmetricKey,
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, PreError> {
        check_nonce(nonce, Self::NONCE_SIZE)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.expose_secret()));
        cipher
            .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
            .map_err(|_| PreError::InvalidParameter("encryption failed".to_string()))
    }

    fn open(
        key: &SymmetricKey,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, PreError> {
        if nonce.len() != Self::NONCE_SIZE {
            return Err(PreError::DecapsulationFailure);
        }
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.expose_secret()));
        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| PreError::DecapsulationFailure)
    }
}

/// A curve and a cipher chosen together.
pub trait CipherSuite: Debug + Send + Sync + 'static {
    type Curve: CurveGroup;
    type Cipher: SymmetricCipher;
    const ID: SuiteId;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Bls12_381XChaCha;

impl CipherSuite for Bls12_381XChaCha {
    type Curve = ark_bls12_381::G1Projective;
    type Cipher = XChaCha20Poly1305Cipher;
    const ID: SuiteId = SuiteId::Bls12_381XChaCha;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Bn254ChaCha;

impl CipherSuite for Bn254ChaCha {
    type Curve = ark_bn254::G1Projective;
    type Cipher = ChaCha20Poly1305Cipher;
    const ID: SuiteId = SuiteId::Bn254ChaCha;
}

impl TryFrom<u8> for SuiteId {
    type Error = PreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SuiteId::Bls12_381XChaCha),
            2 => Ok(SuiteId::Bn254ChaCha),
            other => Err(PreError::Serialization(format!("unknown suite id {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<S: SymmetricCipher>() {
        let key = SymmetricKey::from_bytes([3u8; 32]);
        let nonce = vec![1u8; S::NONCE_SIZE];

        let ct = S::seal(&key, &nonce, b"aad", b"attack at dawn").unwrap();
        assert_eq!(S::open(&key, &nonce, b"aad", &ct).unwrap(), b"attack at dawn");

        let wrong_key = SymmetricKey::from_bytes([4u8; 32]);
        assert_eq!(
            S::open(&wrong_key, &nonce, b"aad", &ct).unwrap_err(),
            PreError::DecapsulationFailure
        );
        assert_eq!(
            S::open(&key, &nonce, b"other", &ct).unwrap_err(),
            PreError::DecapsulationFailure
        );
        assert!(S::seal(&key, &nonce[1..], b"aad", b"x").is_err());
    }

    #[test]
    fn test_xchacha_roundtrip() {
        roundtrip::<XChaCha20Poly1305Cipher>();
    }

    #[test]
    fn test_chacha_roundtrip() {
        roundtrip::<ChaCha20Poly1305Cipher>();
    }

    #[test]
    fn test_suite_ids() {
        assert_eq!(SuiteId::try_from(1u8).unwrap(), Bls12_381XChaCha::ID);
        assert_eq!(SuiteId::try_from(2u8).unwrap(), Bn254ChaCha::ID);
        assert!(SuiteId::try_from(0u8).is_err());
    }
}
