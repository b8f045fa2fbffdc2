//! Self-describing byte format for the values that cross the network.
//!
//! Each value travels inside an [`Envelope`] tagged with the suite and payload
//! kind. The body is the arkworks compressed encoding of the value.

use ark_ec::CurveGroup;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::capsule::Capsule;
use crate::error::PreError;
use crate::kfrag::ReKeyFragment;
use crate::reencryption::ReEncryptedFragment;
use crate::suite::{CipherSuite, SuiteId};
use crate::utils::to_bytes;

pub const WIRE_MAGIC: [u8; 4] = *b"TPRE";
pub const WIRE_VERSION: u8 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Capsule,
    KeyFragment,
    ReEncryptedFragment,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub magic: [u8; 4],
    pub version: u8,
    pub suite: SuiteId,
    pub kind: PayloadKind,
    pub body: Vec<u8>,
}

/// A value that can be carried in an [`Envelope`].
pub trait WirePayload: CanonicalSerialize + CanonicalDeserialize {
    const KIND: PayloadKind;

    /// Integrity check run after decoding.
    fn validate(&self) -> Result<(), PreError> {
        Ok(())
    }
}

impl<C: CurveGroup> WirePayload for Capsule<C> {
    const KIND: PayloadKind = PayloadKind::Capsule;

    fn validate(&self) -> Result<(), PreError> {
        if self.verify() {
            Ok(())
        } else {
            Err(PreError::InvalidCapsule)
        }
    }
}

impl<C: CurveGroup> WirePayload for ReKeyFragment<C> {
    const KIND: PayloadKind = PayloadKind::KeyFragment;

    fn validate(&self) -> Result<(), PreError> {
        if self.verify() {
            Ok(())
        } else {
            Err(PreError::InvalidFragment(format!(
                "fragment {} does not match its verification key",
                self.id
            )))
        }
    }
}

impl<C: CurveGroup> WirePayload for ReEncryptedFragment<C> {
    const KIND: PayloadKind = PayloadKind::ReEncryptedFragment;
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

impl Envelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PreError> {
        Ok(options().serialize(self)?)
    }

    /// Parses an envelope and checks its magic and version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PreError> {
        let envelope: Envelope = options().deserialize(bytes)?;
        if envelope.magic != WIRE_MAGIC {
            return Err(PreError::Serialization("bad magic".to_string()));
        }
        if envelope.version != WIRE_VERSION {
            return Err(PreError::Serialization(format!(
                "unsupported version {}",
                envelope.version
            )));
        }
        Ok(envelope)
    }
}

/// Encodes `value` for suite `S`.
pub fn encode<S, T>(value: &T) -> Result<Vec<u8>, PreError>
where
    S: CipherSuite,
    T: WirePayload,
{
    Envelope {
        magic: WIRE_MAGIC,
        version: WIRE_VERSION,
        suite: S::ID,
        kind: T::KIND,
        body: to_bytes(value)?,
    }
    .to_bytes()
}

/// Decodes a value of type `T` for suite `S`.
///
/// # Errors
/// Returns `Serialization` on any mismatch of magic, version, suite or kind,
/// or on trailing bytes; the payload's own integrity error otherwise
pub fn decode<S, T>(bytes: &[u8]) -> Result<T, PreError>
where
    S: CipherSuite,
    T: WirePayload,
{
    let envelope = Envelope::from_bytes(bytes)?;
    if envelope.suite != S::ID {
        return Err(PreError::Serialization(format!(
            "expected suite {:?}, got {:?}",
            S::ID,
            envelope.suite
        )));
    }
    if envelope.kind != T::KIND {
        return Err(PreError::Serialization(format!(
            "expected {:?}, got {:?}",
            T::KIND,
            envelope.kind
        )));
    }

    let mut reader = envelope.body.as_slice();
    let value = T::deserialize_compressed(&mut reader)?;
    if !reader.is_empty() {
        return Err(PreError::Serialization(format!(
            "{} trailing bytes after payload",
            reader.len()
        )));
    }
    value.validate()?;
    Ok(value)
}
