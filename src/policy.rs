//! Identifiers and the policy record shared by the delegator, proxies and delegatee.

use std::fmt;

use ark_ec::CurveGroup;
use ark_serialize::*;
use ark_std::rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::keys::PublicKey;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            CanonicalSerialize,
            CanonicalDeserialize,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
        )]
        pub struct $name {
            pub bytes: [u8; 32],
        }

        impl $name {
            pub fn new(bytes: [u8; 32]) -> Self {
                Self { bytes }
            }

            pub fn random<R: RngCore>(rng: &mut R) -> Self {
                let mut bytes = [0u8; 32];
                rng.fill_bytes(&mut bytes);
                Self { bytes }
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.bytes
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.bytes))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // short form keeps logs readable
                write!(f, "{}({})", stringify!($name), &hex::encode(&self.bytes[..6]))
            }
        }
    };
}

define_id!(
    /// Identifies one (m, n) grant from a delegator to a delegatee.
    PolicyId
);
define_id!(
    /// Unique per fragment within a policy; carried into every partial it produces.
    FragmentId
);
define_id!(
    /// Digest of an original capsule; binds partials and ciphertexts to it.
    CapsuleId
);

/// An (m, n) threshold re-encryption grant.
///
/// `label` and `expiration` belong to the calling layer and are carried
/// untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy<C: CurveGroup> {
    pub id: PolicyId,
    pub delegator: PublicKey<C>,
    pub delegatee: PublicKey<C>,
    /// Minimum number of partials needed to recover (m)
    pub threshold: usize,
    /// Number of fragments distributed (n)
    pub shares: usize,
    pub label: String,
    /// Unix timestamp (seconds) after which proxies should drop their fragment
    pub expiration: Option<u64>,
}
