//! Threshold Proxy Re-Encryption
//!
//! A delegator encrypts data to their own public key and later grants a
//! delegatee access without decrypting anything and without handing over a
//! private key. The grant is split into `n` re-key fragments, one per
//! untrusted proxy; any `m` proxies together can transform a capsule so the
//! delegatee can open it, while fewer learn nothing.
//!
//! ## Key Components
//!
//! - **Key algebra and encapsulation**: [`keys`], [`capsule`], hybrid
//!   encryption in [`dem`]
//! - **Threshold splitting**: [`kfrag::split_rekey`] and the
//!   [`kfrag::KeyFragmentDealer`]
//! - **Re-encryption**: [`reencryption::reencrypt`] with a correctness proof
//!   checked by [`reencryption::verify_correctness`]
//! - **Combination**: [`combine::combine`]
//! - **Proxy selection**: stake-weighted [`reservoir`]s behind a
//!   [`prefetch::PrefetchStrategy`]
//! - **Grant and recovery**: async drivers in [`grant`] over any
//!   [`grant::ProxyTransport`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use threshold_proxy_reencryption::{
//!     combine::combine,
//!     dem::{decrypt, encrypt},
//!     keys::SecretKey,
//!     kfrag::split_rekey,
//!     reencryption::reencrypt,
//!     suite::{Bls12_381XChaCha, CipherSuite},
//! };
//!
//! type S = Bls12_381XChaCha;
//! type G = <S as CipherSuite>::Curve;
//!
//! let mut rng = ark_std::test_rng();
//! let alice = SecretKey::<G>::random(&mut rng);
//! let bob = SecretKey::<G>::random(&mut rng);
//!
//! // Alice encrypts to herself
//! let (capsule, ciphertext) = encrypt::<S, _>(&alice.public_key(), b"hello", &mut rng).unwrap();
//!
//! // 2-of-3 grant to Bob
//! let fragments = split_rekey(&alice, &bob.public_key(), 2, 3, &mut rng).unwrap();
//!
//! // Two proxies re-encrypt
//! let partials: Vec<_> = fragments[..2]
//!     .iter()
//!     .map(|f| reencrypt(f, &capsule).unwrap())
//!     .collect();
//!
//! // Bob combines and decrypts
//! let bobs_capsule = combine(&partials).unwrap();
//! let plaintext = decrypt::<S>(&bob, &bobs_capsule, &ciphertext).unwrap();
//! assert_eq!(plaintext, b"hello");
//! ```

pub mod capsule;
pub mod combine;
pub mod config;
pub mod dem;
pub mod error;
pub mod grant;
pub mod keys;
pub mod kfrag;
pub mod policy;
pub mod prefetch;
pub mod proof;
pub mod reencryption;
pub mod registry;
pub mod reservoir;
pub mod security;
pub mod simulation;
pub mod suite;
pub mod utils;
pub mod wire;

pub use error::{GrantError, PreError, SelectionError};
