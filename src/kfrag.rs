//! Threshold splitting of the delegator → delegatee re-encryption transform.
//!
//! The dealer samples a random polynomial `f` of degree `m - 1` with
//! `f(0) = sk_delegator · d⁻¹`, where `d` is the non-interactive secret the
//! delegatee can later recompute from the public precursor. Each fragment is
//! `f` evaluated at a point derived from its random identifier, so any `m`
//! fragments interpolate back to `f(0)` and fewer reveal nothing about it.

use ark_ec::CurveGroup;
use ark_ff::Field;
use ark_poly::{univariate::DensePolynomial, DenseUVPolynomial, Polynomial};
use ark_serialize::*;
use ark_std::{rand::RngCore, UniformRand};
use rayon::prelude::*;
use tracing::debug;
use zeroize::Zeroize;

use crate::capsule::non_interactive_secret;
use crate::error::PreError;
use crate::keys::{PublicKey, SecretKey};
use crate::policy::{FragmentId, PolicyId};
use crate::security::SensitiveScalar;
use crate::utils::{hash_to_scalar, to_bytes, DST_FRAGMENT_INDEX};

/// One share of a split re-encryption transform.
///
/// Handed to exactly one proxy for exactly one policy.
#[derive(CanonicalSerialize, CanonicalDeserialize, Clone, Debug)]
pub struct ReKeyFragment<C: CurveGroup> {
    pub id: FragmentId,
    pub policy: PolicyId,
    /// Number of partials the delegatee needs (m)
    pub threshold: u32,
    /// `G·x` for the dealer's ephemeral `x`
    pub precursor: C,
    /// `G·rk`, published so partials can be checked against it
    pub verification_key: C,
    rekey: SensitiveScalar<C::ScalarField>,
}

impl<C: CurveGroup> ReKeyFragment<C> {
    pub(crate) fn rekey(&self) -> &C::ScalarField {
        self.rekey.expose_secret()
    }

    /// The public point at which the dealer's polynomial was evaluated.
    pub fn evaluation_point(&self) -> C::ScalarField {
        fragment_index(&self.policy, &self.id)
    }

    /// Checks the fragment's share against its own verification key.
    pub fn verify(&self) -> bool {
        C::generator() * self.rekey() == self.verification_key
    }

    /// Decodes a fragment, rejecting one whose share and verification key disagree.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PreError> {
        let fragment = Self::deserialize_compressed(bytes)?;
        if !fragment.verify() {
            return Err(PreError::InvalidFragment(format!(
                "fragment {} does not match its verification key",
                fragment.id
            )));
        }
        Ok(fragment)
    }
}

/// Evaluation point of a fragment: `H(policy, id)`.
pub(crate) fn fragment_index<F: ark_ff::PrimeField>(policy: &PolicyId, id: &FragmentId) -> F {
    hash_to_scalar(DST_FRAGMENT_INDEX, &[policy.as_bytes(), id.as_bytes()])
}

/// Holds the secret polynomial for one policy until its fragments are dealt.
///
/// The policy id is fixed at construction, so proxies can be arranged for it
/// before any key material exists outside the dealer. [`KeyFragmentDealer::deal`]
/// consumes the dealer and mints exactly `shares` fragments; no further share
/// of the same polynomial can be produced afterwards. The polynomial is
/// zeroized on drop.
pub struct KeyFragmentDealer<C: CurveGroup> {
    policy: PolicyId,
    threshold: u32,
    shares: usize,
    precursor: C,
    polynomial: DensePolynomial<C::ScalarField>,
}

impl<C: CurveGroup> KeyFragmentDealer<C> {
    /// Creates a dealer for a new (m, n) policy.
    ///
    /// # Arguments
    /// * `delegator` - The delegator's secret key
    /// * `delegatee` - The delegatee's public key
    /// * `threshold` - m, with `1 <= m <= n`
    /// * `shares` - n, the number of fragments [`Self::deal`] will mint
    /// * `rng` - A random number generator
    ///
    /// # Errors
    /// Returns an error unless `1 <= threshold <= shares`, or if the threshold
    /// does not fit in 32 bits
    pub fn new<R: RngCore>(
        delegator: &SecretKey<C>,
        delegatee: &PublicKey<C>,
        threshold: usize,
        shares: usize,
        rng: &mut R,
    ) -> Result<Self, PreError> {
        if threshold == 0 {
            return Err(PreError::InvalidParameter(
                "threshold must be at least 1".to_string(),
            ));
        }
        if threshold > shares {
            return Err(PreError::InvalidParameter(format!(
                "threshold ({}) must be <= number of shares ({})",
                threshold, shares
            )));
        }
        let threshold_u32 = u32::try_from(threshold).map_err(|_| {
            PreError::InvalidParameter(format!("threshold ({}) is too large", threshold))
        })?;
        if delegatee.point.is_zero() {
            return Err(PreError::InvalidParameter(
                "delegatee public key cannot be the identity".to_string(),
            ));
        }

        let policy = PolicyId::random(rng);

        let mut ephemeral = C::ScalarField::rand(rng);
        let precursor = C::generator() * ephemeral;
        let dh = delegatee.point * ephemeral;
        ephemeral.zeroize();

        let d = non_interactive_secret(&precursor, delegatee, &dh)?;
        let d_inv = d.inverse().ok_or_else(|| {
            PreError::InvalidParameter("non-interactive secret is not invertible".to_string())
        })?;

        // f(0) = a / d, the rest random
        let mut coefficients = Vec::with_capacity(threshold);
        coefficients.push(*delegator.scalar() * d_inv);
        for _ in 1..threshold {
            coefficients.push(C::ScalarField::rand(rng));
        }

        Ok(KeyFragmentDealer {
            policy,
            threshold: threshold_u32,
            shares,
            precursor,
            polynomial: DensePolynomial::from_coefficients_vec(coefficients),
        })
    }

    pub fn policy_id(&self) -> PolicyId {
        self.policy
    }

    pub fn threshold(&self) -> usize {
        self.threshold as usize
    }

    pub fn shares(&self) -> usize {
        self.shares
    }

    /// `G·x` for the ephemeral `x` every fragment of this policy carries.
    pub fn precursor(&self) -> C {
        self.precursor
    }

    fn fragment_for(&self, id: FragmentId) -> ReKeyFragment<C> {
        let x = fragment_index::<C::ScalarField>(&self.policy, &id);
        let rekey = self.polynomial.evaluate(&x);
        ReKeyFragment {
            id,
            policy: self.policy,
            threshold: self.threshold,
            precursor: self.precursor,
            verification_key: C::generator() * rekey,
            rekey: SensitiveScalar::new(rekey),
        }
    }

    /// Mints the policy's `shares` fragments, with distinct identifiers.
    pub fn deal<R: RngCore>(self, rng: &mut R) -> Vec<ReKeyFragment<C>> {
        let mut ids: Vec<FragmentId> = Vec::with_capacity(self.shares);
        while ids.len() < self.shares {
            let id = FragmentId::random(rng);
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        debug!(policy = ?self.policy, shares = self.shares, "dealing re-key fragments");

        ids.into_par_iter().map(|id| self.fragment_for(id)).collect()
    }
}

impl<C: CurveGroup> Drop for KeyFragmentDealer<C> {
    fn drop(&mut self) {
        self.polynomial.coeffs.zeroize();
    }
}

/// Splits the delegator → delegatee transform into `shares` fragments, any
/// `threshold` of which suffice.
///
/// # Arguments
/// * `delegator` - The delegator's secret key
/// * `delegatee` - The delegatee's public key
/// * `threshold` - m, with `1 <= m <= n`
/// * `shares` - n, the number of fragments (one per proxy)
/// * `rng` - A random number generator
///
/// # Errors
/// Returns an error unless `1 <= threshold <= shares`
pub fn split_rekey<C: CurveGroup, R: RngCore>(
    delegator: &SecretKey<C>,
    delegatee: &PublicKey<C>,
    threshold: usize,
    shares: usize,
    rng: &mut R,
) -> Result<Vec<ReKeyFragment<C>>, PreError> {
    Ok(KeyFragmentDealer::new(delegator, delegatee, threshold, shares, rng)?.deal(rng))
}

/// Serializes a fragment for delivery to its proxy.
pub fn fragment_to_bytes<C: CurveGroup>(fragment: &ReKeyFragment<C>) -> Result<Vec<u8>, PreError> {
    to_bytes(fragment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bls12_381::G1Projective as G;
    use std::collections::HashSet;

    #[test]
    fn test_split_produces_n_unique_fragments() {
        let mut rng = ark_std::test_rng();
        let alice = SecretKey::<G>::random(&mut rng);
        let bob = SecretKey::<G>::random(&mut rng).public_key();

        let fragments = split_rekey(&alice, &bob, 3, 7, &mut rng).unwrap();
        assert_eq!(fragments.len(), 7);

        let ids: HashSet<_> = fragments.iter().map(|f| f.id).collect();
        assert_eq!(ids.len(), 7);

        let policy = fragments[0].policy;
        for fragment in &fragments {
            assert_eq!(fragment.policy, policy);
            assert_eq!(fragment.threshold, 3);
            assert_eq!(fragment.precursor, fragments[0].precursor);
            assert!(fragment.verify());
        }
    }

    #[test]
    fn test_split_rejects_bad_thresholds() {
        let mut rng = ark_std::test_rng();
        let alice = SecretKey::<G>::random(&mut rng);
        let bob = SecretKey::<G>::random(&mut rng).public_key();

        assert!(matches!(
            split_rekey(&alice, &bob, 0, 3, &mut rng),
            Err(PreError::InvalidParameter(_))
        ));
        assert!(matches!(
            split_rekey(&alice, &bob, 4, 3, &mut rng),
            Err(PreError::InvalidParameter(_))
        ));
        assert_eq!(split_rekey(&alice, &bob, 1, 1, &mut rng).unwrap().len(), 1);
    }

    #[test]
    fn test_separate_policies_do_not_share_fragments() {
        let mut rng = ark_std::test_rng();
        let alice = SecretKey::<G>::random(&mut rng);
        let bob = SecretKey::<G>::random(&mut rng).public_key();

        let first = split_rekey(&alice, &bob, 2, 3, &mut rng).unwrap();
        let second = split_rekey(&alice, &bob, 2, 3, &mut rng).unwrap();
        assert_ne!(first[0].policy, second[0].policy);
        assert_ne!(first[0].precursor, second[0].precursor);
    }

    #[test]
    fn test_dealer_mints_exactly_n_fragments() {
        let mut rng = ark_std::test_rng();
        let alice = SecretKey::<G>::random(&mut rng);
        let bob = SecretKey::<G>::random(&mut rng).public_key();

        let dealer = KeyFragmentDealer::new(&alice, &bob, 2, 4, &mut rng).unwrap();
        let policy = dealer.policy_id();
        let precursor = dealer.precursor();
        assert_eq!(dealer.shares(), 4);

        let fragments = dealer.deal(&mut rng);
        assert_eq!(fragments.len(), 4);
        for fragment in &fragments {
            assert_eq!(fragment.policy, policy);
            assert_eq!(fragment.precursor, precursor);
        }
        assert!(matches!(
            KeyFragmentDealer::new(&alice, &bob, 3, 2, &mut rng),
            Err(PreError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_fragment_serialization_checks_share() {
        let mut rng = ark_std::test_rng();
        let alice = SecretKey::<G>::random(&mut rng);
        let bob = SecretKey::<G>::random(&mut rng).public_key();
        let mut fragment = split_rekey(&alice, &bob, 1, 1, &mut rng).unwrap().remove(0);

        let back = ReKeyFragment::<G>::from_bytes(&fragment_to_bytes(&fragment).unwrap()).unwrap();
        assert_eq!(back.id, fragment.id);
        assert_eq!(back.verification_key, fragment.verification_key);

        fragment.verification_key = fragment.precursor;
        let bytes = fragment_to_bytes(&fragment).unwrap();
        assert!(matches!(
            ReKeyFragment::<G>::from_bytes(&bytes),
            Err(PreError::InvalidFragment(_))
        ));
    }
}
