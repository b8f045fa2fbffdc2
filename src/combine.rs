use std::collections::HashSet;

use ark_ec::CurveGroup;
use tracing::warn;

use crate::capsule::{EncapsulatedKey, ReencryptedCapsule};
use crate::error::PreError;
use crate::kfrag::fragment_index;
use crate::policy::{FragmentId, PolicyId};
use crate::reencryption::ReEncryptedFragment;
use crate::utils::lagrange_coefficient_at_zero;

/// Helper function to compute an MSM over curve points.
///
/// # Errors
/// Returns an error if the base and scalar slices disagree in length
fn compute_msm<C: CurveGroup>(
    bases: &[C],
    scalars: &[C::ScalarField],
    operation_name: &str,
) -> Result<C, PreError> {
    let affine = C::normalize_batch(bases);
    C::msm(&affine, scalars).map_err(|len| {
        PreError::InvalidParameter(format!(
            "MSM failed in {}: length mismatch ({})",
            operation_name, len
        ))
    })
}

/// Reassembles a delegatee-bound capsule from proxies' partials.
///
/// Partials are grouped by the policy, capsule, threshold and precursor they
/// claim. Exactly one group may reach its threshold; input that completes
/// more than one is rejected rather than resolved by arrival order. Callers
/// that know the grant should pin it with [`Combiner::for_policy`] and
/// [`Combiner::with_parameters`], so partials claiming anything else are
/// dropped before grouping.
#[derive(Clone, Debug)]
pub struct Combiner<C: CurveGroup> {
    policy: Option<PolicyId>,
    fragments: Option<HashSet<FragmentId>>,
    threshold: Option<u32>,
    precursor: Option<C>,
}

impl<C: CurveGroup> Default for Combiner<C> {
    fn default() -> Self {
        Combiner {
            policy: None,
            fragments: None,
            threshold: None,
            precursor: None,
        }
    }
}

fn same_parameters<C: CurveGroup>(a: &ReEncryptedFragment<C>, b: &ReEncryptedFragment<C>) -> bool {
    a.policy == b.policy
        && a.capsule_id == b.capsule_id
        && a.threshold == b.threshold
        && a.precursor == b.precursor
}

impl<C: CurveGroup> Combiner<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only partials for `policy` are admitted.
    pub fn for_policy(policy: PolicyId) -> Self {
        Combiner {
            policy: Some(policy),
            ..Self::default()
        }
    }

    /// Only partials produced by one of `fragments` are admitted.
    pub fn with_fragments(mut self, fragments: impl IntoIterator<Item = FragmentId>) -> Self {
        self.fragments = Some(fragments.into_iter().collect());
        self
    }

    /// Only partials declaring this threshold and precursor are admitted.
    pub fn with_parameters(mut self, threshold: usize, precursor: C) -> Self {
        self.threshold = Some(u32::try_from(threshold).unwrap_or(u32::MAX));
        self.precursor = Some(precursor);
        self
    }

    /// Checks a partial against the pinned policy, fragment set, threshold
    /// and precursor.
    ///
    /// # Errors
    /// Returns `InvalidFragment` describing the first mismatch found
    pub fn admit(&self, partial: &ReEncryptedFragment<C>) -> Result<(), PreError> {
        if let Some(policy) = &self.policy {
            if &partial.policy != policy {
                return Err(PreError::InvalidFragment(format!(
                    "fragment {} belongs to policy {}, expected {}",
                    partial.fragment_id, partial.policy, policy
                )));
            }
        }
        if let Some(fragments) = &self.fragments {
            if !fragments.contains(&partial.fragment_id) {
                return Err(PreError::InvalidFragment(format!(
                    "fragment {} is not part of the expected set",
                    partial.fragment_id
                )));
            }
        }
        if partial.threshold == 0 {
            return Err(PreError::InvalidFragment(format!(
                "fragment {} declares a zero threshold",
                partial.fragment_id
            )));
        }
        if let Some(threshold) = self.threshold {
            if partial.threshold != threshold {
                return Err(PreError::InvalidFragment(format!(
                    "fragment {} declares threshold {}, expected {}",
                    partial.fragment_id, partial.threshold, threshold
                )));
            }
        }
        if let Some(precursor) = &self.precursor {
            if &partial.precursor != precursor {
                return Err(PreError::InvalidFragment(format!(
                    "fragment {} carries a foreign precursor",
                    partial.fragment_id
                )));
            }
        }
        Ok(())
    }

    /// Combines partials into the delegatee-bound capsule.
    ///
    /// Partials that fail [`Combiner::admit`] are dropped with a warning.
    /// Within a group, duplicates (by fragment id) keep their first
    /// occurrence. The result does not depend on the order of `partials` nor
    /// on which `m`-subset ends up being used.
    ///
    /// # Errors
    /// * `InsufficientShares` if no group holds `m` distinct partials
    /// * `InvalidFragment` if more than one group does
    pub fn combine(
        &self,
        partials: &[ReEncryptedFragment<C>],
    ) -> Result<EncapsulatedKey<C>, PreError> {
        let mut groups: Vec<Vec<&ReEncryptedFragment<C>>> = Vec::new();
        for partial in partials {
            if let Err(err) = self.admit(partial) {
                warn!(fragment = ?partial.fragment_id, "rejecting partial: {err}");
                continue;
            }
            match groups.iter_mut().find(|g| same_parameters(g[0], partial)) {
                Some(group) => {
                    if !group.iter().any(|p| p.fragment_id == partial.fragment_id) {
                        group.push(partial);
                    }
                }
                None => groups.push(vec![partial]),
            }
        }

        let complete: Vec<&Vec<&ReEncryptedFragment<C>>> = groups
            .iter()
            .filter(|g| g.len() >= g[0].threshold as usize)
            .collect();
        let group = match complete.as_slice() {
            [group] => *group,
            [] => {
                let (required, provided) = groups
                    .iter()
                    .map(|g| (g[0].threshold as usize, g.len()))
                    .max_by_key(|&(required, provided)| (provided, std::cmp::Reverse(required)))
                    .unwrap_or((self.threshold.map_or(1, |t| t as usize), 0));
                return Err(PreError::InsufficientShares { required, provided });
            }
            several => {
                return Err(PreError::InvalidFragment(format!(
                    "partials for {} different policies or capsules each reach their threshold",
                    several.len()
                )));
            }
        };

        let reference = group[0];
        let selected = &group[..reference.threshold as usize];
        let points: Vec<C::ScalarField> = selected
            .iter()
            .map(|p| fragment_index(&p.policy, &p.fragment_id))
            .collect();
        let lambdas = (0..points.len())
            .map(|i| lagrange_coefficient_at_zero(&points, i))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                PreError::InvalidFragment("two fragments share an evaluation point".to_string())
            })?;

        let e_bases: Vec<C> = selected.iter().map(|p| p.point_e1).collect();
        let v_bases: Vec<C> = selected.iter().map(|p| p.point_v1).collect();
        let point_e = compute_msm(&e_bases, &lambdas, "E combination")?;
        let point_v = compute_msm(&v_bases, &lambdas, "V combination")?;

        Ok(EncapsulatedKey::Reencrypted(ReencryptedCapsule {
            point_e,
            point_v,
            precursor: reference.precursor,
            policy: reference.policy,
            capsule_id: reference.capsule_id,
        }))
    }
}

/// Combines partials with no pinned policy.
///
/// See [`Combiner::combine`].
pub fn combine<C: CurveGroup>(
    partials: &[ReEncryptedFragment<C>],
) -> Result<EncapsulatedKey<C>, PreError> {
    Combiner::new().combine(partials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::{decapsulate, encapsulate, Capsule};
    use crate::keys::SecretKey;
    use crate::kfrag::{split_rekey, ReKeyFragment};
    use crate::reencryption::reencrypt;
    use crate::security::SymmetricKey;
    use ark_bls12_381::G1Projective as G;
    use ark_std::rand::{seq::SliceRandom, RngCore};

    struct Setup {
        bob: SecretKey<G>,
        key: SymmetricKey,
        capsule: Capsule<G>,
        fragments: Vec<ReKeyFragment<G>>,
    }

    fn setup(m: usize, n: usize, rng: &mut impl RngCore) -> Setup {
        let alice = SecretKey::<G>::random(rng);
        let bob = SecretKey::<G>::random(rng);
        let (key, capsule) = encapsulate(&alice.public_key(), rng).unwrap();
        let fragments = split_rekey(&alice, &bob.public_key(), m, n, rng).unwrap();
        Setup {
            bob,
            key,
            capsule,
            fragments,
        }
    }

    fn partials(s: &Setup) -> Vec<ReEncryptedFragment<G>> {
        s.fragments
            .iter()
            .map(|f| reencrypt(f, &s.capsule).unwrap())
            .collect()
    }

    #[test]
    fn test_threshold_roundtrip_all_sizes() {
        let mut rng = ark_std::test_rng();
        for n in 1..=20 {
            for m in [1, (n + 1) / 2, n] {
                let s = setup(m, n, &mut rng);
                let mut all = partials(&s);
                all.shuffle(&mut rng);

                let combined = combine(&all[..m]).unwrap();
                let key = decapsulate(&s.bob, &combined).unwrap();
                assert_eq!(key, s.key, "m={} n={}", m, n);
            }
        }
    }

    #[test]
    fn test_combine_is_subset_and_order_invariant() {
        let mut rng = ark_std::test_rng();
        let s = setup(3, 6, &mut rng);
        let all = partials(&s);

        let first = combine(&all[..3]).unwrap();
        let last = combine(&all[3..]).unwrap();
        let mut reversed = all.clone();
        reversed.reverse();
        let with_extras = combine(&reversed).unwrap();

        assert_eq!(first, last);
        assert_eq!(first, with_extras);
    }

    #[test]
    fn test_below_threshold_fails() {
        let mut rng = ark_std::test_rng();
        for m in 2..=5 {
            let s = setup(m, 5, &mut rng);
            let all = partials(&s);
            assert_eq!(
                combine(&all[..m - 1]).unwrap_err(),
                PreError::InsufficientShares {
                    required: m,
                    provided: m - 1
                }
            );
        }
        assert!(matches!(
            combine::<G>(&[]),
            Err(PreError::InsufficientShares { provided: 0, .. })
        ));
    }

    #[test]
    fn test_duplicates_do_not_count() {
        let mut rng = ark_std::test_rng();
        let s = setup(3, 4, &mut rng);
        let all = partials(&s);

        let duplicated = vec![all[0].clone(), all[1].clone(), all[0].clone(), all[1].clone()];
        assert_eq!(
            combine(&duplicated).unwrap_err(),
            PreError::InsufficientShares {
                required: 3,
                provided: 2
            }
        );
    }

    #[test]
    fn test_foreign_partials_are_skipped() {
        let mut rng = ark_std::test_rng();
        let s = setup(2, 3, &mut rng);
        let other = setup(2, 3, &mut rng);
        let ours = partials(&s);
        let theirs = partials(&other);

        // only our policy reaches its threshold, whatever the order
        let mut mixed = vec![ours[0].clone(), theirs[0].clone(), ours[2].clone()];
        for _ in 0..6 {
            mixed.shuffle(&mut rng);
            let combined = combine(&mixed).unwrap();
            assert_eq!(decapsulate(&s.bob, &combined).unwrap(), s.key);
        }

        // pinning the policy lets the right partials through even when a
        // foreign one comes first
        let foreign_first = vec![theirs[0].clone(), ours[1].clone(), ours[2].clone()];
        let pinned = Combiner::for_policy(ours[0].policy)
            .combine(&foreign_first)
            .unwrap();
        assert_eq!(decapsulate(&s.bob, &pinned).unwrap(), s.key);
    }

    #[test]
    fn test_two_complete_policies_are_ambiguous() {
        let mut rng = ark_std::test_rng();
        let s = setup(2, 3, &mut rng);
        let other = setup(2, 3, &mut rng);
        let ours = partials(&s);
        let theirs = partials(&other);

        let mut mixed = vec![
            ours[0].clone(),
            theirs[0].clone(),
            theirs[1].clone(),
            ours[2].clone(),
        ];
        for _ in 0..6 {
            mixed.shuffle(&mut rng);
            assert!(matches!(combine(&mixed), Err(PreError::InvalidFragment(_))));
        }

        let pinned = Combiner::for_policy(theirs[0].policy).combine(&mixed).unwrap();
        assert_eq!(decapsulate(&other.bob, &pinned).unwrap(), other.key);
    }

    #[test]
    fn test_lowered_threshold_cannot_hijack_combination() {
        let mut rng = ark_std::test_rng();
        let s = setup(2, 3, &mut rng);
        let mut all = partials(&s);
        all[0].threshold = 1;

        let combiner = Combiner::for_policy(s.fragments[0].policy)
            .with_fragments(s.fragments.iter().map(|f| f.id))
            .with_parameters(2, s.fragments[0].precursor);
        let combined = combiner.combine(&all).unwrap();
        assert_eq!(decapsulate(&s.bob, &combined).unwrap(), s.key);

        // the altered partial alone is no longer enough either
        assert_eq!(
            combiner.combine(&all[..2]).unwrap_err(),
            PreError::InsufficientShares {
                required: 2,
                provided: 1
            }
        );
    }

    #[test]
    fn test_admit_reports_invalid_fragment() {
        let mut rng = ark_std::test_rng();
        let s = setup(2, 3, &mut rng);
        let all = partials(&s);

        let combiner = Combiner::for_policy(all[0].policy).with_fragments([all[0].fragment_id]);
        assert!(combiner.admit(&all[0]).is_ok());
        assert!(matches!(
            combiner.admit(&all[1]),
            Err(PreError::InvalidFragment(_))
        ));

        let pinned = Combiner::new().with_parameters(2, all[0].precursor);
        assert!(pinned.admit(&all[1]).is_ok());
        let mut zero = all[1].clone();
        zero.threshold = 0;
        assert!(matches!(
            Combiner::new().admit(&zero),
            Err(PreError::InvalidFragment(_))
        ));
        let mut foreign = all[1].clone();
        foreign.precursor = s.bob.public_key().point;
        assert!(matches!(
            pinned.admit(&foreign),
            Err(PreError::InvalidFragment(_))
        ));
    }

    #[test]
    fn test_wrong_delegatee_gets_wrong_key() {
        let mut rng = ark_std::test_rng();
        let s = setup(2, 3, &mut rng);
        let mallory = SecretKey::<G>::random(&mut rng);

        let combined = combine(&partials(&s)).unwrap();
        assert_ne!(decapsulate(&mallory, &combined).unwrap(), s.key);
    }
}
