//! Drivers that talk to proxies: distributing fragments when a policy is
//! granted, and collecting partials when the delegatee wants to decrypt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ark_ec::CurveGroup;
use ark_std::rand::RngCore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::capsule::{Capsule, EncapsulatedKey};
use crate::combine::Combiner;
use crate::config::GrantConfig;
use crate::error::{ContactError, GrantError, PreError};
use crate::keys::{PublicKey, SecretKey};
use crate::kfrag::{KeyFragmentDealer, ReKeyFragment};
use crate::policy::{FragmentId, Policy, PolicyId};
use crate::prefetch::PrefetchStrategy;
use crate::reencryption::{verify_correctness, ReEncryptedFragment};
use crate::registry::Address;

/// How fragments reach proxies and partials come back.
pub trait ProxyTransport<C: CurveGroup>: Send + Sync + 'static {
    /// Asks the proxy at `address` to take part in `policy`. Carries no key
    /// material.
    fn arrange(
        &self,
        address: Address,
        policy: PolicyId,
    ) -> impl Future<Output = Result<(), ContactError>> + Send;

    /// Hands `fragment` to the proxy at `address` for safekeeping.
    fn send_fragment(
        &self,
        address: Address,
        fragment: ReKeyFragment<C>,
    ) -> impl Future<Output = Result<(), ContactError>> + Send;

    /// Tells the proxy at `address` to discard whatever it holds for `policy`.
    fn revoke_fragment(
        &self,
        address: Address,
        policy: PolicyId,
    ) -> impl Future<Output = Result<(), ContactError>> + Send;

    /// Asks the proxy at `address` to apply its fragment for `policy` to
    /// `capsule`.
    fn request_partial(
        &self,
        address: Address,
        policy: PolicyId,
        capsule: Capsule<C>,
    ) -> impl Future<Output = Result<ReEncryptedFragment<C>, ContactError>> + Send;
}

/// A proxy that accepted a fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arrangement<C: CurveGroup> {
    pub address: Address,
    pub fragment_id: FragmentId,
    /// Public counterpart of the fragment's share, for checking its partials
    pub verification_key: C,
}

/// A policy whose `n` fragments all reached a proxy.
#[derive(Clone, Debug)]
pub struct GrantedPolicy<C: CurveGroup> {
    pub policy: Policy<C>,
    /// Carried by every fragment and partial of the policy
    pub precursor: C,
    pub arrangements: Vec<Arrangement<C>>,
}

impl<C: CurveGroup> GrantedPolicy<C> {
    pub fn arrangement_for(&self, fragment_id: &FragmentId) -> Option<&Arrangement<C>> {
        self.arrangements
            .iter()
            .find(|a| &a.fragment_id == fragment_id)
    }
}

async fn bounded<T>(
    address: Address,
    timeout: Duration,
    call: impl Future<Output = Result<T, ContactError>>,
) -> Result<T, ContactError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ContactError::Timeout(address.to_string())),
    }
}

/// Grants an (m, n) policy from `delegator` to `delegatee`.
///
/// Runs in two phases. First, candidates from `strategy` (built with
/// `need_successes == shares`) are asked to take part, batch by batch and in
/// parallel, with failures replaced by the next batch until `shares` proxies
/// agreed. Only then are exactly `shares` fragments dealt, one per arranged
/// proxy. A delivery that fails is not replaced: every arranged proxy is told
/// to discard its fragment and the grant is reported incomplete. Each contact
/// is bounded by `config.contact_timeout()`.
///
/// # Errors
/// * `Crypto(InvalidParameter)` for an invalid (m, n) or a mismatched strategy
/// * `Incomplete` if the pool ran dry before `shares` proxies agreed, or if a
///   fragment could not be delivered
#[allow(clippy::too_many_arguments)]
pub async fn grant_policy<C, T, R>(
    transport: Arc<T>,
    delegator: &SecretKey<C>,
    delegatee: &PublicKey<C>,
    threshold: usize,
    shares: usize,
    mut strategy: PrefetchStrategy,
    config: &GrantConfig,
    rng: &mut R,
) -> Result<GrantedPolicy<C>, GrantError>
where
    C: CurveGroup,
    T: ProxyTransport<C>,
    R: RngCore,
{
    if strategy.need_successes() != shares {
        return Err(PreError::InvalidParameter(format!(
            "strategy needs {} successes but the policy has {} shares",
            strategy.need_successes(),
            shares
        ))
        .into());
    }

    let dealer = KeyFragmentDealer::new(delegator, delegatee, threshold, shares, rng)?;
    let policy_id = dealer.policy_id();
    let precursor = dealer.precursor();
    let timeout = config.contact_timeout();
    info!(policy = ?policy_id, threshold, shares, "granting policy");

    let mut selected: Vec<Address> = Vec::with_capacity(shares);
    while let Some(batch) = strategy.call(selected.len()) {
        debug!(policy = ?policy_id, batch = batch.len(), "contacting proxies");
        let mut contacts = JoinSet::new();
        for address in batch {
            let transport = Arc::clone(&transport);
            contacts.spawn(async move {
                let call = transport.arrange(address, policy_id);
                (address, bounded(address, timeout, call).await)
            });
        }

        while let Some(joined) = contacts.join_next().await {
            match joined {
                Ok((address, Ok(()))) => {
                    debug!(proxy = %address, "proxy joined policy");
                    selected.push(address);
                }
                Ok((address, Err(err))) => warn!(proxy = %address, "proxy contact failed: {err}"),
                Err(err) => warn!("contact task failed: {err}"),
            }
        }
    }

    if selected.len() < shares {
        warn!(
            policy = ?policy_id,
            successes = selected.len(),
            required = shares,
            "candidate pool exhausted"
        );
        return Err(GrantError::Incomplete {
            successes: selected.len(),
            required: shares,
        });
    }

    let fragments = dealer.deal(rng);
    let mut deliveries = JoinSet::new();
    for (address, fragment) in selected.iter().copied().zip(fragments) {
        let transport = Arc::clone(&transport);
        let arrangement = Arrangement {
            address,
            fragment_id: fragment.id,
            verification_key: fragment.verification_key,
        };
        deliveries.spawn(async move {
            let call = transport.send_fragment(address, fragment);
            (arrangement, bounded(address, timeout, call).await)
        });
    }

    let mut arrangements: Vec<Arrangement<C>> = Vec::with_capacity(shares);
    while let Some(joined) = deliveries.join_next().await {
        match joined {
            Ok((arrangement, Ok(()))) => {
                debug!(proxy = %arrangement.address, "proxy accepted fragment");
                arrangements.push(arrangement);
            }
            Ok((arrangement, Err(err))) => {
                warn!(proxy = %arrangement.address, "fragment delivery failed: {err}");
            }
            Err(err) => warn!("delivery task failed: {err}"),
        }
    }

    if arrangements.len() < shares {
        warn!(
            policy = ?policy_id,
            delivered = arrangements.len(),
            required = shares,
            "withdrawing partially delivered policy"
        );
        withdraw::<C, T>(&transport, policy_id, &selected, timeout).await;
        return Err(GrantError::Incomplete {
            successes: arrangements.len(),
            required: shares,
        });
    }

    info!(policy = ?policy_id, proxies = arrangements.len(), "policy granted");
    Ok(GrantedPolicy {
        policy: Policy {
            id: policy_id,
            delegator: delegator.public_key(),
            delegatee: *delegatee,
            threshold,
            shares,
            label: config.label.clone(),
            expiration: config.expiration,
        },
        precursor,
        arrangements,
    })
}

/// Asks every proxy in `addresses` to drop its fragment for `policy`.
///
/// Failures are logged and otherwise ignored.
async fn withdraw<C, T>(
    transport: &Arc<T>,
    policy: PolicyId,
    addresses: &[Address],
    timeout: Duration,
) where
    C: CurveGroup,
    T: ProxyTransport<C>,
{
    let mut revocations = JoinSet::new();
    for &address in addresses {
        let transport = Arc::clone(transport);
        revocations.spawn(async move {
            let call = transport.revoke_fragment(address, policy);
            (address, bounded(address, timeout, call).await)
        });
    }
    while let Some(joined) = revocations.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((address, Err(err))) => warn!(proxy = %address, "revocation failed: {err}"),
            Err(err) => warn!("revocation task failed: {err}"),
        }
    }
}

/// Collects `threshold` verified partials for `capsule`.
///
/// Every arranged proxy is asked at once. Partials that fail their correctness
/// proof, claim a fragment the proxy was not given, or declare parameters
/// other than the grant's, are dropped. Once enough verified partials are in,
/// outstanding requests are aborted.
///
/// # Errors
/// * `Crypto(InvalidCapsule)` if the capsule fails its integrity check
/// * `InsufficientPartials` if too few proxies answered correctly
pub async fn retrieve_partials<C, T>(
    transport: Arc<T>,
    granted: &GrantedPolicy<C>,
    capsule: &Capsule<C>,
    config: &GrantConfig,
) -> Result<Vec<ReEncryptedFragment<C>>, GrantError>
where
    C: CurveGroup,
    T: ProxyTransport<C>,
{
    if !capsule.verify() {
        return Err(PreError::InvalidCapsule.into());
    }
    let policy_id = granted.policy.id;
    let threshold = granted.policy.threshold;
    let timeout = config.contact_timeout();

    let mut requests = JoinSet::new();
    for arrangement in &granted.arrangements {
        let transport = Arc::clone(&transport);
        let arrangement = *arrangement;
        let capsule = *capsule;
        requests.spawn(async move {
            let outcome = bounded(
                arrangement.address,
                timeout,
                transport.request_partial(arrangement.address, policy_id, capsule),
            )
            .await;
            (arrangement, outcome)
        });
    }

    let mut partials = Vec::with_capacity(threshold);
    while let Some(joined) = requests.join_next().await {
        let (arrangement, partial) = match joined {
            Ok((arrangement, Ok(partial))) => (arrangement, partial),
            Ok((arrangement, Err(err))) => {
                warn!(proxy = %arrangement.address, "partial request failed: {err}");
                continue;
            }
            Err(err) => {
                warn!("request task failed: {err}");
                continue;
            }
        };

        if partial.fragment_id != arrangement.fragment_id
            || partial.policy != policy_id
            || partial.threshold as usize != threshold
            || partial.precursor != granted.precursor
            || !verify_correctness(&partial, capsule, &arrangement.verification_key)
        {
            warn!(proxy = %arrangement.address, "discarding unverifiable partial");
            continue;
        }
        partials.push(partial);
        if partials.len() == threshold {
            requests.abort_all();
            break;
        }
    }

    if partials.len() < threshold {
        return Err(GrantError::InsufficientPartials {
            collected: partials.len(),
            required: threshold,
        });
    }
    debug!(policy = ?policy_id, collected = partials.len(), "partials retrieved");
    Ok(partials)
}

/// Retrieves partials and combines them into the delegatee-bound capsule.
pub async fn recover_capsule<C, T>(
    transport: Arc<T>,
    granted: &GrantedPolicy<C>,
    capsule: &Capsule<C>,
    config: &GrantConfig,
) -> Result<EncapsulatedKey<C>, GrantError>
where
    C: CurveGroup,
    T: ProxyTransport<C>,
{
    let partials = retrieve_partials(transport, granted, capsule, config).await?;
    let combiner = Combiner::for_policy(granted.policy.id)
        .with_fragments(granted.arrangements.iter().map(|a| a.fragment_id))
        .with_parameters(granted.policy.threshold, granted.precursor);
    Ok(combiner.combine(&partials)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dem::{decrypt, encrypt};
    use crate::registry::{InMemoryRegistry, Staker};
    use crate::reservoir::MergedReservoir;
    use crate::simulation::SimulatedNetwork;
    use crate::suite::{Bls12_381XChaCha, CipherSuite};
    use crate::reencryption::reencrypt;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type S = Bls12_381XChaCha;
    type G = <S as CipherSuite>::Curve;

    fn registry(proxies: u64) -> InMemoryRegistry {
        let registry = InMemoryRegistry::new();
        for n in 0..proxies {
            registry.add_staker(Staker {
                address: Address::from_low_u64(n),
                stake: 100 + n,
                locked_periods: 4,
            });
        }
        registry
    }

    fn strategy(registry: &InMemoryRegistry, config: &GrantConfig, need: usize) -> PrefetchStrategy {
        let reservoir = MergedReservoir::new(
            registry,
            config.include.clone(),
            config.exclude.clone(),
            config.pagination_size,
            config.duration_periods,
            StdRng::seed_from_u64(42),
        )
        .unwrap();
        PrefetchStrategy::new(reservoir, need).unwrap()
    }

    #[tokio::test]
    async fn test_grant_and_recover() {
        let mut rng = ark_std::test_rng();
        let alice = SecretKey::<G>::random(&mut rng);
        let bob = SecretKey::<G>::random(&mut rng);
        let config = GrantConfig {
            label: "photos".to_string(),
            ..GrantConfig::default()
        };
        let network = Arc::new(SimulatedNetwork::<G>::new());

        let granted = grant_policy(
            Arc::clone(&network),
            &alice,
            &bob.public_key(),
            3,
            5,
            strategy(&registry(8), &config, 5),
            &config,
            &mut rng,
        )
        .await
        .unwrap();
        assert_eq!(granted.arrangements.len(), 5);
        assert_eq!(granted.policy.label, "photos");
        let addresses: HashSet<_> = granted.arrangements.iter().map(|a| a.address).collect();
        assert_eq!(addresses.len(), 5);

        let (capsule, ct) = encrypt::<S, _>(&alice.public_key(), b"the payload", &mut rng).unwrap();
        let combined = recover_capsule(Arc::clone(&network), &granted, &capsule, &config)
            .await
            .unwrap();
        assert_eq!(decrypt::<S>(&bob, &combined, &ct).unwrap(), b"the payload");
    }

    #[tokio::test]
    async fn test_offline_proxies_are_replaced() {
        let mut rng = ark_std::test_rng();
        let alice = SecretKey::<G>::random(&mut rng);
        let bob = SecretKey::<G>::random(&mut rng);
        let config = GrantConfig::default();

        let network = Arc::new(SimulatedNetwork::<G>::new());
        for n in [0, 2, 4] {
            network.set_offline(Address::from_low_u64(n), true);
        }

        let granted = grant_policy(
            Arc::clone(&network),
            &alice,
            &bob.public_key(),
            2,
            4,
            strategy(&registry(7), &config, 4),
            &config,
            &mut rng,
        )
        .await
        .unwrap();
        for arrangement in &granted.arrangements {
            assert!(![0, 2, 4].map(Address::from_low_u64).contains(&arrangement.address));
        }
        let ids: HashSet<_> = granted.arrangements.iter().map(|a| a.fragment_id).collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(network.fragment_count(), 4);
    }

    #[tokio::test]
    async fn test_exhausted_pool_is_incomplete() {
        let mut rng = ark_std::test_rng();
        let alice = SecretKey::<G>::random(&mut rng);
        let bob = SecretKey::<G>::random(&mut rng);
        let config = GrantConfig::default();

        let network = Arc::new(SimulatedNetwork::<G>::new());
        for n in 0..3 {
            network.set_offline(Address::from_low_u64(n), true);
        }

        let err = grant_policy(
            Arc::clone(&network),
            &alice,
            &bob.public_key(),
            2,
            3,
            strategy(&registry(5), &config, 3),
            &config,
            &mut rng,
        )
        .await
        .unwrap_err();
        assert_eq!(
            err,
            GrantError::Incomplete {
                successes: 2,
                required: 3
            }
        );
        // nothing was dealt for a policy that never found its proxies
        assert_eq!(network.fragment_count(), 0);
    }

    #[tokio::test]
    async fn test_mismatched_strategy_rejected() {
        let mut rng = ark_std::test_rng();
        let alice = SecretKey::<G>::random(&mut rng);
        let bob = SecretKey::<G>::random(&mut rng);
        let config = GrantConfig::default();
        let network = Arc::new(SimulatedNetwork::<G>::new());

        let err = grant_policy(
            network,
            &alice,
            &bob.public_key(),
            2,
            3,
            strategy(&registry(5), &config, 4),
            &config,
            &mut rng,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GrantError::Crypto(PreError::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn test_slow_proxy_times_out() {
        let mut rng = ark_std::test_rng();
        let alice = SecretKey::<G>::random(&mut rng);
        let bob = SecretKey::<G>::random(&mut rng);
        let config = GrantConfig {
            contact_timeout_ms: 50,
            ..GrantConfig::default()
        };

        let network = Arc::new(SimulatedNetwork::<G>::new());
        network.set_latency(Address::from_low_u64(1), Duration::from_secs(5));

        let granted = grant_policy(
            Arc::clone(&network),
            &alice,
            &bob.public_key(),
            1,
            2,
            strategy(&registry(3), &config, 2),
            &config,
            &mut rng,
        )
        .await
        .unwrap();
        assert!(granted
            .arrangements
            .iter()
            .all(|a| a.address != Address::from_low_u64(1)));
        assert_eq!(network.fragment_count(), 2);
    }

    #[tokio::test]
    async fn test_byzantine_partials_are_dropped() {
        let mut rng = ark_std::test_rng();
        let alice = SecretKey::<G>::random(&mut rng);
        let bob = SecretKey::<G>::random(&mut rng);
        let config = GrantConfig::default();
        let network = Arc::new(SimulatedNetwork::<G>::new());

        let granted = grant_policy(
            Arc::clone(&network),
            &alice,
            &bob.public_key(),
            2,
            4,
            strategy(&registry(4), &config, 4),
            &config,
            &mut rng,
        )
        .await
        .unwrap();

        // two proxies turn malicious and one goes offline after the grant
        network.set_byzantine(granted.arrangements[0].address, true);
        network.set_byzantine(granted.arrangements[1].address, true);
        network.set_offline(granted.arrangements[2].address, true);

        let (capsule, _) = encrypt::<S, _>(&alice.public_key(), b"x", &mut rng).unwrap();
        let err = retrieve_partials(Arc::clone(&network), &granted, &capsule, &config)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GrantError::InsufficientPartials {
                collected: 1,
                required: 2
            }
        );

        network.set_byzantine(granted.arrangements[1].address, false);
        let partials = retrieve_partials(Arc::clone(&network), &granted, &capsule, &config)
            .await
            .unwrap();
        assert_eq!(partials.len(), 2);
        for partial in &partials {
            let arrangement = granted.arrangement_for(&partial.fragment_id).unwrap();
            assert!(verify_correctness(partial, &capsule, &arrangement.verification_key));
        }
    }

    /// Stores every fragment it is sent, but stalls before acknowledging
    /// deliveries to `stalled`.
    #[derive(Default)]
    struct StallingTransport {
        stalled: HashSet<Address>,
        handed_out: AtomicUsize,
        held: Mutex<HashMap<(Address, PolicyId), ReKeyFragment<G>>>,
    }

    impl ProxyTransport<G> for StallingTransport {
        async fn arrange(&self, _address: Address, _policy: PolicyId) -> Result<(), ContactError> {
            Ok(())
        }

        async fn send_fragment(
            &self,
            address: Address,
            fragment: ReKeyFragment<G>,
        ) -> Result<(), ContactError> {
            self.handed_out.fetch_add(1, Ordering::SeqCst);
            self.held
                .lock()
                .unwrap()
                .insert((address, fragment.policy), fragment);
            if self.stalled.contains(&address) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(())
        }

        async fn revoke_fragment(
            &self,
            address: Address,
            policy: PolicyId,
        ) -> Result<(), ContactError> {
            self.held.lock().unwrap().remove(&(address, policy));
            Ok(())
        }

        async fn request_partial(
            &self,
            address: Address,
            policy: PolicyId,
            capsule: Capsule<G>,
        ) -> Result<ReEncryptedFragment<G>, ContactError> {
            let fragment = self
                .held
                .lock()
                .unwrap()
                .get(&(address, policy))
                .cloned()
                .ok_or_else(|| ContactError::Unreachable(address.to_string()))?;
            reencrypt(&fragment, &capsule).map_err(|err| ContactError::Rejected {
                address: address.to_string(),
                reason: err.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_unacknowledged_delivery_mints_no_extra_fragment() {
        let mut rng = ark_std::test_rng();
        let alice = SecretKey::<G>::random(&mut rng);
        let bob = SecretKey::<G>::random(&mut rng);
        let config = GrantConfig {
            contact_timeout_ms: 50,
            ..GrantConfig::default()
        };
        let transport = Arc::new(StallingTransport {
            stalled: HashSet::from([Address::from_low_u64(0)]),
            ..StallingTransport::default()
        });

        let err = grant_policy(
            Arc::clone(&transport),
            &alice,
            &bob.public_key(),
            2,
            2,
            strategy(&registry(2), &config, 2),
            &config,
            &mut rng,
        )
        .await
        .unwrap_err();

        // proxy 0 kept its fragment without acknowledging it; no replacement
        // share was minted and both fragments were withdrawn
        assert_eq!(transport.handed_out.load(Ordering::SeqCst), 2);
        assert!(matches!(err, GrantError::Incomplete { successes: 1, required: 2 }));
        assert!(transport.held.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_every_holder_is_arranged() {
        let mut rng = ark_std::test_rng();
        let alice = SecretKey::<G>::random(&mut rng);
        let bob = SecretKey::<G>::random(&mut rng);
        let config = GrantConfig::default();
        let transport = Arc::new(StallingTransport::default());

        let granted = grant_policy(
            Arc::clone(&transport),
            &alice,
            &bob.public_key(),
            2,
            3,
            strategy(&registry(6), &config, 3),
            &config,
            &mut rng,
        )
        .await
        .unwrap();

        assert_eq!(transport.handed_out.load(Ordering::SeqCst), 3);
        let held = transport.held.lock().unwrap();
        assert_eq!(held.len(), 3);
        for (address, policy) in held.keys() {
            assert_eq!(*policy, granted.policy.id);
            assert!(granted.arrangements.iter().any(|a| a.address == *address));
        }
    }

    #[tokio::test]
    async fn test_forged_parameters_do_not_block_recovery() {
        let mut rng = ark_std::test_rng();
        let alice = SecretKey::<G>::random(&mut rng);
        let bob = SecretKey::<G>::random(&mut rng);
        let config = GrantConfig::default();
        let network = Arc::new(SimulatedNetwork::<G>::new());

        let granted = grant_policy(
            Arc::clone(&network),
            &alice,
            &bob.public_key(),
            2,
            3,
            strategy(&registry(3), &config, 3),
            &config,
            &mut rng,
        )
        .await
        .unwrap();
        let (capsule, ct) =
            encrypt::<S, _>(&alice.public_key(), b"still readable", &mut rng).unwrap();

        // a partial claiming a lower threshold is dropped by retrieval
        let honest = retrieve_partials(Arc::clone(&network), &granted, &capsule, &config)
            .await
            .unwrap();
        let mut forged = honest[0].clone();
        forged.threshold = 1;
        let arrangement = granted.arrangement_for(&forged.fragment_id).unwrap();
        assert!(!verify_correctness(&forged, &capsule, &arrangement.verification_key));

        // and by the pinned combiner even if it slips through first
        let combiner = Combiner::for_policy(granted.policy.id)
            .with_fragments(granted.arrangements.iter().map(|a| a.fragment_id))
            .with_parameters(granted.policy.threshold, granted.precursor);
        let mut partials = vec![forged];
        partials.extend(honest);
        let combined = combiner.combine(&partials).unwrap();
        assert_eq!(decrypt::<S>(&bob, &combined, &ct).unwrap(), b"still readable");
    }
}
