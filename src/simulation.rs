//! In-process proxy network.
//!
//! Each simulated proxy keeps the fragments it accepted and answers partial
//! requests by re-encrypting locally. Proxies can be taken offline, slowed
//! down, or made to return corrupted partials.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use ark_ec::CurveGroup;
use tracing::debug;

use crate::capsule::Capsule;
use crate::error::ContactError;
use crate::grant::ProxyTransport;
use crate::kfrag::ReKeyFragment;
use crate::policy::PolicyId;
use crate::reencryption::{reencrypt, ReEncryptedFragment};
use crate::registry::Address;

struct NetworkState<C: CurveGroup> {
    fragments: HashMap<(Address, PolicyId), ReKeyFragment<C>>,
    offline: HashSet<Address>,
    byzantine: HashSet<Address>,
    latency: HashMap<Address, Duration>,
}

pub struct SimulatedNetwork<C: CurveGroup> {
    state: Mutex<NetworkState<C>>,
}

impl<C: CurveGroup> Default for SimulatedNetwork<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: CurveGroup> SimulatedNetwork<C> {
    pub fn new() -> Self {
        SimulatedNetwork {
            state: Mutex::new(NetworkState {
                fragments: HashMap::new(),
                offline: HashSet::new(),
                byzantine: HashSet::new(),
                latency: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, NetworkState<C>> {
        match self.state.lock() {
            Ok(state) => state,
            // Recover from poisoned lock by clearing the poison and using the guard
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_offline(&self, address: Address, offline: bool) {
        let mut state = self.state();
        if offline {
            state.offline.insert(address);
        } else {
            state.offline.remove(&address);
        }
    }

    /// A byzantine proxy answers requests with a corrupted partial.
    pub fn set_byzantine(&self, address: Address, byzantine: bool) {
        let mut state = self.state();
        if byzantine {
            state.byzantine.insert(address);
        } else {
            state.byzantine.remove(&address);
        }
    }

    pub fn set_latency(&self, address: Address, latency: Duration) {
        self.state().latency.insert(address, latency);
    }

    /// Number of fragments held across all proxies.
    pub fn fragment_count(&self) -> usize {
        self.state().fragments.len()
    }

    pub fn holds_fragment(&self, address: Address, policy: PolicyId) -> bool {
        self.state().fragments.contains_key(&(address, policy))
    }

    /// Drops every fragment held for `policy`.
    pub fn revoke_policy(&self, policy: PolicyId) -> usize {
        let mut state = self.state();
        let before = state.fragments.len();
        state.fragments.retain(|(_, held), _| *held != policy);
        before - state.fragments.len()
    }

    async fn delay(&self, address: Address) -> Result<(), ContactError> {
        let latency = self.state().latency.get(&address).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.state().offline.contains(&address) {
            return Err(ContactError::Unreachable(address.to_string()));
        }
        Ok(())
    }
}

impl<C: CurveGroup> ProxyTransport<C> for SimulatedNetwork<C> {
    async fn arrange(&self, address: Address, policy: PolicyId) -> Result<(), ContactError> {
        self.delay(address).await?;
        if self.holds_fragment(address, policy) {
            return Err(ContactError::Rejected {
                address: address.to_string(),
                reason: format!("already holds a fragment for policy {}", policy),
            });
        }
        Ok(())
    }

    async fn send_fragment(
        &self,
        address: Address,
        fragment: ReKeyFragment<C>,
    ) -> Result<(), ContactError> {
        self.delay(address).await?;

        if !fragment.verify() {
            return Err(ContactError::Rejected {
                address: address.to_string(),
                reason: "fragment does not match its verification key".to_string(),
            });
        }
        let mut state = self.state();
        let key = (address, fragment.policy);
        if state.fragments.contains_key(&key) {
            return Err(ContactError::Rejected {
                address: address.to_string(),
                reason: format!("already holds a fragment for policy {}", fragment.policy),
            });
        }
        debug!(proxy = %address, fragment = ?fragment.id, "proxy stored fragment");
        state.fragments.insert(key, fragment);
        Ok(())
    }

    async fn revoke_fragment(
        &self,
        address: Address,
        policy: PolicyId,
    ) -> Result<(), ContactError> {
        self.delay(address).await?;
        if self.state().fragments.remove(&(address, policy)).is_some() {
            debug!(proxy = %address, policy = %policy, "proxy dropped fragment");
        }
        Ok(())
    }

    async fn request_partial(
        &self,
        address: Address,
        policy: PolicyId,
        capsule: Capsule<C>,
    ) -> Result<ReEncryptedFragment<C>, ContactError> {
        self.delay(address).await?;

        let (fragment, byzantine) = {
            let state = self.state();
            let fragment = state.fragments.get(&(address, policy)).cloned();
            (fragment, state.byzantine.contains(&address))
        };
        let fragment = fragment.ok_or_else(|| ContactError::Rejected {
            address: address.to_string(),
            reason: format!("no fragment for policy {}", policy),
        })?;

        let mut partial = reencrypt(&fragment, &capsule).map_err(|err| ContactError::Rejected {
            address: address.to_string(),
            reason: err.to_string(),
        })?;
        if byzantine {
            partial.point_e1 += C::generator();
        }
        Ok(partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::encapsulate;
    use crate::keys::SecretKey;
    use crate::kfrag::split_rekey;
    use ark_bls12_381::G1Projective as G;

    #[tokio::test]
    async fn test_proxy_stores_and_answers() {
        let mut rng = ark_std::test_rng();
        let alice = SecretKey::<G>::random(&mut rng);
        let bob = SecretKey::<G>::random(&mut rng);
        let mut fragments = split_rekey(&alice, &bob.public_key(), 1, 2, &mut rng).unwrap();
        let policy = fragments[0].policy;
        let (_, capsule) = encapsulate(&alice.public_key(), &mut rng).unwrap();

        let network = SimulatedNetwork::<G>::new();
        let proxy = Address::from_low_u64(1);
        let second = fragments.pop().unwrap();
        let first = fragments.pop().unwrap();
        let first_id = first.id;

        network.arrange(proxy, policy).await.unwrap();
        network.send_fragment(proxy, first).await.unwrap();
        assert!(network.holds_fragment(proxy, policy));
        assert!(network.arrange(proxy, policy).await.is_err());
        // one fragment per proxy per policy
        assert!(matches!(
            network.send_fragment(proxy, second).await,
            Err(ContactError::Rejected { .. })
        ));

        let partial = network.request_partial(proxy, policy, capsule).await.unwrap();
        assert_eq!(partial.fragment_id, first_id);

        assert_eq!(network.revoke_policy(policy), 1);
        assert!(matches!(
            network.request_partial(proxy, policy, capsule).await,
            Err(ContactError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_offline_proxy_unreachable() {
        let mut rng = ark_std::test_rng();
        let alice = SecretKey::<G>::random(&mut rng);
        let bob = SecretKey::<G>::random(&mut rng);
        let fragment = split_rekey(&alice, &bob.public_key(), 1, 1, &mut rng)
            .unwrap()
            .remove(0);

        let network = SimulatedNetwork::<G>::new();
        let proxy = Address::from_low_u64(9);
        network.set_offline(proxy, true);
        let policy = fragment.policy;
        assert!(matches!(
            network.arrange(proxy, policy).await,
            Err(ContactError::Unreachable(_))
        ));
        assert!(matches!(
            network.send_fragment(proxy, fragment).await,
            Err(ContactError::Unreachable(_))
        ));
        assert_eq!(network.fragment_count(), 0);

        network.set_offline(proxy, false);
        network.revoke_fragment(proxy, policy).await.unwrap();
    }
}
