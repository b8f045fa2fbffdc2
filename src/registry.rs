//! Proxy addresses and the staking registry that weighs them.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AddressError, RegistryError};

pub const ADDRESS_SIZE: usize = 20;

/// A proxy's staking address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }

    /// An address whose low eight bytes are `n`, big-endian.
    pub fn from_low_u64(n: u64) -> Self {
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes[ADDRESS_SIZE - 8..].copy_from_slice(&n.to_be_bytes());
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| AddressError::InvalidHex(e.to_string()))?;
        let array: [u8; ADDRESS_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::InvalidLength(bytes.len()))?;
        Ok(Address(array))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Source of stake weights for candidate proxies.
pub trait StakingRegistry {
    /// Returns the stake of every eligible staker not in `exclude` whose
    /// stake stays locked for at least `duration` periods.
    ///
    /// `pagination_size` bounds how many stakers are examined per page; `None`
    /// examines them all at once.
    ///
    /// # Errors
    /// `NotEnoughStakers` when nobody qualifies
    fn get_weighted_pool(
        &self,
        exclude: &HashSet<Address>,
        pagination_size: Option<usize>,
        duration: u64,
    ) -> Result<HashMap<Address, u64>, RegistryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Staker {
    pub address: Address,
    pub stake: u64,
    /// Number of periods the stake remains locked
    pub locked_periods: u64,
}

/// Registry kept in memory; backs the simulator and tests.
#[derive(Clone, Default)]
pub struct InMemoryRegistry {
    stakers: Arc<RwLock<HashMap<Address, Staker>>>,
    unavailable: Option<String>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that fails every query with `Unavailable(reason)`.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        InMemoryRegistry {
            stakers: Arc::default(),
            unavailable: Some(reason.into()),
        }
    }

    pub fn add_staker(&self, staker: Staker) {
        match self.stakers.write() {
            Ok(mut stakers) => {
                stakers.insert(staker.address, staker);
            }
            Err(poisoned) => {
                let mut stakers = poisoned.into_inner();
                stakers.insert(staker.address, staker);
            }
        }
    }

    pub fn remove_staker(&self, address: &Address) {
        match self.stakers.write() {
            Ok(mut stakers) => {
                stakers.remove(address);
            }
            Err(poisoned) => {
                let mut stakers = poisoned.into_inner();
                stakers.remove(address);
            }
        }
    }

    pub fn staker_count(&self) -> usize {
        match self.stakers.read() {
            Ok(stakers) => stakers.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn snapshot(&self) -> Vec<Staker> {
        let mut stakers: Vec<Staker> = match self.stakers.read() {
            Ok(stakers) => stakers.values().copied().collect(),
            Err(poisoned) => poisoned.into_inner().values().copied().collect(),
        };
        stakers.sort_by_key(|s| s.address);
        stakers
    }
}

impl StakingRegistry for InMemoryRegistry {
    fn get_weighted_pool(
        &self,
        exclude: &HashSet<Address>,
        pagination_size: Option<usize>,
        duration: u64,
    ) -> Result<HashMap<Address, u64>, RegistryError> {
        if let Some(reason) = &self.unavailable {
            return Err(RegistryError::Unavailable(reason.clone()));
        }

        let stakers = self.snapshot();
        let page_size = pagination_size
            .filter(|&size| size > 0)
            .unwrap_or(stakers.len())
            .max(1);

        let mut pool = HashMap::new();
        for (page, chunk) in stakers.chunks(page_size).enumerate() {
            let before = pool.len();
            pool.extend(
                chunk
                    .iter()
                    .filter(|s| s.stake > 0 && s.locked_periods >= duration)
                    .filter(|s| !exclude.contains(&s.address))
                    .map(|s| (s.address, s.stake)),
            );
            debug!(page, eligible = pool.len() - before, "scanned staker page");
        }

        if pool.is_empty() {
            return Err(RegistryError::NotEnoughStakers);
        }
        Ok(pool)
    }
}
