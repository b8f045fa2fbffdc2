//! Stake-weighted candidate pools.
//!
//! Both reservoirs are owned by one policy grant and mutated by every draw;
//! share one across tasks only behind a lock.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::Rng;
use tracing::debug;

use crate::error::{RegistryError, SelectionError};
use crate::registry::{Address, StakingRegistry};

/// Weighted sampling without replacement over a fixed set of addresses.
///
/// An address is never returned twice by the same reservoir. Entries with zero
/// weight are dropped at construction and never drawn.
#[derive(Debug)]
pub struct ProxyReservoir {
    entries: Vec<(Address, u64)>,
    total_weight: u128,
    rng: StdRng,
}

impl ProxyReservoir {
    pub fn new(weights: HashMap<Address, u64>, rng: StdRng) -> Self {
        let mut entries: Vec<(Address, u64)> =
            weights.into_iter().filter(|(_, weight)| *weight > 0).collect();
        // HashMap order is random; sort so a seeded rng gives repeatable draws
        entries.sort_unstable_by_key(|(address, _)| *address);
        let total_weight = entries.iter().map(|(_, w)| u128::from(*w)).sum();

        ProxyReservoir {
            entries,
            total_weight,
            rng,
        }
    }

    /// Builds a reservoir from the registry's weighted pool.
    ///
    /// A registry reporting `NotEnoughStakers` yields an empty reservoir; any
    /// other registry error is returned. Addresses in `exclude` never enter the
    /// reservoir, whether or not the registry honours the exclusion.
    pub fn from_registry<R: StakingRegistry + ?Sized>(
        registry: &R,
        exclude: &HashSet<Address>,
        pagination_size: Option<usize>,
        duration: u64,
        rng: StdRng,
    ) -> Result<Self, RegistryError> {
        let mut weights = match registry.get_weighted_pool(exclude, pagination_size, duration) {
            Ok(weights) => weights,
            Err(RegistryError::NotEnoughStakers) => HashMap::new(),
            Err(err) => return Err(err),
        };
        weights.retain(|address, _| !exclude.contains(address));
        Ok(Self::new(weights, rng))
    }

    /// Removes and returns up to `k` addresses, each picked with probability
    /// proportional to its weight among those still undrawn.
    pub fn draw(&mut self, k: usize) -> Vec<Address> {
        let mut drawn = Vec::with_capacity(k.min(self.entries.len()));
        while drawn.len() < k && !self.entries.is_empty() {
            let target = self.rng.random_range(0..self.total_weight);
            let mut cumulative = 0u128;
            let mut picked = self.entries.len() - 1;
            for (i, (_, weight)) in self.entries.iter().enumerate() {
                cumulative += u128::from(*weight);
                if target < cumulative {
                    picked = i;
                    break;
                }
            }
            let (address, weight) = self.entries.remove(picked);
            self.total_weight -= u128::from(weight);
            drawn.push(address);
        }
        debug!(requested = k, drawn = drawn.len(), remaining = self.entries.len(), "reservoir draw");
        drawn
    }

    /// Number of undrawn addresses.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An explicit priority list in front of a [`ProxyReservoir`].
///
/// Draws exhaust the list in order before touching the weighted pool.
#[derive(Debug)]
pub struct MergedReservoir {
    include: Vec<Address>,
    next_include: usize,
    reservoir: ProxyReservoir,
}

impl MergedReservoir {
    /// Builds the merged pool.
    ///
    /// Repeated entries in `include` are kept once, at their first position.
    /// The weighted pool is queried with `include ∪ exclude` excluded so that
    /// priority addresses are never drawn twice.
    ///
    /// # Errors
    /// Returns `SelectionError::Registry` if the registry fails for any reason
    /// other than having no eligible stakers
    pub fn new<R: StakingRegistry + ?Sized>(
        registry: &R,
        include: impl IntoIterator<Item = Address>,
        exclude: impl IntoIterator<Item = Address>,
        pagination_size: Option<usize>,
        duration: u64,
        rng: StdRng,
    ) -> Result<Self, SelectionError> {
        let mut seen = HashSet::new();
        let include: Vec<Address> = include.into_iter().filter(|a| seen.insert(*a)).collect();

        let mut excluded: HashSet<Address> = exclude.into_iter().collect();
        excluded.extend(include.iter().copied());

        let reservoir =
            ProxyReservoir::from_registry(registry, &excluded, pagination_size, duration, rng)?;
        debug!(
            explicit = include.len(),
            weighted = reservoir.len(),
            "built merged reservoir"
        );

        Ok(MergedReservoir {
            include,
            next_include: 0,
            reservoir,
        })
    }

    /// Wraps an already built reservoir.
    pub fn from_parts(include: Vec<Address>, reservoir: ProxyReservoir) -> Self {
        let mut seen = HashSet::new();
        let include = include.into_iter().filter(|a| seen.insert(*a)).collect();
        MergedReservoir {
            include,
            next_include: 0,
            reservoir,
        }
    }

    /// Next address, or `None` once both the list and the pool are empty.
    pub fn call(&mut self) -> Option<Address> {
        if let Some(address) = self.include.get(self.next_include) {
            self.next_include += 1;
            return Some(*address);
        }
        self.reservoir.draw(1).pop()
    }

    /// Remaining addresses across the list and the pool.
    pub fn len(&self) -> usize {
        self.include.len() - self.next_include + self.reservoir.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Iterator for MergedReservoir {
    type Item = Address;

    fn next(&mut self) -> Option<Address> {
        self.call()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.len(), Some(self.len()))
    }
}
