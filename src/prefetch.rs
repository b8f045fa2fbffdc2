use tracing::debug;

use crate::error::SelectionError;
use crate::registry::Address;
use crate::reservoir::MergedReservoir;

/// Decides which proxies to contact next during a policy grant.
///
/// Holds no state of its own beyond `need_successes`; everything that changes
/// between calls lives in the wrapped reservoir.
#[derive(Debug)]
pub struct PrefetchStrategy {
    reservoir: MergedReservoir,
    need_successes: usize,
}

impl PrefetchStrategy {
    /// # Errors
    /// `InsufficientPool` if the reservoir holds fewer than `need_successes`
    /// addresses, since such a grant can never complete
    pub fn new(reservoir: MergedReservoir, need_successes: usize) -> Result<Self, SelectionError> {
        if reservoir.len() < need_successes {
            return Err(SelectionError::InsufficientPool {
                available: reservoir.len(),
                required: need_successes,
            });
        }
        Ok(PrefetchStrategy {
            reservoir,
            need_successes,
        })
    }

    pub fn need_successes(&self) -> usize {
        self.need_successes
    }

    /// Addresses not yet handed out.
    pub fn remaining(&self) -> usize {
        self.reservoir.len()
    }

    /// Next batch of candidates given `successes` confirmed so far.
    ///
    /// Draws up to `need_successes - successes` addresses. Returns `None` when
    /// nothing could be drawn, and also when `successes` already exceeds
    /// `need_successes`. The batch may be short if the pool runs out.
    pub fn call(&mut self, successes: usize) -> Option<Vec<Address>> {
        if successes > self.need_successes {
            return None;
        }
        let remaining = self.need_successes - successes;

        let batch: Vec<Address> = self.reservoir.by_ref().take(remaining).collect();
        debug!(
            successes,
            need = self.need_successes,
            batch = batch.len(),
            left = self.reservoir.len(),
            "prefetch batch"
        );
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}
