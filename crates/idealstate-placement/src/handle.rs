//! Shared, swappable placement engine.
//!
//! Readers take a snapshot with [`DistributionHandle::current`] and run their
//! queries against it without holding the lock. Reconfiguration builds a new
//! [`Distribution`] and swaps it in whole.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::distribution::Distribution;

/// Atomically replaceable reference to the active [`Distribution`].
#[derive(Debug)]
pub struct DistributionHandle {
    current: RwLock<Arc<Distribution>>,
}

impl DistributionHandle {
    /// Create a handle holding `distribution`.
    #[must_use]
    pub fn new(distribution: Distribution) -> Self {
        Self { current: RwLock::new(Arc::new(distribution)) }
    }

    /// The active distribution.
    #[must_use]
    pub fn current(&self) -> Arc<Distribution> {
        Arc::clone(&self.current.read())
    }

    /// Install `distribution`, returning the one it replaced.
    pub fn replace(&self, distribution: Distribution) -> Arc<Distribution> {
        let next = Arc::new(distribution);
        let previous = std::mem::replace(&mut *self.current.write(), next);
        info!(
            redundancy = self.current.read().topology().redundancy(),
            previous_redundancy = previous.topology().redundancy(),
            "Installed new distribution"
        );
        previous
    }
}
