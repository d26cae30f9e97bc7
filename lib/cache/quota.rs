//! Bounded object pools for cache entries.

use crate::sync::Arc;
use crate::sync::atomic::{AtomicUsize, Ordering};

/// Upper bound on the number of live objects of one kind.
///
/// Cache allocations draw a [`QuotaToken`] from here; the token returns its slot when dropped.
/// Running out of slots is the signal for a cache to run an eviction pass.
#[derive(Debug)]
pub struct Quota {
    capacity: usize,
    live: AtomicUsize,
}

impl Quota {
    /// Creates a pool with room for `capacity` live objects.
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            live: AtomicUsize::new(0),
        })
    }

    /// Take one slot, or `None` if the pool is exhausted.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<QuotaToken> {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.capacity).then_some(live + 1)
            })
            .ok()
            .map(|_| QuotaToken {
                quota: Arc::clone(self),
            })
    }

    /// Number of slots currently held.
    #[must_use]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Maximum number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One slot in a [`Quota`], released on drop.
#[derive(Debug)]
pub struct QuotaToken {
    quota: Arc<Quota>,
}

impl Drop for QuotaToken {
    fn drop(&mut self) {
        self.quota.live.fetch_sub(1, Ordering::AcqRel);
    }
}
