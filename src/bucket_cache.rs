use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{BucketCapacity, LimiterKey};

/// Once over capacity, evict down to `capacity - capacity / EVICTION_SLACK`.
const EVICTION_SLACK: usize = 8;

/// Permits already granted to this process for one token but not consumed yet.
#[derive(Debug)]
pub(crate) struct LocalBucket {
    /// Shared-store key of the token, `prefix:token`.
    pub key: Arc<str>,
    pub remaining: u64,
    /// Window the remaining permits were granted in; `None` before the first grant.
    pub window_id: Option<u64>,
}

impl LocalBucket {
    /// Permits spendable in `window_id`. Anything granted in another window is stale.
    pub(crate) fn cached_in(&self, window_id: u64) -> Option<u64> {
        (self.window_id == Some(window_id)).then_some(self.remaining)
    }

    /// Add a fresh grant; permits from an older window are replaced, not topped up.
    pub(crate) fn credit(&mut self, granted: u64, window_id: u64) {
        if self.window_id == Some(window_id) {
            self.remaining = self.remaining.saturating_add(granted);
        } else {
            self.remaining = granted;
            self.window_id = Some(window_id);
        }
    }
}

struct BucketSlot {
    bucket: Arc<Mutex<LocalBucket>>,
    last_access: AtomicU64,
}

impl BucketSlot {
    fn is_idle(&self) -> bool {
        Arc::strong_count(&self.bucket) == 1
    }
}

/// Token to [`LocalBucket`] map bounded by least-recently-used eviction.
///
/// Each bucket has its own lock, so tokens never contend with each other. A bucket that
/// some caller still holds is never evicted; the map may briefly exceed its capacity
/// while every candidate is in use.
///
/// Finding the least recently used buckets is a full scan of the map. A scan evicts an
/// eighth of the capacity at once, so a full cache scans once per `capacity / 8` new
/// tokens rather than on every insert.
pub(crate) struct BucketCache {
    capacity: BucketCapacity,
    access_clock: AtomicU64,
    slots: DashMap<Arc<str>, BucketSlot>,
}

impl BucketCache {
    pub(crate) fn new(capacity: BucketCapacity) -> Self {
        Self {
            capacity,
            access_clock: AtomicU64::new(0),
            slots: DashMap::new(),
        }
    }

    /// Bucket of `token`, created empty on first use.
    pub(crate) fn acquire(&self, token: &str, prefix: &LimiterKey) -> Arc<Mutex<LocalBucket>> {
        let tick = self.access_clock.fetch_add(1, Ordering::Relaxed);

        if let Some(slot) = self.slots.get(token) {
            slot.last_access.store(tick, Ordering::Relaxed);
            return slot.bucket.clone();
        }

        let bucket = {
            let slot = self.slots.entry(Arc::from(token)).or_insert_with(|| BucketSlot {
                bucket: Arc::new(Mutex::new(LocalBucket {
                    key: Arc::from(format!("{prefix}:{token}")),
                    remaining: 0,
                    window_id: None,
                })),
                last_access: AtomicU64::new(tick),
            });
            slot.last_access.store(tick, Ordering::Relaxed);
            slot.bucket.clone()
        };

        self.evict_overflow();

        bucket
    } // end method acquire

    /// Bucket of `token` if present, without touching its recency.
    pub(crate) fn peek(&self, token: &str) -> Option<Arc<Mutex<LocalBucket>>> {
        self.slots.get(token).map(|slot| slot.bucket.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    fn evict_overflow(&self) {
        let capacity = *self.capacity;
        let len = self.slots.len();
        if len <= capacity {
            return;
        }

        let excess = len - (capacity - capacity / EVICTION_SLACK);

        let mut idle: Vec<(u64, Arc<str>)> = self
            .slots
            .iter()
            .filter(|slot| slot.is_idle())
            .map(|slot| (slot.last_access.load(Ordering::Relaxed), slot.key().clone()))
            .collect();

        if idle.len() > excess {
            idle.select_nth_unstable_by_key(excess, |(last_access, _)| *last_access);
            idle.truncate(excess);
        }

        for (_, token) in idle {
            if self
                .slots
                .remove_if(&token, |_, slot| slot.is_idle())
                .is_some()
            {
                tracing::trace!(token = &*token, "evicted least recently used bucket");
            }
        }
    } // end method evict_overflow
}
