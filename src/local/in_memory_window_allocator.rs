use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;

use crate::{
    AllocationRequest, BatchLimitError, WindowAllocator, WindowGrant,
    allocator::{batch_grant, counter_ttl_seconds, system_seconds, window_id},
};

/// Source of "now" in whole seconds since the Unix epoch.
pub type SecondsClock = Arc<dyn Fn() -> u64 + Send + Sync>;

struct WindowCounter {
    granted: u64,
    expires_at_seconds: u64,
}

/// Process-local [`WindowAllocator`].
///
/// Mirrors the Redis allocation script: counters are keyed `key:windowId` with
/// `windowId = ceil(now / window)`, capped at the throughput, and expire three windows
/// after their last grant. The check and the increment happen under the counter's map
/// shard lock, so concurrent callers in one process never over-allocate.
///
/// Clones share their counters. Several [`BatchRateLimiter`](crate::BatchRateLimiter)s
/// built on clones of one allocator behave like several processes sharing one store.
///
/// # Examples
///
/// ```no_run
/// use batchlimit::{AllocationRequest, InMemoryWindowAllocator, WindowAllocator};
///
/// # async fn run() -> Result<(), batchlimit::BatchLimitError> {
/// let allocator = InMemoryWindowAllocator::new();
/// let grant = allocator
///     .allocate(&AllocationRequest {
///         key: "batchlimit:user_1",
///         window_size_seconds: 1,
///         throughput: 100,
///         batch_size: 10,
///     })
///     .await?;
/// assert_eq!(grant.granted, 10);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryWindowAllocator {
    counters: Arc<DashMap<String, WindowCounter>>,
    last_sweep_seconds: Arc<AtomicU64>,
    clock: SecondsClock,
}

impl InMemoryWindowAllocator {
    /// Allocator reading the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(system_seconds))
    }

    /// Allocator reading time from `clock`.
    pub fn with_clock(clock: SecondsClock) -> Self {
        Self {
            counters: Arc::new(DashMap::new()),
            last_sweep_seconds: Arc::new(AtomicU64::new(0)),
            clock,
        }
    }

    /// Permits already granted in the current window of `key`.
    pub fn granted_in_current_window(&self, key: &str, window_size_seconds: u64) -> u64 {
        let now = (self.clock)();
        let counter_key = format!("{key}:{}", window_id(now, window_size_seconds));

        match self.counters.get(&counter_key) {
            Some(counter) if counter.expires_at_seconds > now => counter.granted,
            _ => 0,
        }
    }

    /// Number of live window counters.
    pub fn counter_count(&self) -> usize {
        let now = (self.clock)();
        self.counters
            .iter()
            .filter(|counter| counter.expires_at_seconds > now)
            .count()
    }

    /// Drop expired counters, at most once per clock second.
    fn evict_expired(&self, now: u64) {
        if self.last_sweep_seconds.swap(now, Ordering::Relaxed) == now {
            return;
        }

        self.counters
            .retain(|_, counter| counter.expires_at_seconds > now);
    }
}

impl Default for InMemoryWindowAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryWindowAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryWindowAllocator")
            .field("counters", &self.counters.len())
            .finish_non_exhaustive()
    }
}

impl WindowAllocator for InMemoryWindowAllocator {
    async fn allocate(
        &self,
        request: &AllocationRequest<'_>,
    ) -> Result<WindowGrant, BatchLimitError> {
        let now = (self.clock)();
        self.evict_expired(now);

        let window_id = window_id(now, request.window_size_seconds);
        let counter_key = format!("{}:{window_id}", request.key);

        let mut counter = self
            .counters
            .entry(counter_key)
            .or_insert_with(|| WindowCounter {
                granted: 0,
                expires_at_seconds: 0,
            });

        // Swept lazily, so an expired counter may still be here.
        if counter.expires_at_seconds <= now {
            counter.granted = 0;
        }

        if counter.granted >= request.throughput {
            return Ok(WindowGrant {
                granted: 0,
                window_id,
            });
        }

        let increment = batch_grant(counter.granted, request.throughput, request.batch_size);
        counter.granted += increment;
        counter.expires_at_seconds =
            now.saturating_add(counter_ttl_seconds(request.window_size_seconds));

        tracing::trace!(
            key = request.key,
            granted = increment,
            window_total = counter.granted,
            "allocated permits from in-memory window"
        );

        Ok(WindowGrant {
            granted: increment,
            window_id,
        })
    } // end method allocate

    fn current_window_id(&self, window_size_seconds: u64) -> u64 {
        window_id((self.clock)(), window_size_seconds)
    }
}
