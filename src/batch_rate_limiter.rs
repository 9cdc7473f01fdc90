use crate::{
    AllocationRequest, BatchLimitError, BatchRateLimiterOptions, BatchSize, LimiterKey,
    TakeDecision, Throughput, WindowAllocator, WindowSizeSeconds, bucket_cache::BucketCache,
};

/// Fixed-window rate limiter that consumes permits from locally cached batches.
///
/// Every token gets a local bucket of permits that this process already obtained from the
/// [`WindowAllocator`]. [`take`](Self::take) serves requests from that bucket and only
/// asks the allocator for a new batch when the bucket cannot cover the request, turning
/// one shared-store round trip per request into one per `batch_size` permits.
///
/// # Algorithm
///
/// 1. **Prepare:** make sure the allocator is ready (lazy script registration for Redis)
/// 2. **Fast path:** if the bucket holds at least `amount` from the current window,
///    subtract it and grant
/// 3. **Refill:** otherwise allocate up to `batch_size` permits from the current window
/// 4. **Decision:** grant if the refilled bucket covers `amount`, reject otherwise
///
/// # Concurrency
///
/// Each token's bucket has its own async lock, held for the whole `take` including the
/// allocator round trip. Calls for one token are serialized; calls for different tokens
/// proceed independently. Limiters in other processes share nothing with this one and
/// meet only through the allocator's atomic per-window counter.
///
/// # Semantics & Limitations
///
/// **Hoarding:** a process may hold up to `batch_size` unconsumed permits that other
/// processes cannot use, even while the window is not exhausted.
///
/// **Window-scoped remainders:** cached permits are tagged with the window they were
/// granted in and are never spent once the allocator reports a newer window. Together with the
/// allocator's atomic counter this keeps the permits granted for a token in any window,
/// across all processes, at or below `throughput`.
///
/// **Bounded memory:** at most [`BucketCapacity`](crate::BucketCapacity) buckets are kept.
/// The least recently used idle bucket is evicted first, and its remainder is dropped.
///
/// **No retries:** allocator errors go straight back to the caller, and the bucket is
/// left exactly as it was.
pub struct BatchRateLimiter<A> {
    allocator: A,
    prefix: LimiterKey,
    window_size_seconds: WindowSizeSeconds,
    throughput: Throughput,
    batch_size: BatchSize,
    buckets: BucketCache,
}

impl<A: WindowAllocator> BatchRateLimiter<A> {
    /// Create a limiter drawing batches from `allocator`.
    pub fn new(allocator: A, options: BatchRateLimiterOptions) -> Self {
        Self {
            allocator,
            prefix: options.prefix.unwrap_or_else(LimiterKey::default_prefix),
            window_size_seconds: options.window_size_seconds,
            throughput: options.throughput,
            batch_size: options.batch_size,
            buckets: BucketCache::new(options.bucket_capacity),
        }
    } // end constructor

    /// Try to consume `amount` permits for `token`.
    ///
    /// # Returns
    ///
    /// - [`TakeDecision::Granted`]: the permits were consumed
    /// - [`TakeDecision::Rejected`]: the window is exhausted, `amount` exceeds the
    ///   throughput, or the cached remainder plus a fresh batch still does not cover
    ///   `amount`. Whatever was obtained stays cached for later calls in the same window.
    ///
    /// A token without permits from the current window always goes to the allocator,
    /// even for `amount == 0`, so a zero-amount call reports whether the window still has
    /// room.
    ///
    /// Tokens are arbitrary non-empty strings; `user:42` and `::1` are both fine.
    ///
    /// # Errors
    ///
    /// [`BatchLimitError::InvalidKey`] for an empty token, otherwise any allocator
    /// failure. Nothing is consumed or credited in that case.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use batchlimit::{
    ///     BatchRateLimiter, BatchRateLimiterOptions, BatchSize, Throughput, WindowSizeSeconds,
    /// };
    ///
    /// # async fn run() -> Result<(), batchlimit::BatchLimitError> {
    /// let limiter = BatchRateLimiter::local(BatchRateLimiterOptions {
    ///     prefix: None,
    ///     window_size_seconds: WindowSizeSeconds::try_from(1)?,
    ///     throughput: Throughput::try_from(100)?,
    ///     batch_size: BatchSize::try_from(10)?,
    ///     bucket_capacity: Default::default(),
    /// });
    ///
    /// if limiter.take("user:123", 1).await?.is_granted() {
    ///     // proceed
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn take(&self, token: &str, amount: u64) -> Result<TakeDecision, BatchLimitError> {
        if token.is_empty() {
            return Err(BatchLimitError::InvalidKey(
                "token must not be empty".to_string(),
            ));
        }

        self.allocator.prepare().await?;

        let bucket = self.buckets.acquire(token, &self.prefix);
        let mut bucket = bucket.lock().await;

        let current = self.allocator.current_window_id(*self.window_size_seconds);
        let cached = bucket.cached_in(current);

        if cached.is_some_and(|cached| cached >= amount) {
            bucket.remaining -= amount;
            tracing::trace!(
                token,
                amount,
                remaining = bucket.remaining,
                "served from local bucket"
            );
            return Ok(TakeDecision::Granted);
        }

        // No single window can ever cover this, so do not hoard permits for it.
        if amount > *self.throughput {
            tracing::trace!(token, amount, "amount exceeds window throughput");
            return Ok(TakeDecision::Rejected {
                cached: cached.unwrap_or(0),
            });
        }

        let grant = self
            .allocator
            .allocate(&AllocationRequest {
                key: &bucket.key,
                window_size_seconds: *self.window_size_seconds,
                throughput: *self.throughput,
                batch_size: *self.batch_size,
            })
            .await?;

        if grant.granted == 0 {
            tracing::trace!(token, amount, "window exhausted");
            return Ok(TakeDecision::Rejected {
                cached: cached.unwrap_or(0),
            });
        }

        bucket.credit(grant.granted, grant.window_id);

        if bucket.remaining >= amount {
            bucket.remaining -= amount;
            return Ok(TakeDecision::Granted);
        }

        tracing::trace!(
            token,
            amount,
            remaining = bucket.remaining,
            "batch too small for request, keeping remainder"
        );

        Ok(TakeDecision::Rejected {
            cached: bucket.remaining,
        })
    } // end method take

    /// Permits cached for `token` in the current window; `0` when no bucket exists.
    pub async fn cached_permits(&self, token: &str) -> u64 {
        let Some(bucket) = self.buckets.peek(token) else {
            return 0;
        };

        let current = self.allocator.current_window_id(*self.window_size_seconds);

        bucket.lock().await.cached_in(current).unwrap_or(0)
    }

    /// Number of tokens with a local bucket.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// The allocator this limiter draws batches from.
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Prefix namespacing every shared-store key of this limiter.
    pub fn prefix(&self) -> &LimiterKey {
        &self.prefix
    }

    /// Window length.
    pub fn window_size_seconds(&self) -> WindowSizeSeconds {
        self.window_size_seconds
    }

    /// Permits grantable per window across all processes.
    pub fn throughput(&self) -> Throughput {
        self.throughput
    }

    /// Permits requested from the allocator per refill.
    pub fn batch_size(&self) -> BatchSize {
        self.batch_size
    }
}
