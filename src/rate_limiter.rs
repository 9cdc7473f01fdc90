//! Configuration and constructors wiring a [`BatchRateLimiter`] to an allocator.

use crate::{
    BatchRateLimiter, BatchSize, BucketCapacity, InMemoryWindowAllocator, LimiterKey,
    Throughput, WindowSizeSeconds,
};

#[cfg(feature = "redis-tokio")]
use crate::RedisWindowAllocator;

/// Limiter configuration, independent of the allocator backend.
#[derive(Clone, Debug)]
pub struct BatchRateLimiterOptions {
    /// Optional prefix for all shared-store keys.
    ///
    /// Keys take the form `<prefix>:<token>:<window_id>`. If `None`, defaults to
    /// `"batchlimit"`.
    pub prefix: Option<LimiterKey>,

    /// Fixed window length.
    ///
    /// Build it from a [`Duration`](std::time::Duration) with
    /// [`WindowSizeSeconds::from_duration`] to clamp sub-second values up to one second.
    pub window_size_seconds: WindowSizeSeconds,

    /// Permits grantable per window across every limiter sharing the store.
    pub throughput: Throughput,

    /// Permits requested from the allocator each time a bucket runs short.
    pub batch_size: BatchSize,

    /// Maximum number of tokens with a local bucket.
    pub bucket_capacity: BucketCapacity,
}

/// Configuration for a Redis-backed limiter.
///
/// # Examples
///
/// ```ignore
/// let client = redis::Client::open("redis://127.0.0.1:6379/")?;
/// let connection_manager = client.get_connection_manager().await?;
///
/// let limiter = BatchRateLimiter::redis(RedisBatchRateLimiterOptions {
///     connection_manager,
///     limiter: BatchRateLimiterOptions {
///         prefix: Some(LimiterKey::try_from("myapp")?),
///         window_size_seconds: WindowSizeSeconds::try_from(1)?,
///         throughput: Throughput::try_from(100)?,
///         batch_size: BatchSize::try_from(10)?,
///         bucket_capacity: BucketCapacity::default(),
///     },
/// });
/// ```
#[cfg(feature = "redis-tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-tokio")))]
#[derive(Clone)]
pub struct RedisBatchRateLimiterOptions {
    /// Redis connection manager from the `redis` crate.
    ///
    /// Reconnection and command timeouts are configured on the connection manager; the
    /// limiter itself never retries.
    pub connection_manager: redis::aio::ConnectionManager,

    /// Backend-independent limiter settings.
    pub limiter: BatchRateLimiterOptions,
}

/// Limiter sharing its window counters through Redis.
#[cfg(feature = "redis-tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-tokio")))]
pub type RedisBatchRateLimiter = BatchRateLimiter<RedisWindowAllocator>;

/// Limiter keeping its window counters in process memory.
pub type LocalBatchRateLimiter = BatchRateLimiter<InMemoryWindowAllocator>;

#[cfg(feature = "redis-tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-tokio")))]
impl BatchRateLimiter<RedisWindowAllocator> {
    /// Create a limiter whose window counters live in Redis.
    pub fn redis(options: RedisBatchRateLimiterOptions) -> Self {
        Self::new(
            RedisWindowAllocator::new(options.connection_manager),
            options.limiter,
        )
    }
}

impl BatchRateLimiter<InMemoryWindowAllocator> {
    /// Create a limiter with its own in-process window counters.
    pub fn local(options: BatchRateLimiterOptions) -> Self {
        Self::new(InMemoryWindowAllocator::new(), options)
    }
}
