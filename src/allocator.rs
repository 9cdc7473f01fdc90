//! The shared-store side of the limiter.
//!
//! A [`WindowAllocator`] hands out batches of permits for the current fixed window of a
//! key. Implementations must perform the read-check-increment sequence atomically: it is
//! the only thing that keeps independent processes from over-allocating a window.

use std::{
    future::Future,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::BatchLimitError;

/// Arguments for a single allocation.
#[derive(Debug, Clone, Copy)]
pub struct AllocationRequest<'a> {
    /// Namespaced key of the token, `prefix:token`. The window id is appended by the allocator.
    pub key: &'a str,
    /// Window length in seconds.
    pub window_size_seconds: u64,
    /// Permits grantable per window.
    pub throughput: u64,
    /// Upper bound on the permits granted by this call.
    pub batch_size: u64,
}

/// Result of a single allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGrant {
    /// Permits granted, `0` when the window is exhausted.
    pub granted: u64,
    /// Window the permits were drawn from, `ceil(now / window)` on the store's clock.
    pub window_id: u64,
}

/// Atomic per-window permit allocation.
pub trait WindowAllocator: Send + Sync {
    /// Make the allocator ready to serve [`allocate`](Self::allocate) calls.
    ///
    /// Called before every `take`; implementations that need one-time setup must make
    /// repeated calls cheap. A failure leaves the allocator unprepared so the next call
    /// retries.
    fn prepare(&self) -> impl Future<Output = Result<(), BatchLimitError>> + Send {
        async { Ok(()) }
    }

    /// Grant up to `batch_size` permits from the current window of `key`.
    ///
    /// Returns the permits granted (`0` when the window is exhausted) and the window
    /// they belong to. A positive grant permanently consumes that much of the window's
    /// throughput. On error nothing may be assumed granted.
    fn allocate(
        &self,
        request: &AllocationRequest<'_>,
    ) -> impl Future<Output = Result<WindowGrant, BatchLimitError>> + Send;

    /// Id of the store's current window, answered without a round trip.
    ///
    /// Cached permits are only spent while this still equals the window they were
    /// granted in. The answer must never trail the store's clock; running ahead only
    /// drops cached permits a little early.
    fn current_window_id(&self, window_size_seconds: u64) -> u64;
}

/// Window identifier for `now_seconds`: `ceil(now / window)`.
pub(crate) fn window_id(now_seconds: u64, window_size_seconds: u64) -> u64 {
    now_seconds.div_ceil(window_size_seconds.max(1))
}

/// Permits a single allocation may grant given what the window already handed out.
pub(crate) fn batch_grant(already_granted: u64, throughput: u64, batch_size: u64) -> u64 {
    throughput.saturating_sub(already_granted).min(batch_size)
}

/// Seconds the shared counter of a window outlives its creation.
pub(crate) fn counter_ttl_seconds(window_size_seconds: u64) -> u64 {
    window_size_seconds.saturating_mul(3)
}

/// Seconds since the Unix epoch on the local system clock.
pub(crate) fn system_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
