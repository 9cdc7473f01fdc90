use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use crate::{
    AllocationRequest, BatchLimitError, BatchRateLimiter, BatchRateLimiterOptions, BatchSize,
    BucketCapacity, InMemoryWindowAllocator, LimiterKey, Throughput, WindowAllocator,
    WindowGrant, WindowSizeSeconds,
};

pub(super) const START_SECONDS: u64 = 1_700_000_000;

/// Seconds clock that only moves when told to.
#[derive(Clone)]
pub(super) struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub(super) fn new() -> Self {
        Self(Arc::new(AtomicU64::new(START_SECONDS)))
    }

    pub(super) fn at(seconds: u64) -> Self {
        Self(Arc::new(AtomicU64::new(seconds)))
    }

    pub(super) fn advance(&self, seconds: u64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }

    pub(super) fn set(&self, seconds: u64) {
        self.0.store(seconds, Ordering::SeqCst);
    }

    pub(super) fn allocator(&self) -> InMemoryWindowAllocator {
        let now = self.0.clone();
        InMemoryWindowAllocator::with_clock(Arc::new(move || now.load(Ordering::SeqCst)))
    }
}

/// In-memory allocator that counts calls and can be told to fail.
#[derive(Clone)]
pub(super) struct InstrumentedAllocator {
    pub inner: InMemoryWindowAllocator,
    pub allocate_calls: Arc<AtomicUsize>,
    pub fail_allocate: Arc<AtomicBool>,
    pub fail_prepare: Arc<AtomicBool>,
}

impl InstrumentedAllocator {
    pub(super) fn new(inner: InMemoryWindowAllocator) -> Self {
        Self {
            inner,
            allocate_calls: Arc::new(AtomicUsize::new(0)),
            fail_allocate: Arc::new(AtomicBool::new(false)),
            fail_prepare: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(super) fn calls(&self) -> usize {
        self.allocate_calls.load(Ordering::SeqCst)
    }
}

impl WindowAllocator for InstrumentedAllocator {
    async fn prepare(&self) -> Result<(), BatchLimitError> {
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(BatchLimitError::CustomError(
                "script registration refused".to_string(),
            ));
        }

        Ok(())
    }

    async fn allocate(
        &self,
        request: &AllocationRequest<'_>,
    ) -> Result<WindowGrant, BatchLimitError> {
        self.allocate_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_allocate.load(Ordering::SeqCst) {
            return Err(BatchLimitError::CustomError("connection reset".to_string()));
        }

        self.inner.allocate(request).await
    }

    fn current_window_id(&self, window_size_seconds: u64) -> u64 {
        self.inner.current_window_id(window_size_seconds)
    }
}

pub(super) fn options(
    window_size_seconds: u64,
    throughput: u64,
    batch_size: u64,
) -> BatchRateLimiterOptions {
    BatchRateLimiterOptions {
        prefix: Some(key("test")),
        window_size_seconds: WindowSizeSeconds::try_from(window_size_seconds).unwrap(),
        throughput: Throughput::try_from(throughput).unwrap(),
        batch_size: BatchSize::try_from(batch_size).unwrap(),
        bucket_capacity: BucketCapacity::default(),
    }
}

pub(super) fn instrumented_limiter(
    clock: &ManualClock,
    window_size_seconds: u64,
    throughput: u64,
    batch_size: u64,
) -> BatchRateLimiter<InstrumentedAllocator> {
    BatchRateLimiter::new(
        InstrumentedAllocator::new(clock.allocator()),
        options(window_size_seconds, throughput, batch_size),
    )
}

pub(super) fn key(s: &str) -> LimiterKey {
    LimiterKey::try_from(s).unwrap()
}
