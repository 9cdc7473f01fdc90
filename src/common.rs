use std::{ops::Deref, sync::Arc, time::Duration};

use crate::BatchLimitError;

/// A validated limiter prefix.
///
/// This is a string with the following constraints:
/// - Must not be empty
/// - Must not be longer than 255 bytes
/// - Must not contain colons (`:` ends the prefix in every shared-store key)
///
/// Tokens passed to [`take`](crate::BatchRateLimiter::take) are plain strings and may
/// contain colons: the window id is always the last, purely numeric segment, so two
/// tokens under one prefix never share a counter.
#[derive(Debug, Clone, PartialEq, PartialOrd, Hash, Eq)]
pub struct LimiterKey(Arc<str>);

impl LimiterKey {
    /// The prefix used when none is configured.
    pub fn default_prefix() -> Self {
        Self(Arc::from("batchlimit"))
    }
}

impl Deref for LimiterKey {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for LimiterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LimiterKey {
    type Error = BatchLimitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(BatchLimitError::InvalidKey(
                "key must not be empty".to_string(),
            ))
        } else if value.len() > 255 {
            Err(BatchLimitError::InvalidKey(
                "key must not be longer than 255 characters".to_string(),
            ))
        } else if value.contains(':') {
            Err(BatchLimitError::InvalidKey(
                "key must not contain colons".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

impl TryFrom<&str> for LimiterKey {
    type Error = BatchLimitError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

/// Fixed window length in whole seconds (at least 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowSizeSeconds(u64);

impl WindowSizeSeconds {
    /// Build a window size from a [`Duration`], truncating to whole seconds and clamping
    /// anything shorter than one second up to one second.
    pub fn from_duration(duration: Duration) -> Self {
        Self(duration.as_secs().max(1))
    }
}

impl Default for WindowSizeSeconds {
    /// One second.
    fn default() -> Self {
        Self(1)
    }
}

impl Deref for WindowSizeSeconds {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for WindowSizeSeconds {
    type Error = BatchLimitError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value < 1 {
            Err(BatchLimitError::InvalidWindowSize(
                "window size must be at least 1 second".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

/// Maximum number of permits granted per window, across every process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Throughput(u64);

impl Deref for Throughput {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for Throughput {
    type Error = BatchLimitError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(BatchLimitError::InvalidThroughput(
                "throughput must be greater than 0".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

/// Maximum number of permits fetched from the shared store in one round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchSize(u64);

impl Deref for BatchSize {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for BatchSize {
    type Error = BatchLimitError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(BatchLimitError::InvalidBatchSize(
                "batch size must be greater than 0".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

/// Upper bound on the number of tokens a limiter keeps local buckets for.
///
/// When the bound is reached, the least recently used idle bucket is evicted and its
/// cached permits are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketCapacity(usize);

impl Default for BucketCapacity {
    /// Returns a capacity of 10 000 buckets.
    fn default() -> Self {
        Self(10_000)
    }
}

impl Deref for BucketCapacity {
    type Target = usize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<usize> for BucketCapacity {
    type Error = BatchLimitError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(BatchLimitError::InvalidBucketCapacity(
                "bucket capacity must be greater than 0".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

/// Outcome of [`BatchRateLimiter::take`](crate::BatchRateLimiter::take).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeDecision {
    /// The requested permits were consumed.
    Granted,
    /// The request was denied.
    ///
    /// Either the window is exhausted for this token, or the latest grant plus the
    /// cached remainder still falls short of the requested amount.
    Rejected {
        /// Permits still cached locally for the token after this call.
        cached: u64,
    },
}

impl TakeDecision {
    /// `true` when the permits were granted.
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}
