/// Error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum BatchLimitError {
    /// Redis error raised while evaluating the allocation script.
    #[cfg(feature = "redis-tokio")]
    #[error("redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Redis rejected or could not be reached while registering the allocation script.
    #[cfg(feature = "redis-tokio")]
    #[error("failed to register allocation script: {0}")]
    ScriptRegistration(#[source] redis::RedisError),

    /// The shared store answered with a reply the allocator does not understand.
    #[error("unexpected reply from shared store: {0}")]
    UnexpectedReply(String),

    /// Invalid window size.
    #[error("invalid window size: {0}")]
    InvalidWindowSize(String),

    /// Invalid throughput.
    #[error("invalid throughput: {0}")]
    InvalidThroughput(String),

    /// Invalid batch size.
    #[error("invalid batch size: {0}")]
    InvalidBatchSize(String),

    /// Invalid bucket capacity.
    #[error("invalid bucket capacity: {0}")]
    InvalidBucketCapacity(String),

    /// Invalid prefix, or an empty token.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Error raised by a custom [`WindowAllocator`](crate::WindowAllocator).
    #[error("{0}")]
    CustomError(String),
}
