#![cfg(feature = "redis-tokio")]

//! Flushes the Redis script cache, so it lives in its own test binary.

use std::env;

use batchlimit::{AllocationRequest, BatchLimitError, RedisWindowAllocator, WindowAllocator};

#[tokio::test]
async fn noscript_resets_registration_and_next_call_recovers() {
    let Ok(url) = env::var("REDIS_URL") else {
        return;
    };

    let client = redis::Client::open(url.as_str()).unwrap();
    let mut cm = client.get_connection_manager().await.unwrap();

    let allocator = RedisWindowAllocator::new(cm.clone());
    allocator.prepare().await.unwrap();
    assert!(allocator.is_registered().await);

    let n: u64 = rand::random();
    let token_key = format!("batchlimit_itest_{n}:k");
    let req = AllocationRequest {
        key: &token_key,
        window_size_seconds: 60,
        throughput: 1_000,
        batch_size: 10,
    };

    let _: () = redis::cmd("SCRIPT")
        .arg("FLUSH")
        .query_async(&mut cm)
        .await
        .unwrap();

    let err = allocator.allocate(&req).await.unwrap_err();
    assert!(matches!(err, BatchLimitError::RedisError(_)));
    assert!(!allocator.is_registered().await);

    assert_eq!(allocator.allocate(&req).await.unwrap().granted, 10);
    assert!(allocator.is_registered().await);

    let exists: Vec<bool> = redis::cmd("SCRIPT")
        .arg("EXISTS")
        .arg(allocator.script_hash())
        .query_async(&mut cm)
        .await
        .unwrap();
    assert_eq!(exists, vec![true]);
}
