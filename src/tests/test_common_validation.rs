use std::time::Duration;

use crate::{
    BatchLimitError, BatchSize, BucketCapacity, LimiterKey, TakeDecision, Throughput,
    WindowSizeSeconds,
};

#[test]
fn window_size_seconds_try_from_validates_min_1() {
    let w = WindowSizeSeconds::try_from(1u64).unwrap();
    assert_eq!(*w, 1u64);

    assert!(matches!(
        WindowSizeSeconds::try_from(0u64),
        Err(BatchLimitError::InvalidWindowSize(_))
    ));
}

#[test]
fn window_size_from_duration_clamps_to_one_second() {
    assert_eq!(*WindowSizeSeconds::from_duration(Duration::ZERO), 1);
    assert_eq!(*WindowSizeSeconds::from_duration(Duration::from_millis(500)), 1);
    assert_eq!(*WindowSizeSeconds::from_duration(Duration::from_millis(2500)), 2);
    assert_eq!(*WindowSizeSeconds::from_duration(Duration::from_secs(60)), 60);
}

#[test]
fn throughput_and_batch_size_must_be_positive() {
    assert_eq!(*Throughput::try_from(5u64).unwrap(), 5);
    assert!(matches!(
        Throughput::try_from(0u64),
        Err(BatchLimitError::InvalidThroughput(_))
    ));

    assert_eq!(*BatchSize::try_from(10u64).unwrap(), 10);
    assert!(matches!(
        BatchSize::try_from(0u64),
        Err(BatchLimitError::InvalidBatchSize(_))
    ));
}

#[test]
fn bucket_capacity_default_and_validation() {
    assert_eq!(*BucketCapacity::default(), 10_000);
    assert_eq!(*BucketCapacity::try_from(3usize).unwrap(), 3);
    assert!(matches!(
        BucketCapacity::try_from(0usize),
        Err(BatchLimitError::InvalidBucketCapacity(_))
    ));
}

#[test]
fn prefix_key_rejects_empty_long_and_colon_keys() {
    assert_eq!(&*LimiterKey::try_from("myapp").unwrap(), "myapp");
    assert_eq!(&*LimiterKey::default_prefix(), "batchlimit");

    assert!(matches!(
        LimiterKey::try_from(""),
        Err(BatchLimitError::InvalidKey(_))
    ));
    assert!(matches!(
        LimiterKey::try_from("a".repeat(256)),
        Err(BatchLimitError::InvalidKey(_))
    ));
    assert!(LimiterKey::try_from("a".repeat(255)).is_ok());
    assert!(matches!(
        LimiterKey::try_from("myapp:v2"),
        Err(BatchLimitError::InvalidKey(_))
    ));
}

#[test]
fn take_decision_reports_granted() {
    assert!(TakeDecision::Granted.is_granted());
    assert!(!TakeDecision::Rejected { cached: 3 }.is_granted());
}
