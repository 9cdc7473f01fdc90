use criterion::{Criterion, criterion_group, criterion_main};

#[cfg(feature = "redis-tokio")]
mod enabled {
    use std::{env, hint::black_box, time::Duration};

    use criterion::Criterion;

    use batchlimit::{
        BatchRateLimiter, BatchRateLimiterOptions, BatchSize, BucketCapacity, LimiterKey,
        RedisBatchRateLimiterOptions, Throughput, WindowSizeSeconds,
    };

    fn redis_url() -> String {
        env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string())
    }

    pub fn bench_take(c: &mut Criterion) {
        let mut group = c.benchmark_group("redis_take");
        group.sample_size(50);

        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .worker_threads(2)
            .build()
            .unwrap();

        let connection_manager = rt.block_on(async {
            let client = redis::Client::open(redis_url()).unwrap();
            client.get_connection_manager().await.unwrap()
        });

        for batch_size in [1_u64, 10, 100] {
            let limiter = BatchRateLimiter::redis(RedisBatchRateLimiterOptions {
                connection_manager: connection_manager.clone(),
                limiter: BatchRateLimiterOptions {
                    prefix: Some(LimiterKey::try_from(format!("bench{batch_size}")).unwrap()),
                    window_size_seconds: WindowSizeSeconds::try_from(1).unwrap(),
                    throughput: Throughput::try_from(u64::MAX / 2).unwrap(),
                    batch_size: BatchSize::try_from(batch_size).unwrap(),
                    bucket_capacity: BucketCapacity::default(),
                },
            });
            let key = "user:1";

            // Register the script and warm the connection.
            rt.block_on(limiter.take(key, 1)).unwrap();

            group.bench_function(format!("take/hot_key/batch={batch_size}"), |b| {
                b.iter(|| {
                    let res = rt.block_on(limiter.take(black_box(key), black_box(1)));
                    black_box(res)
                });
            });
        }

        // Give outstanding IO a moment before runtime drop.
        std::thread::sleep(Duration::from_millis(50));
        group.finish();
    }
}

#[cfg(feature = "redis-tokio")]
fn bench_take(c: &mut Criterion) {
    enabled::bench_take(c)
}

#[cfg(not(feature = "redis-tokio"))]
fn bench_take(_: &mut Criterion) {}

criterion_group!(benches, bench_take);
criterion_main!(benches);
