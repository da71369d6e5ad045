//! Throughput Benchmark for TideKV
//!
//! Measures the storage engine directly and full command execution
//! through a `CommandHandler` under various workloads.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use tidekv::storage::StorageEngine;
use tidekv::types::Value;
use tidekv::{CommandHandler, Database};

fn argv(items: &[&str]) -> Vec<Bytes> {
    items.iter().map(|s| Bytes::from(s.to_string())).collect()
}

fn new_client() -> CommandHandler {
    CommandHandler::new(Arc::new(Database::new()))
}

/// Benchmark SET operations on the engine
fn bench_set(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            engine.set(key, Value::String(Bytes::from("small_value")), None);
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024)); // 1KB value
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            engine.set(key, Value::String(value.clone()), None);
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET through the command path
fn bench_get(c: &mut Criterion) {
    let client = new_client();
    for i in 0..100_000 {
        let key = format!("key:{}", i);
        let value = format!("value:{}", i);
        let _ = client.execute(argv(&["SET", &key, &value]));
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(client.execute(argv(&["GET", &key])).ok());
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(client.execute(argv(&["GET", &key])).ok());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark INCR and ZADD, the hot read-modify-write paths
fn bench_updates(c: &mut Criterion) {
    let client = new_client();

    let mut group = c.benchmark_group("updates");
    group.throughput(Throughput::Elements(1));

    // Single counter (one shard)
    group.bench_function("incr_single_counter", |b| {
        b.iter(|| black_box(client.execute(argv(&["INCR", "counter"])).ok()));
    });

    group.bench_function("zadd_leaderboard", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let score = (i % 10_000).to_string();
            let member = format!("player:{}", i % 1000);
            black_box(client.execute(argv(&["ZADD", "board", &score, &member])).ok());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark concurrent clients on one database
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_clients_mixed", |b| {
        b.iter(|| {
            let db = Arc::new(Database::new());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let client = CommandHandler::new(Arc::clone(&db));
                    thread::spawn(move || {
                        for i in 0..2_000 {
                            let key = format!("key:{}:{}", t, i);
                            let _ = client.execute(argv(&["SET", &key, "value"]));
                            let _ = client.execute(argv(&["GET", &key]));
                        }
                    })
                })
                .collect();

            for handle in handles {
                let _ = handle.join();
            }

            black_box(db.storage().len());
        });
    });

    group.finish();
}

/// Benchmark script execution
fn bench_scripts(c: &mut Criterion) {
    let client = new_client();

    let mut group = c.benchmark_group("scripts");
    group.throughput(Throughput::Elements(1));

    group.bench_function("eval_incr", |b| {
        let script = "return redis.call('INCR', KEYS[1])";
        b.iter(|| black_box(client.execute(argv(&["EVAL", script, "1", "counter"])).ok()));
    });

    group.finish();
}

/// Benchmark SCAN over a populated keyspace
fn bench_scan(c: &mut Criterion) {
    let client = new_client();
    for i in 0..1_000 {
        let _ = client.execute(argv(&["SET", &format!("user:{}", i), "user_data"]));
        let _ = client.execute(argv(&["SET", &format!("session:{}", i), "session_data"]));
    }

    let mut group = c.benchmark_group("scan");

    group.bench_function("scan_match", |b| {
        b.iter(|| {
            let mut cursor = "0".to_string();
            loop {
                let reply = client.execute(argv(&["SCAN", &cursor, "MATCH", "user:*", "COUNT", "100"]));
                let next = reply
                    .ok()
                    .and_then(|r| r.into_array())
                    .and_then(|items| items.first().and_then(|c| c.as_str().map(str::to_string)));
                match next {
                    Some(next) if next != "0" => cursor = next,
                    _ => break,
                }
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_updates,
    bench_concurrent,
    bench_scripts,
    bench_scan,
);

criterion_main!(benches);
