//! Audit storage benchmarks
//!
//! Measures sealed appends and query throughput for both backends.

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use tempfile::TempDir;
use vigil_core::audit::{
    AuditConfig, AuditEvent, AuditQuery, AuditStorage, EventType, FileStorage, MemoryStorage,
    SortBy, SortOrder,
};

const ACTORS: [&str; 4] = ["alice", "bob", "carol", "svc-sync"];
const TYPES: [EventType; 3] = [
    EventType::AUTH_SUCCESS,
    EventType::DATA_ACCESS,
    EventType::CONFIG_CHANGE,
];

fn make_event(i: usize) -> AuditEvent {
    let mut event = AuditEvent::new(
        TYPES[i % TYPES.len()].clone(),
        ACTORS[i % ACTORS.len()],
        "read",
        format!("record-{i}"),
    )
    .with_detail("ip", "10.0.0.1");
    event.id = i as u64 + 1;
    event
}

fn bench_store(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("audit_store");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("memory_1000", |b| {
        b.iter_batched(
            || MemoryStorage::with_capacity(10_000, true),
            |storage| {
                rt.block_on(async {
                    for i in 0..1000 {
                        storage.store(make_event(i)).await.unwrap();
                    }
                })
            },
            BatchSize::SmallInput,
        )
    });

    for compression in [false, true] {
        let name = if compression { "file_gzip_1000" } else { "file_plain_1000" };
        group.bench_function(name, |b| {
            b.iter_batched(
                || {
                    let dir = TempDir::new().unwrap();
                    let storage = FileStorage::open(&AuditConfig {
                        compression,
                        ..AuditConfig::file(dir.path())
                    })
                    .unwrap();
                    (dir, storage)
                },
                |(_dir, storage)| {
                    rt.block_on(async {
                        for i in 0..1000 {
                            storage.store(make_event(i)).await.unwrap();
                        }
                        storage.flush().await.unwrap();
                    })
                },
                BatchSize::PerIteration,
            )
        });
    }

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let storage = MemoryStorage::with_capacity(10_000, true);
    rt.block_on(async {
        for i in 0..10_000 {
            storage.store(make_event(i)).await.unwrap();
        }
    });

    let mut group = c.benchmark_group("audit_query");
    group.throughput(Throughput::Elements(10_000));

    group.bench_function("all_desc_page", |b| {
        let query = AuditQuery::new()
            .sort(SortBy::Timestamp, SortOrder::Desc)
            .limit(100);
        b.iter(|| rt.block_on(async { black_box(storage.query(&query).await.unwrap()) }))
    });

    group.bench_function("filtered_by_actor_and_type", |b| {
        let query = AuditQuery::new()
            .actor("alice")
            .event_type(EventType::DATA_ACCESS)
            .sort(SortBy::Actor, SortOrder::Asc);
        b.iter(|| rt.block_on(async { black_box(storage.query(&query).await.unwrap()) }))
    });

    group.bench_function("verify_chain", |b| {
        b.iter(|| rt.block_on(async { black_box(storage.verify_chain().await.unwrap()) }))
    });

    group.finish();
}

criterion_group!(benches, bench_store, bench_query);
criterion_main!(benches);
