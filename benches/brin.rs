//! Block range index benchmarks.
//!
//! Measures the hot paths of the secondary index: inserts with splits,
//! point lookups, range scans and checkpoint cost.

use std::sync::Arc;

use brindb::{BlockRangeIndex, MemoryIndexStorage};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn populated(
    count: u64,
    max_block_size: usize,
) -> BlockRangeIndex<u64, Vec<u8>, MemoryIndexStorage<u64, Vec<u8>>> {
    let index = BlockRangeIndex::new(max_block_size, Arc::new(MemoryIndexStorage::new()));
    for i in 0..count {
        index.put(i, i.to_be_bytes().to_vec()).unwrap();
    }
    index
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("brin_put");
    for count in [1_000u64, 10_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("sequential", count), &count, |b, &count| {
            b.iter(|| populated(count, 200));
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let index = populated(10_000, 200);
    c.bench_function("brin_search", |b| {
        let mut key = 0u64;
        b.iter(|| {
            key = (key + 7919) % 10_000;
            black_box(index.search(&key).unwrap());
        });
    });
}

fn bench_range_scan(c: &mut Criterion) {
    let index = populated(10_000, 200);
    c.bench_function("brin_range_scan_1k", |b| {
        b.iter(|| {
            let values = index.range_query(&4_000, &4_999).unwrap();
            black_box(values.len());
        });
    });
}

fn bench_checkpoint(c: &mut Criterion) {
    c.bench_function("brin_checkpoint_10k", |b| {
        b.iter_with_setup(
            || populated(10_000, 200),
            |index| {
                black_box(index.checkpoint().unwrap());
                index
            },
        );
    });
}

criterion_group!(
    benches,
    bench_put,
    bench_search,
    bench_range_scan,
    bench_checkpoint
);
criterion_main!(benches);
