//! Benchmarks for micro directory operations

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use zap_rs::core::hash::{zap_hash, Crc64Hasher};
use zap_rs::{MemStore, ObjectId, ZapBuilder, ZapDirs};

fn filled(entries: u64) -> (ZapDirs<MemStore>, ObjectId) {
    let dirs = ZapBuilder::new().build().unwrap();
    let tx = dirs.store().begin();
    let dir = dirs.create(&tx).unwrap();
    for i in 0..entries {
        dirs.add_u64(dir, &format!("entry-{}", i), i, &tx).unwrap();
    }
    dirs.store().commit(tx).unwrap();
    (dirs, dir)
}

fn benchmark_hash(c: &mut Criterion) {
    c.bench_function("zap_hash_32_bytes", |b| {
        let name = "a-typical-directory-entry-name-32";
        b.iter(|| black_box(zap_hash(&Crc64Hasher, 0x1234_5678, black_box(name))));
    });
}

fn benchmark_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro_add");

    for size in [7u64, 63, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(filled(size)));
        });
    }

    group.finish();
}

fn benchmark_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro_lookup");

    for size in [7u64, 63, 1000].iter() {
        let (dirs, dir) = filled(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let name = format!("entry-{}", size / 2);
            b.iter(|| black_box(dirs.lookup_u64(dir, &name).unwrap()));
        });
    }

    group.finish();
}

fn benchmark_iterate(c: &mut Criterion) {
    let (dirs, dir) = filled(1000);
    c.bench_function("micro_iterate_1000", |b| {
        b.iter(|| black_box(dirs.entries(dir).count()));
    });
}

fn benchmark_reload(c: &mut Criterion) {
    let (dirs, dir) = filled(1000);
    c.bench_function("micro_reload_1000", |b| {
        b.iter(|| {
            // Dropping the cached handle forces the index to be rebuilt
            use zap_rs::ObjectStore;
            dirs.store().handles().evict(dir);
            black_box(dirs.count(dir).unwrap())
        });
    });
}

criterion_group!(
    benches,
    benchmark_hash,
    benchmark_add,
    benchmark_lookup,
    benchmark_iterate,
    benchmark_reload
);
criterion_main!(benches);
