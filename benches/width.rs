use colonnade::{Array, Column, Kind, MemAlloc};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn packed_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("packed get");

    for (label, value) in [("w1", 1i64), ("w8", 200), ("w16", 20_000), ("w64", i64::MAX)] {
        let mut alloc = MemAlloc::new();
        let mut arr = Array::create(&mut alloc, Kind::Normal).unwrap();

        for _ in 0..1_000 {
            arr.add(&mut alloc, value).unwrap();
        }

        group.bench_function(label, |b| {
            b.iter(|| {
                let mut sum = 0i64;

                for i in 0..1_000 {
                    sum = sum.wrapping_add(arr.get(&alloc, black_box(i)));
                }

                sum
            });
        });
    }

    group.finish();
}

fn packed_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("packed find_first");

    for (label, value) in [("w1", 1i64), ("w8", 200), ("w64", i64::MAX)] {
        let mut alloc = MemAlloc::new();
        let mut arr = Array::create(&mut alloc, Kind::Normal).unwrap();

        for _ in 0..1_000 {
            arr.add(&mut alloc, value).unwrap();
        }

        // The needle is wider than anything stored, so the scan runs the
        // whole range
        group.bench_function(label, |b| {
            b.iter(|| arr.find_first(&alloc, black_box(value - 1), 0, 1_000));
        });
    }

    group.finish();
}

fn column_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("column scan");

    let mut alloc = MemAlloc::new();
    let mut col = Column::new(&mut alloc).unwrap();

    for i in 0..100_000i64 {
        col.add(&mut alloc, i % 1_000).unwrap();
    }

    group.bench_function("sum 100k", |b| {
        b.iter(|| col.sum(&alloc, 0, 100_000).unwrap());
    });

    group.bench_function("point get", |b| {
        b.iter(|| col.get(&alloc, black_box(73_581)).unwrap());
    });

    group.finish();
}

criterion_group!(benches, packed_get, packed_find, column_scan);
criterion_main!(benches);
