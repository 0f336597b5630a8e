//! Allocator microbenchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sidemalloc::{size_class, CombinedAllocator, LocalCache};

fn leaked_allocator() -> &'static CombinedAllocator {
    let a = Box::leak(Box::new(CombinedAllocator::new()));
    unsafe { a.init() };
    a
}

fn bench_class_lookup(c: &mut Criterion) {
    c.bench_function("class_id_lookup", |b| {
        b.iter(|| {
            let mut acc = 0usize;
            for s in (1..=black_box(1usize << 16)).step_by(97) {
                acc = acc.wrapping_add(size_class::class_id(s));
            }
            black_box(acc)
        });
    });
}

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let a = leaked_allocator();
    let sizes: &[usize] = &[16, 64, 256, 1024, 4096, 32768];
    let mut group = c.benchmark_group("alloc_free_cycle");

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("cached", size), &size, |b, &sz| {
            let mut cache = LocalCache::new();
            b.iter(|| unsafe {
                let p = a.allocate(&mut cache, black_box(sz), 8, false);
                a.deallocate(&mut cache, black_box(p));
            });
        });
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let a = leaked_allocator();
    let mut group = c.benchmark_group("alloc_burst");

    group.bench_function("1000x64B", |b| {
        let mut cache = LocalCache::new();
        let mut held = Vec::with_capacity(1000);
        b.iter(|| unsafe {
            for _ in 0..1000 {
                held.push(a.allocate(&mut cache, 64, 8, false));
            }
            for p in held.drain(..) {
                a.deallocate(&mut cache, p);
            }
        });
    });

    group.finish();
}

fn bench_large_path(c: &mut Criterion) {
    let a = leaked_allocator();
    c.bench_function("large_map_4MiB", |b| {
        let mut cache = LocalCache::new();
        b.iter(|| unsafe {
            let p = a.allocate(&mut cache, black_box(1 << 22), 8, false);
            a.deallocate(&mut cache, black_box(p));
        });
    });
}

criterion_group!(
    benches,
    bench_class_lookup,
    bench_alloc_free_cycle,
    bench_alloc_burst,
    bench_large_path
);
criterion_main!(benches);
