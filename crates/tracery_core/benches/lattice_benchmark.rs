//! Benchmark for lattice generation and record derivation.
//!
//! Run with: cargo bench --package tracery_core --bench lattice_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tracery_core::{color_from_position, generate, records_from_transforms, Vec3};

fn benchmark_full_lattice(c: &mut Criterion) {
    let mut group = c.benchmark_group("lattice");
    group.throughput(Throughput::Elements(32 * 32 * 32));
    group.sample_size(20);

    group.bench_function("generate_32x32x32", |b| {
        b.iter(|| black_box(generate(black_box(32), black_box(32), black_box(32))));
    });

    let matrices = generate(32, 32, 32);
    group.bench_function("records_32x32x32", |b| {
        b.iter(|| black_box(records_from_transforms(black_box(&matrices))));
    });

    group.finish();
}

fn benchmark_colormap(c: &mut Criterion) {
    c.bench_function("color_from_position", |b| {
        let mut x = 0.0f32;
        b.iter(|| {
            x += 0.1;
            black_box(color_from_position(black_box(Vec3::new(x, x * 0.5, -x))))
        });
    });
}

criterion_group!(benches, benchmark_full_lattice, benchmark_colormap);
criterion_main!(benches);
