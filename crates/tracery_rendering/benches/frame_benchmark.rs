//! Benchmark for one headless frame over the full lattice.
//!
//! Run with: cargo bench --package tracery_rendering --bench frame_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tracery_core::{
    generate, InstanceConfig, MaterialClass, MaterialId, MeshDesc, MeshId, PipelineConfig,
    SceneRenderer, Vec3,
};
use tracery_rendering::{FrameOrchestrator, HeadlessDevice, TraceView};

fn benchmark_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");
    group.throughput(Throughput::Elements(32 * 32 * 32));
    group.sample_size(20);

    let mut device = HeadlessDevice::new();
    let instance = InstanceConfig::new(MeshDesc::new(MeshId(1), 2880), MaterialId(1));
    let mut frames = FrameOrchestrator::new(
        &mut device,
        &PipelineConfig::default(),
        instance,
        &generate(32, 32, 32),
    )
    .expect("orchestrator setup");
    let scene: Vec<SceneRenderer> = (0..64)
        .map(|i| SceneRenderer::new(i, Vec3::new(i as f32, 0.0, 0.0), MaterialClass::Opaque))
        .collect();
    let mut view = TraceView::new("bench");

    group.bench_function("tick_32x32x32", |b| {
        b.iter(|| {
            let report = frames.tick(&mut device, black_box(&scene), &mut view);
            device.take_draws();
            black_box(report)
        });
    });

    let transforms = generate(32, 32, 32);
    group.bench_function("update_positions_32x32x32", |b| {
        b.iter(|| black_box(frames.update_positions(&mut device, black_box(&transforms))));
    });

    group.finish();
    frames.shutdown(&mut device);
}

criterion_group!(benches, benchmark_frame);
criterion_main!(benches);
