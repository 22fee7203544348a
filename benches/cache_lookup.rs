use criterion::*;
use std::hint::black_box;
use std::sync::Arc;

#[path = "../tests/common/mod.rs"]
mod common;
use common::*;

use compute_context::{PipelineCache, ShaderCache, WorkGroup};

fn cache_hit_benchmark(c: &mut Criterion) {
    let device = MockDevice::new();
    let shaders = ShaderCache::new(Arc::clone(&device));
    let pipelines = PipelineCache::new(Arc::clone(&device));

    let signature = unary_signature();
    let shader = kernel("relu");
    let layout = shaders.layout.retrieve(&signature).unwrap();
    let module = shaders.module.retrieve(&shader).unwrap();
    pipelines.retrieve(&layout, &module, WorkGroup::linear(64)).unwrap();

    let mut group = c.benchmark_group("cache_hit");

    group.bench_function("shader_layout", |b| {
        b.iter(|| black_box(shaders.layout.retrieve(black_box(&signature)).unwrap()));
    });

    group.bench_function("shader_module", |b| {
        b.iter(|| black_box(shaders.module.retrieve(black_box(&shader)).unwrap()));
    });

    group.bench_function("pipeline", |b| {
        b.iter(|| {
            black_box(
                pipelines
                    .retrieve(&layout, &module, black_box(WorkGroup::linear(64)))
                    .unwrap(),
            )
        });
    });

    group.finish();
}

criterion_group!(benches, cache_hit_benchmark);
criterion_main!(benches);
