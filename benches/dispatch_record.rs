use criterion::*;
use std::hint::black_box;

#[path = "../tests/common/mod.rs"]
mod common;
use common::*;

use compute_context::{dispatch_epilogue, dispatch_prologue, WorkGroup};

const DISPATCHES: usize = 1_000;

fn dispatch_record_benchmark(c: &mut Criterion) {
    let fx = fixture();
    fx.device.discard_recordings.store(true, std::sync::atomic::Ordering::SeqCst);
    let context = &fx.context;
    let a = storage_buffer(context, 4096);
    let b = storage_buffer(context, 4096);
    let out = storage_buffer(context, 4096);
    let signature = binary_signature();
    let shader = kernel("add");

    c.bench_function("record_and_flush_1k_dispatches", |bench| {
        bench.iter(|| {
            {
                let mut command = context.command();
                let stream = command.stream();
                for _ in 0..DISPATCHES {
                    let mut prepared =
                        dispatch_prologue(context, stream, &signature, &shader, WorkGroup::linear(64)).unwrap();
                    prepared
                        .bind_buffer(0, &a)
                        .unwrap()
                        .bind_buffer(1, &b)
                        .unwrap()
                        .bind_buffer(2, &out)
                        .unwrap();
                    dispatch_epilogue(stream, prepared, WorkGroup::linear(16)).unwrap();
                }
                black_box(stream.len());
            }
            context.flush().unwrap();
        });
    });
}

criterion_group!(benches, dispatch_record_benchmark);
criterion_main!(benches);
