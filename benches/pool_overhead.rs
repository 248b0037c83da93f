//! Dispatch overhead of the thread-backed executor.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use parbatch::prelude::*;
use serde_json::{json, Value};

fn thread_pool_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("thread_pool_dispatch");

    for size in [1usize, 8, 64].iter() {
        group.bench_with_input(BenchmarkId::new("batch", size), size, |b, &size| {
            b.iter(|| {
                let ident = target("ident", |args: &CallArgs| {
                    Ok(black_box(args.positional.first().cloned().unwrap_or(Value::Null)))
                });
                let params = Value::Array((0..size).map(|i| json!(i)).collect());
                let envelopes = normalize_call_batch(ident, &params).unwrap();
                run_parallel_threads(envelopes, 8).unwrap()
            });
        });
    }

    group.finish();
}

fn batch_normalization(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_normalization");

    for size in [16usize, 256].iter() {
        group.bench_with_input(BenchmarkId::new("bare", size), size, |b, &size| {
            let ident = target("ident", |_: &CallArgs| Ok(Value::Null));
            let params = Value::Array((0..size).map(|i| json!(i)).collect());
            b.iter(|| normalize_call_batch(ident.clone(), black_box(&params)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, thread_pool_dispatch, batch_normalization);
criterion_main!(benches);
