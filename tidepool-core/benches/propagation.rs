//! Benchmarks for change propagation through the graph and the container.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Map, Value};
use tidepool_core::reactive::Runtime;
use tidepool_core::StateContainer;

/// Benchmark a write fanning out to `n` readers.
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for n in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let runtime = Runtime::new();
            let scope = runtime.scope();
            let source = scope.signal(0u64).unwrap();
            for _ in 0..n {
                let s = source.clone();
                scope
                    .computation(move || {
                        black_box(s.get()?);
                        Ok(())
                    })
                    .unwrap();
            }

            let mut next = 0;
            b.iter(|| {
                next += 1;
                source.set(next).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark a chain of `n` derived signals.
fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");

    for n in [10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let runtime = Runtime::new();
            let scope = runtime.scope();
            let head = scope.signal(0u64).unwrap();

            let mut previous = head.clone();
            for _ in 0..n {
                let next = scope.signal(0u64).unwrap();
                let (input, output) = (previous.clone(), next.clone());
                scope
                    .computation(move || output.set(input.get()? + 1))
                    .unwrap();
                previous = next;
            }

            let mut value = 0;
            b.iter(|| {
                value += 1;
                head.set(value).unwrap();
                black_box(previous.get_untracked().unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark a one-leaf patch against a container with `n` materialized keys.
fn bench_patch(c: &mut Criterion) {
    let mut group = c.benchmark_group("patch");

    for n in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let data: Map<String, Value> = (0..n).map(|i| (format!("k{i}"), json!(i))).collect();
            let state = StateContainer::new(Value::Object(data)).unwrap();
            for i in 0..n {
                state.get(&format!("k{i}")).unwrap();
            }

            let mut value = n;
            b.iter(|| {
                value += 1;
                state.set(json!({ "k0": value })).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fan_out, bench_chain, bench_patch);
criterion_main!(benches);
