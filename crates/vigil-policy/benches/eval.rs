//! Evaluation benchmarks for vigil-policy.
//!
//! Measures policy compilation at various decoder counts and single-event
//! evaluation over the composed cascade.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use vigil_policy::{
    evaluate, register_builders, BuilderDeps, Event, KvdbManager, MemStore, PolicyBuilder,
    Registry,
};

/// Store fixture: `n` root decoders, each checking a distinct selector.
fn fixture(n: usize) -> PolicyBuilder {
    let dir = std::env::temp_dir().join("vigil-policy-bench");
    let kvdb = Arc::new(KvdbManager::new(dir.join("kvdb")).unwrap());
    let mut registry = Registry::new();
    register_builders(&mut registry, &BuilderDeps::new(kvdb, dir.join("wdb.sock"))).unwrap();

    let store = MemStore::new();
    let decoders: Vec<String> = (0..n).map(|i| format!("decoder-{i}")).collect();
    for (i, name) in decoders.iter().enumerate() {
        store
            .insert_yaml(
                name,
                &format!(
                    "name: {name}\ncheck:\n  - selector: tag-{i}\nmap:\n  - fired: {name}\n"
                ),
            )
            .unwrap();
    }
    store
        .insert_yaml(
            "policy-bench",
            &format!("name: policy-bench\ndecoders: [{}]\n", decoders.join(", ")),
        )
        .unwrap();
    PolicyBuilder::new(Arc::new(store), Arc::new(registry))
}

fn bench_compile_policy(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_policy");
    for n in [10, 100, 1000] {
        let builder = fixture(n);
        group.bench_with_input(BenchmarkId::new("decoders", n), &builder, |b, builder| {
            b.iter(|| {
                let policy = builder.build_policy(black_box("policy-bench")).unwrap();
                black_box(&policy);
            });
        });
    }
    group.finish();
}

fn bench_eval_single_event(c: &mut Criterion) {
    let mut group = c.benchmark_group("eval_single_event");
    for n in [10, 100, 1000] {
        let builder = fixture(n);
        let policy = builder.build_policy("policy-bench").unwrap();
        // Worst case for the Or cascade: the last decoder matches.
        let value = json!({"selector": format!("tag-{}", n - 1)});

        group.bench_with_input(
            BenchmarkId::new("decoders", n),
            &policy.expression,
            |b, expression| {
                b.iter(|| {
                    let event = Event::from_value(value.clone());
                    let result = evaluate(black_box(expression), event);
                    black_box(result.ok());
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_compile_policy, bench_eval_single_event);
criterion_main!(benches);
