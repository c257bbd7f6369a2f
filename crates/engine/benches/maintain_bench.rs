//! Benchmarks for vigil-engine pipelines.
//!
//! Target: a single-element structural update stays O(changed positions),
//! not O(collection size), for filter and sum maintenance.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use vigil_core::{ActiveList, ListEvent, ListSource, Value};
use vigil_engine::{
    AggregateSpec, MaintainedSequence, MaintainedValue, ProjectionKind, SumState,
};
use vigil_expr::{EvalOptions, EvalWatchFactory, Expr};

fn ints(n: usize) -> Vec<Value> {
    (0..n as i64).map(Value::Int64).collect()
}

fn where_pipeline(snapshot: Vec<Value>) -> (Arc<ActiveList>, MaintainedSequence) {
    let list = Arc::new(ActiveList::from_values(snapshot));
    let pipeline = MaintainedSequence::new(
        list.clone() as Arc<dyn ListSource>,
        ProjectionKind::Where,
        Expr::gt(Expr::Input, Expr::literal(10i64)),
        EvalOptions::new(),
        Arc::new(EvalWatchFactory),
        Arc::new(|_| {}),
    );
    (list, pipeline)
}

fn bench_sum_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate/sum");

    group.bench_function("single_add", |b| {
        let mut sum = SumState::new();
        let value = Value::Int64(7);
        b.iter(|| sum.add(black_box(&value)));
    });

    group.finish();
}

fn bench_where_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("where/incremental_add");

    for size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let (_, mut pipeline) = where_pipeline(ints(size));
            let event = ListEvent::Add {
                index: 0,
                items: vec![Value::Int64(999)],
            };
            let undo = ListEvent::Remove {
                index: 0,
                items: vec![Value::Int64(999)],
            };
            b.iter(|| {
                pipeline.apply_source_event(black_box(&event));
                pipeline.apply_source_event(black_box(&undo));
            });
        });
    }

    group.finish();
}

fn bench_where_recompute_baseline(c: &mut Criterion) {
    let mut group = c.benchmark_group("where/full_recompute");

    for size in [10, 100, 1000] {
        let values = ints(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &values, |b, values| {
            b.iter(|| {
                values
                    .iter()
                    .filter(|v| v.as_i64().is_some_and(|n| n > 10))
                    .cloned()
                    .collect::<Vec<_>>()
            });
        });
    }

    group.finish();
}

fn bench_sum_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("sum/incremental_update");

    for size in [100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let list = Arc::new(ActiveList::from_values(ints(size)));
            let mut pipeline = MaintainedValue::new(
                list.clone() as Arc<dyn ListSource>,
                AggregateSpec::Sum,
                Expr::Input,
                EvalOptions::new(),
                Arc::new(EvalWatchFactory),
                Arc::new(|_| {}),
            );
            let add = ListEvent::Add {
                index: 0,
                items: vec![Value::Int64(5)],
            };
            let remove = ListEvent::Remove {
                index: 0,
                items: vec![Value::Int64(5)],
            };
            b.iter(|| {
                pipeline.apply_source_event(black_box(&add));
                pipeline.apply_source_event(black_box(&remove));
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_sum_state,
    bench_where_update,
    bench_where_recompute_baseline,
    bench_sum_update
);
criterion_main!(benches);
