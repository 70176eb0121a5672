use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

use quiver::{derived, get, writable, Subscribable, Writable};

fn writable_creation_benchmark(c: &mut Criterion) {
    c.bench_function("writable_creation", |b| {
        b.iter(|| {
            let store: Writable<i32> = writable(black_box(42));
            store
        });
    });
}

fn get_benchmark(c: &mut Criterion) {
    let store = writable(42);

    c.bench_function("get", |b| {
        b.iter(|| {
            black_box(get(&store));
        });
    });
}

fn set_inactive_benchmark(c: &mut Criterion) {
    let store = writable(0);

    c.bench_function("set_inactive", |b| {
        let mut i = 0;
        b.iter(|| {
            store.set(black_box(i));
            i += 1;
        });
    });
}

fn set_unchanged_benchmark(c: &mut Criterion) {
    let store = writable(7);
    let _unsubscribe = store.subscribe(|_| {});

    c.bench_function("set_unchanged", |b| {
        b.iter(|| {
            store.set(black_box(7));
        });
    });
}

fn subscriber_fan_out_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("subscriber_fan_out");

    for subscriber_count in [1, 10, 100].iter() {
        let store = writable(0usize);
        let _unsubscribers: Vec<_> = (0..*subscriber_count)
            .map(|_| {
                store.subscribe(|value| {
                    black_box(value);
                })
            })
            .collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(subscriber_count),
            subscriber_count,
            |b, _| {
                let mut i = 0;
                b.iter(|| {
                    store.set(black_box(i));
                    i += 1;
                });
            },
        );
    }
    group.finish();
}

fn derived_recompute_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("derived_recompute");

    for source_count in [2, 16, 128].iter() {
        let sources: Vec<_> = (0..*source_count).map(writable).collect();
        let total = derived(sources.clone(), |values: &Vec<i32>| values.iter().sum::<i32>());
        let _unsubscribe = total.subscribe(|value| {
            black_box(value);
        });

        group.bench_with_input(
            BenchmarkId::from_parameter(source_count),
            source_count,
            |b, _| {
                let mut i = 0;
                b.iter(|| {
                    sources[0].set(black_box(i));
                    i += 1;
                });
            },
        );
    }
    group.finish();
}

fn derived_chain_benchmark(c: &mut Criterion) {
    let base = writable(0);
    let mut tip = derived(base.clone(), |v: &i32| v + 1);
    for _ in 0..9 {
        tip = derived(tip, |v: &i32| v + 1);
    }
    let _unsubscribe = tip.subscribe(|_| {});

    c.bench_function("derived_chain_10", |b| {
        let mut i = 0;
        b.iter(|| {
            base.set(black_box(i));
            i += 1;
        });
    });
}

criterion_group!(
    benches,
    writable_creation_benchmark,
    get_benchmark,
    set_inactive_benchmark,
    set_unchanged_benchmark,
    subscriber_fan_out_benchmark,
    derived_recompute_benchmark,
    derived_chain_benchmark,
);
criterion_main!(benches);
