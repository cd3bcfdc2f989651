use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use otter_bridge::value::{ReadableArray, Value, WritableArray, WritableMap, from_value, to_value};
use serde::{Deserialize, Serialize};
use std::hint::black_box;

#[derive(Serialize, Deserialize)]
struct LayoutEvent {
    tag: i32,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    children: Vec<i32>,
}

fn sample_event(i: i32) -> LayoutEvent {
    LayoutEvent {
        tag: i,
        x: 0.5 * f64::from(i),
        y: 12.0,
        width: 320.0,
        height: 44.25,
        children: (0..8).collect(),
    }
}

fn build_args(n: usize) -> WritableArray {
    let mut args = WritableArray::with_capacity(n);
    for i in 0..n as i32 {
        let mut entry = WritableMap::new();
        entry.put_int("tag", i);
        entry.put_double("opacity", 0.75);
        entry.put_string("name", "view");
        args.push_map(entry);
    }
    args
}

fn bench_builders(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_builders");

    group.bench_function("build_256_maps", |b| {
        b.iter(|| black_box(build_args(256)));
    });

    group.bench_function("read_256_maps", |b| {
        b.iter_batched(
            || build_args(256).into_readable(),
            |args: ReadableArray| {
                let mut sum = 0i64;
                for i in 0..args.len() {
                    if let Ok(map) = args.get_map(i) {
                        sum += i64::from(map.get_int("tag").unwrap_or_default());
                    }
                }
                black_box(sum);
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_serde(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_serde");
    let events: Vec<LayoutEvent> = (0..64).map(sample_event).collect();
    let value = to_value(&events).unwrap_or_default();

    group.bench_function("to_value_64_events", |b| {
        b.iter(|| black_box(to_value(&events)));
    });

    group.bench_function("from_value_64_events", |b| {
        b.iter(|| black_box(from_value::<Vec<LayoutEvent>>(&value)));
    });

    group.bench_function("to_json_64_events", |b| {
        b.iter(|| black_box(Value::to_json(&value)));
    });

    group.finish();
}

criterion_group!(benches, bench_builders, bench_serde);
criterion_main!(benches);
