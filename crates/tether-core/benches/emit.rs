//! Dispatch benchmarks for the Tether emitters.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use tether_core::{once, ChannelMode, EventEmitter, ReactiveEmitter};

/// Benchmark listener-list dispatch.
fn bench_event_emitter(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_emitter");

    for listeners in [1usize, 100, 1000] {
        group.bench_function(format!("emit_{}_listeners", listeners), |b| {
            let emitter = EventEmitter::new();
            for _ in 0..listeners {
                emitter.on("tick", |e| {
                    black_box(e);
                });
            }
            let args = vec![json!("arg1"), json!({"n": 1})];

            b.iter(|| emitter.emit("tick", black_box(args.clone())));
        });
    }

    group.bench_function("once_future_settle", |b| {
        let emitter = EventEmitter::new();
        b.iter(|| {
            let fut = once(&emitter, "ready");
            emitter.emit("ready", vec![json!(1)]);
            black_box(fut);
        });
    });

    group.finish();
}

/// Benchmark channel-per-event dispatch.
fn bench_reactive_emitter(c: &mut Criterion) {
    let mut group = c.benchmark_group("reactive_emitter");

    for mode in [ChannelMode::Immediate, ChannelMode::ReplayLast] {
        group.bench_function(format!("emit_100_subs_{:?}", mode), |b| {
            let emitter: ReactiveEmitter<u64> = ReactiveEmitter::with_mode(mode);
            let _handles: Vec<_> = (0..100)
                .map(|_| {
                    emitter.on("tick", |v| {
                        black_box(v);
                    })
                })
                .collect();

            b.iter(|| emitter.emit("tick", black_box(42)));
        });
    }

    group.bench_function("subscribe", |b| {
        let emitter: ReactiveEmitter<u64> = ReactiveEmitter::new(true);
        let mut i = 0u64;
        b.iter(|| {
            let name = format!("channel:{}", i);
            i += 1;
            emitter.on(&name, |_| {})
        });
    });

    group.finish();
}

criterion_group!(benches, bench_event_emitter, bench_reactive_emitter);
criterion_main!(benches);
