//! Propagation benchmarks: write cost through chains and fan-outs of
//! computed values into a single reaction.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use trellis_core::reactive::{ComputedValue, Configuration, EnforceActions, SharedState};

fn relaxed() -> SharedState {
    SharedState::with_config(Configuration {
        enforce_actions: EnforceActions::Never,
        ..Configuration::default()
    })
}

fn chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    for depth in [4usize, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let state = relaxed();
            let base = state.observable("base", 0u64);

            let base_in = base.clone();
            let mut tip: ComputedValue<u64> = state.computed("c0", move || base_in.get() + 1);
            for i in 1..depth {
                let prev = tip.clone();
                tip = state.computed(format!("c{i}"), move || prev.get() + 1);
            }
            let tip_in = tip.clone();
            let _reaction = state.autorun("sink", move || {
                tip_in.get();
            });

            let mut n = 0u64;
            b.iter(|| {
                n += 1;
                base.set(n);
            });
        });
    }
    group.finish();
}

fn fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    for width in [8usize, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let state = relaxed();
            let base = state.observable("base", 0u64);

            let layer: Vec<ComputedValue<u64>> = (0..width)
                .map(|i| {
                    let base_in = base.clone();
                    state.computed(format!("c{i}"), move || base_in.get().wrapping_mul(i as u64))
                })
                .collect();
            let layer_in = layer.clone();
            let _reaction = state.autorun("sink", move || {
                for computed in &layer_in {
                    computed.get();
                }
            });

            let mut n = 0u64;
            b.iter(|| {
                n += 1;
                base.set(n);
            });
        });
    }
    group.finish();
}

fn untracked_reads(c: &mut Criterion) {
    c.bench_function("untracked_read", |b| {
        let state = relaxed();
        let value = state.observable("value", 1u64);
        b.iter(|| value.get_untracked());
    });
}

criterion_group!(benches, chain, fan_out, untracked_reads);
criterion_main!(benches);
