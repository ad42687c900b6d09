use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use market_core::{Simulation, SimulationConfig};

fn config_with_consumers(consumers: usize) -> Arc<SimulationConfig> {
    let mut config = SimulationConfig::default();
    config.general.n_ticks = 4;
    config.general.n_consumers = consumers;
    Arc::new(config)
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    for consumers in [50usize, 200, 800, 2000] {
        let config = config_with_consumers(consumers);
        group.bench_with_input(
            BenchmarkId::new("consumers", consumers),
            &config,
            |b, config| {
                b.iter_batched(
                    || {
                        let mut sim = Simulation::new(Arc::clone(config)).expect("setup");
                        // tick 0 skips the firm phases
                        sim.step().expect("tick 0");
                        sim
                    },
                    |mut sim| {
                        sim.step().expect("tick 1");
                    },
                    BatchSize::SmallInput,
                )
            },
        );
    }

    group.finish();
}

criterion_group!(tick_benches, bench_tick);
criterion_main!(tick_benches);
