use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use market_core::{MarketState, Negotiator, SimRng, Simulation, SimulationConfig};
use rand::SeedableRng;

fn market_after_warmup(firms: usize, datatypes: usize) -> (Arc<SimulationConfig>, MarketState) {
    let mut config = SimulationConfig::default();
    config.general.n_ticks = 3;
    config.general.n_consumers = 100;
    config.general.n_init_firms = firms;
    config.general.n_init_big_firms = 1;
    config.general.birth_lambda = 0.0;
    config.data.n_data_types_total = datatypes;
    config.data.n_data_types_init = datatypes / 2;
    let config = Arc::new(config);
    let mut sim = Simulation::new(Arc::clone(&config)).expect("setup");
    sim.step().expect("tick 0");
    let state = sim.state().clone();
    (config, state)
}

fn bench_negotiation(c: &mut Criterion) {
    let mut group = c.benchmark_group("negotiation");

    for firms in [4usize, 8, 16] {
        let (config, state) = market_after_warmup(firms, 12);
        group.bench_with_input(BenchmarkId::new("firms", firms), &state, |b, state| {
            b.iter_batched(
                || (state.clone(), Negotiator::new(state.dims()), SimRng::seed_from_u64(9)),
                |(mut state, mut negotiator, mut rng)| {
                    negotiator.negotiate(&mut state, &config.openness, &mut rng)
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(negotiation_benches, bench_negotiation);
criterion_main!(negotiation_benches);
