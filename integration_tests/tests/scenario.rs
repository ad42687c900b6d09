mod common;

use std::sync::Arc;

use market_core::{
    top_firms_by_capital, ScenarioConfig, Simulation, SimulationConfig, PRIVACY_SCORE_FLOOR,
};

const SHOCK_TICK: usize = 2;

/// Three firms over two categories, no entrants, one scandal at tick 2.
fn toy_config() -> Arc<SimulationConfig> {
    common::fixture_with(|config| {
        config.general.n_ticks = 6;
        config.general.n_consumers = 30;
        config.general.n_init_firms = 3;
        config.general.n_init_big_firms = 1;
        config.general.birth_lambda = 0.0;
        config.categories.n_total_categories = 2;
        config.categories.n_init_categories = 2;
        config.privacy.mean_cons_concern = 0.6;
        config.scenario = Some(ScenarioConfig {
            tick: SHOCK_TICK,
            affected_firm_count: 1,
            firm_hit: 0.3,
            consumer_hit_mean: 0.2,
            consumer_hit_var: 0.0,
            seed: 99,
        });
    })
}

#[test]
fn shock_hits_the_richest_firm_once() {
    let mut sim = Simulation::new(toy_config()).expect("setup");
    for _ in 0..SHOCK_TICK {
        let report = sim.step().expect("tick").expect("before shock");
        assert!(report.scenario.is_none());
    }
    let before = sim.state().clone();
    let richest = top_firms_by_capital(&before.capital, 1);

    let report = sim.step().expect("tick").expect("shock tick");
    let shock = report.scenario.expect("scenario fires at its tick");
    assert_eq!(shock.shocked_firms, richest);

    let after = sim.state();
    for firm in 0..after.dims().n_firms {
        let expected = if richest.contains(&firm) {
            (before.privacy_score[firm] - 0.3).max(PRIVACY_SCORE_FLOOR)
        } else {
            before.privacy_score[firm]
        };
        assert!((after.privacy_score[firm] - expected).abs() < 1e-12);
    }
    // zero spread shifts every concern by exactly the mean
    for (now, was) in after.privacy_concern.iter().zip(&before.privacy_concern) {
        assert!((now - (was + 0.2)).abs() < 1e-12);
    }

    while let Some(report) = sim.step().expect("tick") {
        assert!(report.scenario.is_none());
    }
}

#[test]
fn deleting_consumers_lose_the_firm_for_good() {
    let mut sim = Simulation::new(toy_config()).expect("setup");
    for _ in 0..SHOCK_TICK {
        sim.step().expect("tick");
    }
    let before = sim.state().clone();
    let report = sim.step().expect("tick").expect("shock tick");
    let shock = report.scenario.expect("scenario fires");
    let firm = shock.shocked_firms[0];

    let after = sim.state().clone();
    let dims = after.dims();
    let deleters: Vec<usize> = (0..dims.n_consumers)
        .filter(|&consumer| after.privacy_mask[[consumer, firm]] == 0)
        .collect();
    assert_eq!(deleters.len(), shock.deletions);
    // concerns start near 0.6 and rise by 0.2, so most consumers delete
    assert!(!deleters.is_empty());

    loop {
        let state = sim.state();
        for &consumer in &deleters {
            assert_eq!(state.privacy_mask[[consumer, firm]], 0);
            for category in 0..dims.n_categories {
                assert_eq!(state.usage[[consumer, category, firm]], 0);
                for datatype in 0..dims.n_datatypes {
                    // only decay touches the value once the consumer has left
                    assert!(
                        state.data_value[[consumer, category, firm, datatype]]
                            <= after.data_value[[consumer, category, firm, datatype]]
                    );
                    for tick in 0..dims.n_ticks {
                        assert_eq!(
                            state.data_held[[tick, consumer, category, firm, datatype]],
                            0
                        );
                    }
                }
            }
        }
        if sim.step().expect("tick").is_none() {
            break;
        }
    }

    // consumers who kept the firm keep their history
    for consumer in (0..dims.n_consumers).filter(|c| !deleters.contains(c)) {
        for category in 0..dims.n_categories {
            for datatype in 0..dims.n_datatypes {
                for tick in 0..SHOCK_TICK {
                    let slot = [tick, consumer, category, firm, datatype];
                    assert!(after.data_held[slot] >= before.data_held[slot]);
                }
            }
        }
    }
}
