mod common;

use anyhow::Result;
use market_core::{
    pending_ports, port, Dimensions, InitialStateGenerator, MarketState, PortRequest, SimRng,
    Simulation, SimulationConfig, SimulationError, StandardSetup,
};

fn two_firm_market() -> MarketState {
    let mut state = MarketState::empty(Dimensions {
        n_ticks: 4,
        n_consumers: 1,
        n_categories: 2,
        n_firms: 2,
        n_datatypes: 2,
    });
    state.category_datatype[[0, 0]] = 1;
    state.category_datatype[[0, 1]] = 1;
    state.category_datatype[[1, 0]] = 1;
    state
}

#[test]
fn port_copies_exactly_the_missing_history() {
    let mut state = two_firm_market();
    // firm 0 served the consumer in category 0 on ticks 0 and 1
    state.data_held[[0, 0, 0, 0, 0]] = 1;
    state.data_held[[1, 0, 0, 0, 0]] = 1;
    state.data_held[[1, 0, 0, 0, 1]] = 1;
    state.data_value[[0, 0, 0, 0]] = 1.5;
    state.data_value[[0, 0, 0, 1]] = 0.9;
    // firm 1 already has tick 0 of datatype 0 in category 1
    state.data_held[[0, 0, 1, 1, 0]] = 1;
    state.data_value[[0, 1, 1, 0]] = 0.8;
    state.portability[[1, 1, 0, 0, 0]] = 1;
    state.uninterrupted_usage[[0, 1, 1]] = 2;

    let requests = pending_ports(&state, 2);
    assert_eq!(
        requests,
        vec![PortRequest {
            consumer: 0,
            category: 1,
            firm: 1,
        }]
    );

    let copied = port(&mut state, &requests, 3);

    assert_eq!(copied, 1);
    assert_eq!(state.data_held[[1, 0, 1, 1, 0]], 1);
    assert_eq!(state.data_held[[0, 0, 1, 1, 0]], 1);
    assert!((state.data_value[[0, 1, 1, 0]] - 1.8).abs() < 1e-12);
    // no right was granted for datatype 1
    assert_eq!(state.data_held[[1, 0, 1, 1, 1]], 0);
    assert_eq!(state.data_value[[0, 1, 1, 1]], 0.0);
    // the source keeps its copy
    assert_eq!(state.data_held[[1, 0, 0, 0, 0]], 1);
}

#[test]
fn porting_needs_a_valued_source() {
    let mut state = two_firm_market();
    state.data_held[[0, 0, 0, 0, 0]] = 1;
    state.portability[[1, 1, 0, 0, 0]] = 1;

    let request = PortRequest {
        consumer: 0,
        category: 1,
        firm: 1,
    };
    assert_eq!(port(&mut state, &[request], 2), 0);
    assert_eq!(state.data_held[[0, 0, 1, 1, 0]], 0);
}

#[test]
fn streaks_short_of_the_threshold_do_not_port() {
    let mut state = two_firm_market();
    state.uninterrupted_usage[[0, 1, 1]] = 1;
    state.uninterrupted_usage[[0, 0, 0]] = 3;
    assert!(pending_ports(&state, 2).is_empty());
}

/// The standard market with every data right already granted.
struct OpenMarket;

impl InitialStateGenerator for OpenMarket {
    fn generate(
        &self,
        config: &SimulationConfig,
        rng: &mut SimRng,
    ) -> Result<MarketState, SimulationError> {
        let mut state = StandardSetup.generate(config, rng)?;
        state.portability = state.requestable.clone();
        state.requestable.fill(0);
        Ok(state)
    }
}

#[test]
fn every_new_bit_is_recorded_or_ported() -> Result<()> {
    let mut sim = Simulation::with_generator(common::fixture_config(), &OpenMarket)?;
    let mut ported = 0;
    loop {
        let bits_before: usize = held_bits(sim.state());
        let Some(report) = sim.step()? else {
            break;
        };
        assert!(report.negotiation.requests.is_empty());
        assert_eq!(
            held_bits(sim.state()),
            bits_before + report.ledger.bits_recorded + report.bits_ported,
            "tick {}",
            report.tick
        );
        ported += report.bits_ported;
    }
    assert!(ported > 0, "an open market should see some porting");
    Ok(())
}

fn held_bits(state: &MarketState) -> usize {
    state.data_held.as_slice().iter().map(|&bit| bit as usize).sum()
}

#[test]
fn malformed_foreign_state_is_rejected() {
    struct SelfDealing;

    impl InitialStateGenerator for SelfDealing {
        fn generate(
            &self,
            config: &SimulationConfig,
            rng: &mut SimRng,
        ) -> Result<MarketState, SimulationError> {
            let mut state = StandardSetup.generate(config, rng)?;
            state.portability[[0, 0, 0, 0, 0]] = 1;
            Ok(state)
        }
    }

    let err = Simulation::with_generator(common::fixture_config(), &SelfDealing)
        .expect_err("self pair must be rejected");
    assert!(matches!(err, SimulationError::InvariantViolation { tick: 0, .. }));
}
