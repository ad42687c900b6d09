use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::{
    choice::{consumer_choice_phase, ChoiceReport},
    config::SimulationConfig,
    error::SimulationError,
    innovation::{innovation_phase, InnovationReport},
    ledger::{self, LedgerReport},
    lifecycle::{self, BirthReport},
    negotiation::{NegotiationReport, Negotiator},
    scenario::{apply_privacy_scenario, ScenarioReport},
    setup::{InitialStateGenerator, StandardSetup},
    state::MarketState,
    tracking::{SimTracker, SimulationOutput},
};

/// The main random stream. Every phase that draws takes it by `&mut`.
pub type SimRng = ChaCha8Rng;

#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: usize,
    pub scenario: Option<ScenarioReport>,
    pub births: BirthReport,
    pub deaths: Vec<usize>,
    pub negotiation: NegotiationReport,
    pub innovation: Option<InnovationReport>,
    pub choice: ChoiceReport,
    pub ledger: LedgerReport,
    pub ports: usize,
    pub bits_ported: usize,
}

/// Resolves `state.tick` and moves the state to the next tick. The
/// negotiator's buffers are reused from tick to tick.
pub fn advance_tick(
    state: &mut MarketState,
    negotiator: &mut Negotiator,
    rng: &mut SimRng,
    config: &SimulationConfig,
) -> Result<TickReport, SimulationError> {
    let tick = state.tick;
    if tick >= state.dims().n_ticks {
        return Err(SimulationError::invariant(
            tick,
            format!("run already covers all {} ticks", state.dims().n_ticks),
        ));
    }
    let mut report = TickReport {
        tick,
        ..TickReport::default()
    };

    if let Some(scenario) = config.scenario.as_ref().filter(|s| s.tick == tick) {
        report.scenario = Some(apply_privacy_scenario(
            state,
            scenario,
            config.data.data_worth_exp,
        )?);
    }

    if tick > 0 {
        report.births = lifecycle::birth_phase(state, config, rng);
        report.deaths = lifecycle::death_phase(state, config);
        state.check_dead_firms()?;
        state.check_self_pairs()?;
        report.negotiation = negotiator.negotiate(state, &config.openness, rng);
        report.innovation = Some(innovation_phase(state, config, rng));
    }

    report.choice = consumer_choice_phase(state, &config.utility_weights, rng);
    report.ledger = ledger::record_tick_usage(
        state,
        tick,
        config.data.data_worth_exp,
        config.usage.alpha_usage_decay,
    );

    let ports = ledger::pending_ports(state, config.port.n_port);
    report.ports = ports.len();
    if !ports.is_empty() {
        report.bits_ported = ledger::port(state, &ports, tick);
    }

    lifecycle::update_counters(state, config.capital.capital_cutoff);
    check_tick_end(state)?;

    debug!(
        target: "market_core::engine",
        tick,
        alive = state.n_alive(),
        used = report.choice.products_used,
        requests = report.negotiation.requests.len(),
        ported = report.bits_ported,
        "tick.completed"
    );
    state.tick += 1;
    Ok(report)
}

fn check_tick_end(state: &MarketState) -> Result<(), SimulationError> {
    let dims = state.dims();
    for consumer in 0..dims.n_consumers {
        for category in 0..dims.n_categories {
            let lane = state.usage.lane(&[consumer, category]);
            let picked = lane.iter().filter(|&&bit| bit == 1).count();
            if picked > 1 {
                return Err(SimulationError::invariant(
                    state.tick,
                    format!("consumer {consumer} used {picked} firms in category {category}"),
                ));
            }
            if let Some(firm) = lane
                .iter()
                .position(|&bit| bit == 1)
                .filter(|&firm| !state.has_product(firm, category) || state.privacy_mask[[consumer, firm]] == 0)
            {
                return Err(SimulationError::invariant(
                    state.tick,
                    format!("consumer {consumer} used unavailable product ({firm}, {category})"),
                ));
            }
        }
    }
    if let Some(firm) = (state.next_firm_slot..dims.n_firms).find(|&firm| state.alive[firm]) {
        return Err(SimulationError::invariant(
            state.tick,
            format!("firm {firm} is alive beyond the claimed slots"),
        ));
    }
    state.check_self_pairs()
}

/// A run in progress: state, main stream, reusable buffers and history.
#[derive(Debug)]
pub struct Simulation {
    config: Arc<SimulationConfig>,
    state: MarketState,
    rng: SimRng,
    negotiator: Negotiator,
    tracker: SimTracker,
}

impl Simulation {
    pub fn new(config: Arc<SimulationConfig>) -> Result<Self, SimulationError> {
        Self::with_generator(config, &StandardSetup)
    }

    pub fn with_generator<G: InitialStateGenerator + ?Sized>(
        config: Arc<SimulationConfig>,
        generator: &G,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        let mut rng = SimRng::seed_from_u64(config.seeds.overall_seed);
        let state = generator.generate(&config, &mut rng)?;
        state.validate(&config)?;
        let negotiator = Negotiator::new(state.dims());
        let tracker = SimTracker::new(&state);
        info!(
            target: "market_core::engine",
            ticks = config.general.n_ticks,
            consumers = config.general.n_consumers,
            firm_slots = state.dims().n_firms,
            datatypes = state.dims().n_datatypes,
            "simulation.started"
        );
        Ok(Self {
            config,
            state,
            rng,
            negotiator,
            tracker,
        })
    }

    pub fn state(&self) -> &MarketState {
        &self.state
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn is_finished(&self) -> bool {
        self.state.tick >= self.state.dims().n_ticks
    }

    /// Runs one tick. Returns `None` once every tick has been resolved.
    pub fn step(&mut self) -> Result<Option<TickReport>, SimulationError> {
        if self.is_finished() {
            return Ok(None);
        }
        let report = advance_tick(
            &mut self.state,
            &mut self.negotiator,
            &mut self.rng,
            &self.config,
        )?;
        self.tracker.record(&self.state, &report)?;
        Ok(Some(report))
    }

    /// Runs the remaining ticks and hands back the history.
    pub fn finish(mut self) -> Result<SimulationOutput, SimulationError> {
        while self.step()?.is_some() {}
        Ok(self.tracker.finish())
    }
}

pub fn run(config: Arc<SimulationConfig>) -> Result<SimulationOutput, SimulationError> {
    Simulation::new(config)?.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> Arc<SimulationConfig> {
        let mut config = SimulationConfig::default();
        config.general.n_ticks = 5;
        config.general.n_consumers = 8;
        config.general.n_init_firms = 3;
        config.general.n_init_big_firms = 1;
        config.categories.n_total_categories = 4;
        config.categories.n_init_categories = 2;
        Arc::new(config)
    }

    #[test]
    fn step_runs_every_tick_then_stops() {
        let mut sim = Simulation::new(tiny_config()).expect("setup");
        let mut ticks = Vec::new();
        while let Some(report) = sim.step().expect("tick") {
            ticks.push(report.tick);
        }
        assert_eq!(ticks, vec![0, 1, 2, 3, 4]);
        assert!(sim.is_finished());
        assert!(sim.step().expect("finished").is_none());
    }

    #[test]
    fn tick_zero_skips_firm_dynamics() {
        let mut sim = Simulation::new(tiny_config()).expect("setup");
        let report = sim.step().expect("tick").expect("tick 0");
        assert!(report.births.born.is_empty());
        assert!(report.deaths.is_empty());
        assert!(report.innovation.is_none());
        assert!(report.negotiation.requests.is_empty());
    }

    #[test]
    fn advancing_past_the_horizon_is_an_error() {
        let config = tiny_config();
        let mut rng = SimRng::seed_from_u64(1);
        let mut state = StandardSetup.generate(&config, &mut rng).expect("setup");
        state.tick = config.general.n_ticks;
        let mut negotiator = Negotiator::new(state.dims());
        let err = advance_tick(&mut state, &mut negotiator, &mut rng, &config)
            .expect_err("past horizon");
        assert!(matches!(err, SimulationError::InvariantViolation { .. }));
    }

    #[test]
    fn one_negotiator_drives_the_whole_run() {
        let config = tiny_config();
        let mut rng = SimRng::seed_from_u64(config.seeds.overall_seed);
        let mut state = StandardSetup.generate(&config, &mut rng).expect("setup");
        let mut negotiator = Negotiator::new(state.dims());
        for _ in 0..config.general.n_ticks {
            advance_tick(&mut state, &mut negotiator, &mut rng, &config).expect("tick");
        }

        let mut sim = Simulation::new(Arc::clone(&config)).expect("setup");
        while sim.step().expect("tick").is_some() {}
        assert_eq!(state.tick, sim.state().tick);
        assert_eq!(state.quality, sim.state().quality);
        assert_eq!(state.capital, sim.state().capital);
        assert_eq!(state.requestable, sim.state().requestable);
        assert_eq!(state.data_held, sim.state().data_held);
    }

    #[test]
    fn invalid_config_is_rejected_before_setup() {
        let mut config = SimulationConfig::default();
        config.port.n_port = 0;
        assert!(matches!(
            Simulation::new(Arc::new(config)),
            Err(SimulationError::Config(_))
        ));
    }

    #[test]
    fn runs_are_reproducible() {
        let a = run(tiny_config()).expect("run");
        let b = run(tiny_config()).expect("run");
        assert_eq!(a, b);
        assert_eq!(a.digest().expect("digest"), b.digest().expect("digest"));
    }
}
