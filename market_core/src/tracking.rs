use serde::Serialize;
use tracing::info;

use crate::{
    engine::TickReport,
    error::SimulationError,
    hashing::fnv1a,
    state::{Dimensions, MarketState},
    tensor::Tensor,
};

/// Everything a run leaves behind. Shapes use `T` ticks, `F` firm slots,
/// `K` categories and `C` consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationOutput {
    /// `[T, F, K]`
    pub quality: Tensor<f64, 3>,
    /// `[T, F]`
    pub capital: Tensor<f64, 2>,
    /// Consumers served, `[T, F, K]`.
    pub usage: Tensor<u32, 3>,
    /// `[T, F]`
    pub live_firms: Tensor<u8, 2>,
    pub new_firms: Vec<u32>,
    pub dead_firms: Vec<u32>,
    /// One-hot investment option, `[T, F, 3]`.
    pub investment_choices: Tensor<u8, 3>,
    /// `[T, F]`
    pub investment_success: Tensor<u8, 2>,
    /// `[T, F]`
    pub success_probability: Tensor<f64, 2>,
    /// `[T, F]`
    pub requests_granted: Tensor<u32, 2>,
    pub requests_made: Vec<u32>,
    /// `[T, C]`
    pub privacy_concern: Tensor<f64, 2>,
    /// `[T, F]`
    pub privacy_score: Tensor<f64, 2>,
    pub new_products_new_category: Vec<u32>,
    pub new_products_existing_category: Vec<u32>,
    /// Products launched per category over the run, initial ones included.
    pub category_entries: Vec<u32>,
    pub category_exits: Vec<u32>,
    /// Tick a slot first sold a product; `None` if it never did.
    pub firm_start_tick: Vec<Option<usize>>,
    /// `[C, K]`
    pub need: Tensor<f64, 2>,
}

impl SimulationOutput {
    pub fn encode(&self) -> Result<Vec<u8>, SimulationError> {
        Ok(bincode::serialize(self)?)
    }

    /// FNV-1a over the bincode encoding.
    pub fn digest(&self) -> Result<u64, SimulationError> {
        Ok(fnv1a(&self.encode()?))
    }

    pub fn n_ticks(&self) -> usize {
        self.new_firms.len()
    }
}

/// Collects [`SimulationOutput`] one tick at a time.
#[derive(Debug, Clone)]
pub struct SimTracker {
    output: SimulationOutput,
    previous_quality: Tensor<f64, 2>,
    previous_alive: usize,
}

impl SimTracker {
    pub fn new(state: &MarketState) -> Self {
        let Dimensions {
            n_ticks: t,
            n_consumers: c,
            n_categories: k,
            n_firms: f,
            ..
        } = state.dims();
        let category_entries = (0..k)
            .map(|category| {
                (0..f)
                    .filter(|&firm| state.has_product(firm, category))
                    .count() as u32
            })
            .collect();
        let firm_start_tick = (0..f)
            .map(|firm| state.holds_any_product(firm).then_some(0))
            .collect();
        Self {
            output: SimulationOutput {
                quality: Tensor::zeros([t, f, k]),
                capital: Tensor::zeros([t, f]),
                usage: Tensor::zeros([t, f, k]),
                live_firms: Tensor::zeros([t, f]),
                new_firms: vec![0; t],
                dead_firms: vec![0; t],
                investment_choices: Tensor::zeros([t, f, 3]),
                investment_success: Tensor::zeros([t, f]),
                success_probability: Tensor::zeros([t, f]),
                requests_granted: Tensor::zeros([t, f]),
                requests_made: vec![0; t],
                privacy_concern: Tensor::zeros([t, c]),
                privacy_score: Tensor::zeros([t, f]),
                new_products_new_category: vec![0; t],
                new_products_existing_category: vec![0; t],
                category_entries,
                category_exits: vec![0; k],
                firm_start_tick,
                need: state.need.clone(),
            },
            previous_quality: state.quality.clone(),
            previous_alive: state.n_alive(),
        }
    }

    /// Records the state at the end of `report.tick`. The live-firm count must
    /// reconcile with the births and deaths the tick reported.
    pub fn record(&mut self, state: &MarketState, report: &TickReport) -> Result<(), SimulationError> {
        let tick = report.tick;
        let Dimensions {
            n_consumers,
            n_categories,
            n_firms,
            ..
        } = state.dims();
        let out = &mut self.output;

        out.quality.outer_mut(tick).copy_from_slice(state.quality.as_slice());
        out.capital.outer_mut(tick).copy_from_slice(&state.capital);
        out.privacy_concern
            .outer_mut(tick)
            .copy_from_slice(&state.privacy_concern);
        out.privacy_score
            .outer_mut(tick)
            .copy_from_slice(&state.privacy_score);
        for (slot, &alive) in out.live_firms.outer_mut(tick).iter_mut().zip(&state.alive) {
            *slot = u8::from(alive);
        }
        for consumer in 0..n_consumers {
            for category in 0..n_categories {
                for firm in 0..n_firms {
                    if state.usage[[consumer, category, firm]] == 1 {
                        out.usage[[tick, firm, category]] += 1;
                    }
                }
            }
        }

        if tick == 0 {
            self.previous_alive = state.n_alive();
            self.previous_quality = state.quality.clone();
            return Ok(());
        }

        let born = report.births.born.len();
        let died = report.deaths.len();
        let alive = state.n_alive();
        if alive + died != self.previous_alive + born {
            return Err(SimulationError::invariant(
                tick,
                format!(
                    "{alive} live firms after {} live, {born} born and {died} dead",
                    self.previous_alive
                ),
            ));
        }
        out.new_firms[tick] = born as u32;
        out.dead_firms[tick] = died as u32;

        if let Some(innovation) = &report.innovation {
            for firm in 0..n_firms {
                if let Some(option) = innovation.choices[firm] {
                    out.investment_choices[[tick, firm, option]] = 1;
                }
                out.investment_success[[tick, firm]] = u8::from(innovation.success[firm]);
                out.success_probability[[tick, firm]] = innovation.success_probability[firm];
            }
        }
        out.requests_made[tick] = report.negotiation.requests.len() as u32;
        for (slot, &granted) in out
            .requests_granted
            .outer_mut(tick)
            .iter_mut()
            .zip(&report.negotiation.grants_per_requester)
        {
            *slot = granted;
        }

        let previous = &self.previous_quality;
        let was_live: Vec<bool> = (0..n_categories)
            .map(|category| (0..n_firms).any(|firm| previous[[firm, category]] > 0.0))
            .collect();
        for firm in 0..n_firms {
            let mut launched = false;
            for category in 0..n_categories {
                let before = previous[[firm, category]] > 0.0;
                let now = state.has_product(firm, category);
                match (before, now) {
                    (false, true) => {
                        launched = true;
                        out.category_entries[category] += 1;
                        if was_live[category] {
                            out.new_products_existing_category[tick] += 1;
                        } else {
                            out.new_products_new_category[tick] += 1;
                        }
                    }
                    (true, false) => out.category_exits[category] += 1,
                    _ => {}
                }
            }
            if launched && out.firm_start_tick[firm].is_none() {
                out.firm_start_tick[firm] = Some(tick);
            }
        }

        self.previous_quality = state.quality.clone();
        self.previous_alive = alive;
        Ok(())
    }

    pub fn finish(self) -> SimulationOutput {
        let output = self.output;
        info!(
            target: "market_core::tracking",
            ticks = output.n_ticks(),
            firms_started = output.firm_start_tick.iter().filter(|s| s.is_some()).count(),
            "simulation.finished"
        );
        output
    }
}
