use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use tracing::info;

use crate::{
    config::ScenarioConfig,
    error::{ConfigError, SimulationError},
    ledger,
    state::MarketState,
    tensor::Tensor,
};

/// Privacy score a scandal can never push a firm below.
pub const PRIVACY_SCORE_FLOOR: f64 = 0.05;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioReport {
    pub shocked_firms: Vec<usize>,
    pub deletions: usize,
}

/// The `count` firms with the most capital, in ascending capital order.
/// Ties keep slot order.
pub fn top_firms_by_capital(capital: &[f64], count: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..capital.len()).collect();
    order.sort_by(|&a, &b| capital[a].total_cmp(&capital[b]));
    let skip = order.len().saturating_sub(count);
    order.split_off(skip)
}

/// The best-capitalised firms suffer a privacy scandal, every consumer grows
/// more concerned, and some consumers delete their data and leave the firm
/// for good.
pub fn apply_privacy_scenario(
    state: &mut MarketState,
    scenario: &ScenarioConfig,
    data_worth_exp: f64,
) -> Result<ScenarioReport, SimulationError> {
    let mut rng = ChaCha8Rng::seed_from_u64(scenario.seed);
    let tick = state.tick;
    let n_consumers = state.dims().n_consumers;
    let n_firms = state.dims().n_firms;

    let shocked_firms = top_firms_by_capital(&state.capital, scenario.affected_firm_count);
    for &firm in &shocked_firms {
        state.privacy_score[firm] =
            (state.privacy_score[firm] - scenario.firm_hit).max(PRIVACY_SCORE_FLOOR);
    }

    let hit = Normal::new(scenario.consumer_hit_mean, scenario.consumer_hit_var)
        .map_err(|err| ConfigError::invalid("scenario.consumer_hit_var", err.to_string()))?;
    for concern in state.privacy_concern.iter_mut() {
        *concern += hit.sample(&mut rng);
    }

    let mut deleters: Tensor<u8, 2> = Tensor::zeros([n_consumers, n_firms]);
    let mut deletions = 0;
    for consumer in 0..n_consumers {
        for &firm in &shocked_firms {
            let u: f64 = rng.gen();
            if u < state.privacy_concern[consumer] {
                deleters[[consumer, firm]] = 1;
                deletions += 1;
            }
        }
    }
    ledger::delete(state, &deleters, tick, data_worth_exp);
    // a stale streak would port history back into the firm the consumer left
    for consumer in 0..n_consumers {
        for &firm in &shocked_firms {
            if deleters[[consumer, firm]] == 1 {
                for category in 0..state.dims().n_categories {
                    state.uninterrupted_usage[[consumer, category, firm]] = 0;
                }
            }
        }
    }
    for (mask, &deleter) in state
        .privacy_mask
        .as_mut_slice()
        .iter_mut()
        .zip(deleters.as_slice())
    {
        *mask *= 1 - deleter;
    }

    info!(
        target: "market_core::scenario",
        tick,
        firms = ?shocked_firms,
        deletions,
        "scenario.applied"
    );
    Ok(ScenarioReport {
        shocked_firms,
        deletions,
    })
}
