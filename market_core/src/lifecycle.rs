use rand::Rng;
use rand_distr::{Distribution, Poisson};
use tracing::debug;

use crate::{
    config::SimulationConfig,
    innovation::{choose_entry_category, newcomer_entry_weights},
    state::{Dimensions, MarketState},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BirthReport {
    pub born: Vec<usize>,
    /// Newborns that opened a category nobody had sold in before.
    pub new_category_entrants: usize,
}

/// Claims the next free firm slots for this tick's entrants. Some open a
/// never-seen category at quality 1; the rest join a live category.
pub fn birth_phase<R: Rng + ?Sized>(
    state: &mut MarketState,
    config: &SimulationConfig,
    rng: &mut R,
) -> BirthReport {
    let Dimensions {
        n_categories,
        n_firms,
        ..
    } = state.dims();
    let lambda = config.general.birth_lambda;
    let drawn = match Poisson::new(lambda) {
        Ok(poisson) => poisson.sample(rng) as usize,
        // a zero rate never produces entrants
        Err(_) => 0,
    };
    let n_new = drawn.min(n_firms - state.next_firm_slot);
    if n_new == 0 {
        return BirthReport::default();
    }

    let first = state.next_firm_slot;
    let born: Vec<usize> = (first..first + n_new).collect();
    for &firm in &born {
        state.alive[firm] = true;
        state.capital[firm] = config.capital.small;
        state.ticks_no_usage[firm] = 0;
        state.ticks_no_capital[firm] = 0;
    }
    state.next_firm_slot += n_new;

    let unclaimed: Vec<usize> = (0..n_categories)
        .filter(|&category| !state.category_ever_alive[category])
        .collect();
    let opening = (0..n_new)
        .filter(|_| rng.gen::<f64>() < config.innovation.new_firm_new_category_prob)
        .count()
        .min(unclaimed.len());
    for (&firm, &category) in born.iter().zip(&unclaimed).take(opening) {
        state.quality[[firm, category]] = 1.0;
    }

    let joining = n_new - opening;
    if joining > 0 {
        let weights = newcomer_entry_weights(state, &config.innovation, joining);
        let picks = choose_entry_category(state, &weights, config.innovation.qual_diff_param, rng);
        for (&firm, pick) in born[opening..].iter().zip(picks) {
            if let Some(pick) = pick {
                state.quality[[firm, pick.category]] = pick.quality;
            }
        }
    }
    state.refresh_ever_alive();

    debug!(
        target: "market_core::lifecycle",
        tick = state.tick,
        born = n_new,
        new_categories = opening,
        "firms.born"
    );
    BirthReport {
        born,
        new_category_entrants: opening,
    }
}

/// Retires alive firms that went unused or unfunded for too long, or that
/// no longer sell anything.
pub fn death_phase(state: &mut MarketState, config: &SimulationConfig) -> Vec<usize> {
    let general = &config.general;
    let dying: Vec<usize> = (0..state.dims().n_firms)
        .filter(|&firm| {
            state.alive[firm]
                && (state.ticks_no_usage[firm] > general.no_usage_ticks_before_death
                    || state.ticks_no_capital[firm] > general.no_money_ticks_before_death
                    || !state.holds_any_product(firm))
        })
        .collect();
    for &firm in &dying {
        state.retire_firm(firm);
    }
    if !dying.is_empty() {
        debug!(
            target: "market_core::lifecycle",
            tick = state.tick,
            firms = ?dying,
            "firms.died"
        );
    }
    dying
}

/// End-of-tick streaks of idle and underfunded ticks, for every slot.
pub fn update_counters(state: &mut MarketState, capital_cutoff: f64) {
    let Dimensions {
        n_consumers,
        n_categories,
        n_firms,
        ..
    } = state.dims();
    for firm in 0..n_firms {
        let used = (0..n_consumers)
            .any(|consumer| (0..n_categories).any(|category| state.usage[[consumer, category, firm]] == 1));
        if used {
            state.ticks_no_usage[firm] = 0;
        } else {
            state.ticks_no_usage[firm] += 1;
        }
        if state.capital[firm] < capital_cutoff {
            state.ticks_no_capital[firm] += 1;
        } else {
            state.ticks_no_capital[firm] = 0;
        }
    }
}
