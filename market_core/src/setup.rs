use rand::{seq::index::sample, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::{
    config::SimulationConfig,
    engine::SimRng,
    error::{ConfigError, SimulationError},
    needs::draw_category_mixture,
    state::{Dimensions, MarketState},
    tensor::Tensor,
};

/// Produces the tick-0 state. The engine validates whatever comes back, so
/// alternative generators only need to respect the shapes in `config`.
pub trait InitialStateGenerator {
    fn generate(
        &self,
        config: &SimulationConfig,
        rng: &mut SimRng,
    ) -> Result<MarketState, SimulationError>;
}

/// The default market: a few big incumbents, small firms spread over the
/// initial categories, and datatype footprints that widen for later
/// categories.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardSetup;

impl InitialStateGenerator for StandardSetup {
    fn generate(
        &self,
        config: &SimulationConfig,
        rng: &mut SimRng,
    ) -> Result<MarketState, SimulationError> {
        let general = &config.general;
        let n_firms = config.n_total_firms();
        let n_categories = config.categories.n_total_categories;
        let n_init_firms = general.n_init_firms;
        let n_big = general.n_init_big_firms;

        let mut privacy_rng = ChaCha8Rng::seed_from_u64(config.seeds.privacy_seed);
        let mut need_rng = ChaCha8Rng::seed_from_u64(config.seeds.need_seed);
        let mut data_rng = ChaCha8Rng::seed_from_u64(config.seeds.data_seed);

        let category_datatype = assign_datatypes(config, &mut data_rng);
        let dims = Dimensions {
            n_ticks: general.n_ticks,
            n_consumers: general.n_consumers,
            n_categories,
            n_firms,
            n_datatypes: category_datatype.shape()[1],
        };
        let mut state = MarketState::empty(dims);
        state.category_datatype = category_datatype;

        for firm in 0..n_init_firms {
            state.alive[firm] = true;
            state.capital[firm] = if firm < n_big {
                config.capital.big
            } else {
                config.capital.small
            };
            let category = firm % config.categories.n_init_categories;
            state.quality[[firm, category]] = if firm < n_big { 2.0 } else { 1.0 };
        }
        state.next_firm_slot = n_init_firms;

        let privacy = &config.privacy;
        state.privacy_score = clamped_normal(
            privacy.mean_firm_score,
            privacy.var_firm_score,
            n_firms,
            &mut privacy_rng,
        )?;
        state.privacy_concern = clamped_normal(
            privacy.mean_cons_concern,
            privacy.var_cons_concern,
            general.n_consumers,
            &mut privacy_rng,
        )?;
        state.wealth = (0..general.n_consumers)
            .map(|_| 1.0 + 9.0 * rng.gen::<f64>())
            .collect();
        state.investment_profile = vec![config.innovation.investment_profile.as_array(); n_firms];

        // the first categories are the ones the big firms sell in
        let n_high_need = n_big.min(n_categories);
        for category in 0..n_categories {
            let mixture = draw_category_mixture(&config.needs, category < n_high_need, &mut need_rng)?;
            for consumer in 0..general.n_consumers {
                state.need[[consumer, category]] = mixture.sample(&mut need_rng);
            }
        }

        state.data_combination_skill = draw_skills(config, n_firms, &mut data_rng);
        fill_requestable(&mut state, n_big, config.openness.cartel);

        for category in 0..n_categories {
            if state.category_is_live(category) {
                state.category_ever_alive[category] = true;
                state.category_ticks_alive[category] = 1;
            }
        }

        debug!(
            target: "market_core::setup",
            firms = n_firms,
            datatypes = dims.n_datatypes,
            "setup.generated"
        );
        Ok(state)
    }
}

fn clamped_normal<R: Rng + ?Sized>(
    mean: f64,
    std_dev: f64,
    count: usize,
    rng: &mut R,
) -> Result<Vec<f64>, SimulationError> {
    let normal = Normal::new(mean, std_dev)
        .map_err(|err| ConfigError::invalid("privacy", err.to_string()))?;
    Ok((0..count)
        .map(|_| normal.sample(rng).clamp(0.0, 1.0))
        .collect())
}

/// Category footprints over the datatype pool. Initial categories draw from
/// the initial pool; every `growth_factor` later categories widen both the
/// pool and the maximum footprint. Unused datatype columns are dropped.
fn assign_datatypes<R: Rng + ?Sized>(config: &SimulationConfig, rng: &mut R) -> Tensor<u8, 2> {
    let data = &config.data;
    let n_categories = config.categories.n_total_categories;
    let n_init_categories = config.categories.n_init_categories;
    let mut full: Tensor<u8, 2> = Tensor::zeros([n_categories, data.n_data_types_total]);

    let mut assign = |category: usize, max_types: usize, pool: usize, rng: &mut R| {
        let pool = pool.max(1);
        let count = (rng.gen_range(0..max_types.max(1)) + 1).min(pool);
        for datatype in sample(rng, pool, count) {
            full[[category, datatype]] = 1;
        }
    };

    for category in 0..n_init_categories {
        assign(
            category,
            data.n_data_types_init.min(3),
            data.n_data_types_init,
            &mut *rng,
        );
    }
    let growth = data.growth_factor.max(1);
    for (offset, category) in (n_init_categories..n_categories).enumerate() {
        let shift = offset / growth;
        assign(
            category,
            data.n_data_types_total.min(3 + shift),
            data.n_data_types_total
                .min(data.n_data_types_init + 3 * shift),
            &mut *rng,
        );
    }

    let used: Vec<usize> = (0..data.n_data_types_total)
        .filter(|&datatype| (0..n_categories).any(|category| full[[category, datatype]] == 1))
        .collect();
    let mut trimmed: Tensor<u8, 2> = Tensor::zeros([n_categories, used.len()]);
    for category in 0..n_categories {
        for (column, &datatype) in used.iter().enumerate() {
            trimmed[[category, column]] = full[[category, datatype]];
        }
    }
    trimmed
}

/// Skills come from the integer grid `[low, high)`.
fn draw_skills<R: Rng + ?Sized>(config: &SimulationConfig, n_firms: usize, rng: &mut R) -> Vec<f64> {
    let low = config.data.data_skill_range_low;
    let steps = (config.data.data_skill_range_high - low).ceil().max(1.0) as usize;
    (0..n_firms)
        .map(|_| low + rng.gen_range(0..steps) as f64)
        .collect()
}

/// Every cross-firm pair whose categories share a datatype starts
/// requestable. Under a cartel only the big incumbents trade.
fn fill_requestable(state: &mut MarketState, n_big: usize, cartel: bool) {
    let Dimensions {
        n_categories: k,
        n_firms: f,
        n_datatypes: d,
        ..
    } = state.dims();
    for from in 0..f {
        for to in 0..f {
            if from == to || (cartel && (from >= n_big || to >= n_big)) {
                continue;
            }
            for from_category in 0..k {
                for to_category in 0..k {
                    for datatype in 0..d {
                        if state.category_datatype[[from_category, datatype]] == 1
                            && state.category_datatype[[to_category, datatype]] == 1
                        {
                            state.requestable[[from, from_category, to, to_category, datatype]] = 1;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.general.n_ticks = 6;
        config.general.n_consumers = 12;
        config.general.n_init_firms = 4;
        config.general.n_init_big_firms = 1;
        config.categories.n_total_categories = 6;
        config.categories.n_init_categories = 3;
        config
    }

    #[test]
    fn standard_setup_produces_a_valid_state() {
        let config = small_config();
        let mut rng = SimRng::seed_from_u64(config.seeds.overall_seed);
        let state = StandardSetup.generate(&config, &mut rng).expect("setup");
        state.validate(&config).expect("valid state");

        assert_eq!(state.next_firm_slot, 4);
        assert_eq!(state.n_alive(), 4);
        assert_eq!(state.quality[[0, 0]], 2.0);
        assert_eq!(state.quality[[3, 0]], 1.0);
        assert_eq!(state.capital[0], config.capital.big);
        assert_eq!(state.capital[1], config.capital.small);
        assert_eq!(state.capital[4], 0.0);
        assert!(state.wealth.iter().all(|w| (1.0..10.0).contains(w)));
        assert!(state.privacy_score.iter().all(|s| (0.0..=1.0).contains(s)));
        assert_eq!(state.category_ticks_alive[..4], [1, 1, 1, 0]);
    }

    #[test]
    fn requestable_respects_shared_datatypes() {
        let config = small_config();
        let mut rng = SimRng::seed_from_u64(1);
        let state = StandardSetup.generate(&config, &mut rng).expect("setup");
        let Dimensions {
            n_categories: k,
            n_firms: f,
            n_datatypes: d,
            ..
        } = state.dims();
        for from in 0..f {
            for fc in 0..k {
                for to in 0..f {
                    for tc in 0..k {
                        for dt in 0..d {
                            let bit = state.requestable[[from, fc, to, tc, dt]];
                            let shared = state.category_datatype[[fc, dt]] == 1
                                && state.category_datatype[[tc, dt]] == 1;
                            assert_eq!(bit == 1, shared && from != to);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn cartel_limits_requests_to_big_firms() {
        let mut config = small_config();
        config.general.n_init_big_firms = 2;
        config.openness.cartel = true;
        let mut rng = SimRng::seed_from_u64(1);
        let state = StandardSetup.generate(&config, &mut rng).expect("setup");
        let f = state.dims().n_firms;
        for firm in 2..f {
            assert!(state.requestable.outer(firm).iter().all(|&b| b == 0));
        }
        assert!(state.requestable.outer(0).iter().any(|&b| b == 1));
    }

    #[test]
    fn setup_streams_are_independent_of_the_main_seed() {
        let config = small_config();
        let a = StandardSetup
            .generate(&config, &mut SimRng::seed_from_u64(1))
            .expect("setup");
        let b = StandardSetup
            .generate(&config, &mut SimRng::seed_from_u64(2))
            .expect("setup");
        assert_eq!(a.need, b.need);
        assert_eq!(a.category_datatype, b.category_datatype);
        assert_eq!(a.privacy_concern, b.privacy_concern);
        assert_ne!(a.wealth, b.wealth);
    }
}
