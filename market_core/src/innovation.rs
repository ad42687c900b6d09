use rand::Rng;

use crate::{
    config::{InnovationConfig, SimulationConfig},
    sampling::{choose_with_uniform, median, min_max_scale, range_scale},
    state::{
        Dimensions, MarketState, INVEST_EXISTING_PRODUCT, INVEST_NEW_CATEGORY,
        INVEST_NEW_PRODUCT,
    },
};

/// Position on the quality curve for cumulative investment `x`.
#[inline]
pub fn quality_curve(x: f64, alpha: f64) -> f64 {
    (x / alpha).sqrt()
}

#[inline]
pub fn quality_curve_inverse(quality: f64, alpha: f64) -> f64 {
    alpha * quality * quality
}

/// Quality gained by moving `investment` further along the curve. Never
/// negative for a non-negative investment.
pub fn quality_growth(quality: f64, investment: f64, alpha: f64) -> f64 {
    quality_curve(quality_curve_inverse(quality, alpha) + investment, alpha) - quality
}

/// Saturating map from invested amount to `[low, high)`.
pub fn investment_success_probability(x: f64, low: f64, high: f64, alpha: f64) -> f64 {
    low + (high - low) * (1.0 - (-alpha * x).exp())
}

/// Total data value, boosted by the firm's skill when more than one
/// datatype contributes.
pub fn data_combination_bonus(base: &[f64], skill: f64) -> f64 {
    let total: f64 = base.iter().sum();
    let contributing = base.iter().filter(|&&value| value > 0.0).count();
    if contributing > 1 {
        total * (1.0 + skill)
    } else {
        total
    }
}

/// Which kind of category an incumbent wants to enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPreference {
    /// A category already on the market that the firm is not in yet.
    ExistingCategory,
    /// A category nobody currently offers.
    NewCategory,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryCandidate {
    pub category: usize,
    pub quality: f64,
}

/// Mean usage per live tick, min-max scaled across categories. Categories
/// that never existed borrow the median of the live ones.
pub fn mean_usage_per_tick(state: &MarketState) -> Vec<f64> {
    let raw: Vec<f64> = state
        .category_total_usage
        .iter()
        .zip(&state.category_ticks_alive)
        .map(|(&total, &ticks)| total / f64::from(ticks.max(1)))
        .collect();
    let mut scaled = min_max_scale(&raw);
    let live = state.live_categories();
    let live_values: Vec<f64> = scaled
        .iter()
        .zip(&live)
        .filter(|(_, &is_live)| is_live)
        .map(|(&value, _)| value)
        .collect();
    let fill = median(&live_values).unwrap_or(0.0);
    for (value, &ticks) in scaled.iter_mut().zip(&state.category_ticks_alive) {
        if ticks == 0 {
            *value = fill;
        }
    }
    scaled
}

/// Entry weights for incumbents, one row per firm. Firms without a
/// preference get an empty row.
pub fn incumbent_entry_weights(
    state: &MarketState,
    config: &InnovationConfig,
    preferences: &[Option<EntryPreference>],
) -> Vec<Vec<f64>> {
    let Dimensions {
        n_categories,
        n_datatypes,
        ..
    } = state.dims();
    let mean_usage = mean_usage_per_tick(state);
    let live = state.live_categories();

    preferences
        .iter()
        .enumerate()
        .map(|(firm, preference)| {
            let Some(preference) = preference else {
                return Vec::new();
            };
            let mut footprint = vec![0.0; n_datatypes];
            for category in 0..n_categories {
                let quality = state.quality[[firm, category]];
                for (datatype, slot) in footprint.iter_mut().enumerate() {
                    *slot += quality * f64::from(state.category_datatype[[category, datatype]]);
                }
            }
            let mut affinity: Vec<f64> = (0..n_categories)
                .map(|category| {
                    footprint
                        .iter()
                        .enumerate()
                        .map(|(datatype, &held)| {
                            held * f64::from(state.category_datatype[[category, datatype]])
                        })
                        .sum()
                })
                .collect();
            range_scale(&mut affinity);

            (0..n_categories)
                .map(|category| {
                    let admissible = !state.has_product(firm, category)
                        && match preference {
                            EntryPreference::ExistingCategory => live[category],
                            EntryPreference::NewCategory => !live[category],
                        };
                    if admissible {
                        (config.w_datatype * affinity[category]
                            + config.w_mean_usage * mean_usage[category])
                            .exp()
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect()
}

/// Entry weights for `n` newborn firms joining a category already on the
/// market.
pub fn newcomer_entry_weights(
    state: &MarketState,
    config: &InnovationConfig,
    n: usize,
) -> Vec<Vec<f64>> {
    let mean_usage = mean_usage_per_tick(state);
    let row: Vec<f64> = state
        .live_categories()
        .iter()
        .zip(&mean_usage)
        .map(|(&live, &usage)| {
            if live {
                (config.w_mean_usage * usage).exp()
            } else {
                0.0
            }
        })
        .collect();
    vec![row; n]
}

/// One category draw per row, then one quality-gap draw per row. The entry
/// quality trails the category leader by up to `qual_diff_param`, but is at
/// least 1.
pub fn choose_entry_category<R: Rng + ?Sized>(
    state: &MarketState,
    weights: &[Vec<f64>],
    qual_diff_param: f64,
    rng: &mut R,
) -> Vec<Option<EntryCandidate>> {
    let categories: Vec<Option<usize>> = weights
        .iter()
        .map(|row| {
            let u: f64 = rng.gen();
            choose_with_uniform(row, u)
        })
        .collect();
    categories
        .into_iter()
        .map(|category| {
            let gap: f64 = rng.gen();
            category.map(|category| {
                let leader = state
                    .quality
                    .as_slice()
                    .iter()
                    .skip(category)
                    .step_by(state.dims().n_categories)
                    .fold(0.0_f64, |acc, &q| acc.max(q));
                EntryCandidate {
                    category,
                    quality: (leader - gap * qual_diff_param).max(1.0),
                }
            })
        })
        .collect()
}

/// Weights over a firm's own products for improvement: crowded categories
/// and heavily used ones are scored against each other.
pub fn invest_utility_existing(state: &MarketState, config: &InnovationConfig) -> Vec<Vec<f64>> {
    let Dimensions {
        n_categories,
        n_firms,
        ..
    } = state.dims();
    let firms_per_category: Vec<f64> = (0..n_categories)
        .map(|category| {
            (0..n_firms)
                .filter(|&firm| state.has_product(firm, category))
                .count() as f64
        })
        .collect();
    let crowding = min_max_scale(&firms_per_category);

    (0..n_firms)
        .map(|firm| {
            let mut boost: Vec<f64> = (0..n_categories)
                .map(|category| {
                    if state.has_product(firm, category) {
                        state.category_total_usage[category]
                    } else {
                        0.0
                    }
                })
                .collect();
            range_scale(&mut boost);
            (0..n_categories)
                .map(|category| {
                    if state.has_product(firm, category) {
                        (config.w_num_firms_per_cat * crowding[category]
                            + config.w_usage * boost[category])
                            .exp()
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect()
}

/// The firm's profile adjusted to what is still possible this tick. The
/// stored profile is left as configured.
pub fn effective_profile(
    state: &MarketState,
    firm: usize,
    all_categories_seen: bool,
) -> [f64; 3] {
    let mut profile = state.investment_profile[firm];
    let holds_every_seen_category = state
        .category_ever_alive
        .iter()
        .enumerate()
        .filter(|(_, &seen)| seen)
        .all(|(category, _)| state.has_product(firm, category));
    if holds_every_seen_category {
        profile[INVEST_NEW_PRODUCT] = 0.0;
        profile[INVEST_NEW_CATEGORY] = 1.0 - profile[INVEST_EXISTING_PRODUCT];
    }
    if all_categories_seen {
        profile[INVEST_NEW_CATEGORY] = 0.0;
    }
    let total: f64 = profile.iter().sum();
    if total > 0.0 {
        profile.iter_mut().for_each(|p| *p /= total);
    }
    profile
}

/// Data value a firm can put behind a product in `category`: its holdings of
/// every datatype the category uses, across all its products and consumers.
pub fn invested_data_value(state: &MarketState, firm: usize, category: usize) -> f64 {
    let Dimensions {
        n_consumers,
        n_categories,
        n_datatypes,
        ..
    } = state.dims();
    let base: Vec<f64> = (0..n_datatypes)
        .map(|datatype| {
            if state.category_datatype[[category, datatype]] == 0 {
                return 0.0;
            }
            let mut total = 0.0;
            for consumer in 0..n_consumers {
                for held_category in 0..n_categories {
                    total += state.data_value[[consumer, held_category, firm, datatype]];
                }
            }
            total
        })
        .collect();
    data_combination_bonus(&base, state.data_combination_skill[firm])
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InnovationReport {
    /// Chosen option per firm; `None` for dead firms or empty profiles.
    pub choices: Vec<Option<usize>>,
    /// New product realised this tick.
    pub success: Vec<bool>,
    /// Probability of realising the new product, for firms that tried.
    pub success_probability: Vec<f64>,
    pub capital_invested: Vec<f64>,
    pub improved_products: usize,
    pub new_products: usize,
}

/// Investment for `tick > 0`. Draw order: option per firm, product to
/// improve per firm, entry category and gap per firm, success per firm.
pub fn innovation_phase<R: Rng + ?Sized>(
    state: &mut MarketState,
    config: &SimulationConfig,
    rng: &mut R,
) -> InnovationReport {
    let innovation = &config.innovation;
    let Dimensions {
        n_categories,
        n_firms,
        ..
    } = state.dims();

    let capital_invested: Vec<f64> = state
        .capital
        .iter()
        .zip(&state.alive)
        .map(|(&capital, &alive)| {
            if alive {
                capital.clamp(0.0, innovation.invest_cap.max(0.0))
            } else {
                0.0
            }
        })
        .collect();
    for (capital, invested) in state.capital.iter_mut().zip(&capital_invested) {
        *capital -= invested;
    }

    let all_categories_seen = state.category_ever_alive.iter().all(|&seen| seen);
    let choices: Vec<Option<usize>> = (0..n_firms)
        .map(|firm| {
            let profile = effective_profile(state, firm, all_categories_seen);
            let u: f64 = rng.gen();
            choose_with_uniform(&profile, u).filter(|_| state.alive[firm])
        })
        .collect();

    // improve an existing product
    let product_weights = invest_utility_existing(state, innovation);
    let mut improved_products = 0;
    for firm in 0..n_firms {
        let u: f64 = rng.gen();
        let Some(category) = choose_with_uniform(&product_weights[firm], u) else {
            continue;
        };
        if choices[firm] != Some(INVEST_EXISTING_PRODUCT) {
            continue;
        }
        let value = invested_data_value(state, firm, category);
        let investment = investment_success_probability(
            capital_invested[firm] * value,
            0.0,
            1.0,
            innovation.new_product_scaler_alpha,
        );
        let quality = state.quality[[firm, category]];
        state.quality[[firm, category]] += quality_growth(quality, investment, innovation.alpha_f);
        improved_products += 1;
    }

    // develop a product in a category the firm is not in yet
    let preferences: Vec<Option<EntryPreference>> = choices
        .iter()
        .map(|choice| match choice {
            Some(INVEST_NEW_PRODUCT) => Some(EntryPreference::ExistingCategory),
            Some(INVEST_NEW_CATEGORY) => Some(EntryPreference::NewCategory),
            _ => None,
        })
        .collect();
    let entry_weights = incumbent_entry_weights(state, innovation, &preferences);
    let candidates = choose_entry_category(state, &entry_weights, innovation.qual_diff_param, rng);

    let mut success = vec![false; n_firms];
    let mut success_probability = vec![0.0; n_firms];
    let mut new_products = 0;
    for firm in 0..n_firms {
        let u: f64 = rng.gen();
        let Some(candidate) = candidates[firm] else {
            continue;
        };
        debug_assert!(candidate.category < n_categories);
        let value = invested_data_value(state, firm, candidate.category);
        let probability = investment_success_probability(
            capital_invested[firm] * value,
            innovation.success_invest_low,
            innovation.success_invest_high,
            innovation.new_product_scaler_alpha,
        );
        success_probability[firm] = probability;
        if u < probability && state.alive[firm] {
            state.quality[[firm, candidate.category]] += candidate.quality;
            success[firm] = true;
            new_products += 1;
        }
    }
    state.refresh_ever_alive();

    InnovationReport {
        choices,
        success,
        success_probability,
        capital_invested,
        improved_products,
        new_products,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::tiny_dims;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn quality_growth_is_monotone_and_non_negative() {
        let alpha = 10.0;
        assert!((quality_growth(1.0, 0.0, alpha)).abs() < 1e-12);
        let small = quality_growth(1.0, 0.5, alpha);
        let large = quality_growth(1.0, 5.0, alpha);
        assert!(small > 0.0 && large > small);
        // F(F^-1(2) + 30) = sqrt((40 + 30) / 10)
        assert!((quality_growth(2.0, 30.0, alpha) - (7.0f64.sqrt() - 2.0)).abs() < 1e-12);
    }

    #[test]
    fn success_probability_saturates_between_bounds() {
        assert_eq!(investment_success_probability(0.0, 0.05, 0.5, 1e-4), 0.05);
        let p = investment_success_probability(1e9, 0.05, 0.5, 1e-4);
        assert!((p - 0.5).abs() < 1e-9);
        let mid = investment_success_probability(1e4, 0.0, 1.0, 1e-4);
        assert!((mid - (1.0 - (-1.0f64).exp())).abs() < 1e-12);
    }

    #[test]
    fn combination_bonus_needs_two_datatypes() {
        assert_eq!(data_combination_bonus(&[2.0, 0.0], 2.0), 2.0);
        assert_eq!(data_combination_bonus(&[2.0, 1.0], 2.0), 9.0);
        assert_eq!(data_combination_bonus(&[], 2.0), 0.0);
    }

    fn market() -> MarketState {
        let mut state = MarketState::empty(tiny_dims());
        state.alive = vec![true, true, false];
        state.next_firm_slot = 2;
        state.quality[[0, 0]] = 3.0;
        state.quality[[1, 0]] = 1.0;
        state.category_datatype[[0, 0]] = 1;
        state.category_datatype[[1, 1]] = 1;
        state.category_ticks_alive = vec![2, 0];
        state.category_total_usage = vec![4.0, 0.0];
        state.category_ever_alive = vec![true, false];
        state
    }

    #[test]
    fn never_alive_categories_borrow_the_live_median() {
        let state = market();
        assert_eq!(mean_usage_per_tick(&state), vec![1.0, 1.0]);
    }

    #[test]
    fn incumbents_never_target_their_own_products() {
        let state = market();
        let weights = incumbent_entry_weights(
            &state,
            &InnovationConfig::default(),
            &[
                Some(EntryPreference::ExistingCategory),
                Some(EntryPreference::NewCategory),
                None,
            ],
        );
        // firm 0 already sells the only live category
        assert!(weights[0].iter().all(|&w| w == 0.0));
        assert_eq!(weights[1][0], 0.0);
        assert!(weights[1][1] > 0.0);
        assert!(weights[2].is_empty());
    }

    #[test]
    fn entry_quality_trails_the_leader() {
        let state = market();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let weights = newcomer_entry_weights(&state, &InnovationConfig::default(), 3);
        let picks = choose_entry_category(&state, &weights, 1.0, &mut rng);
        for pick in picks {
            let pick = pick.expect("live category exists");
            assert_eq!(pick.category, 0);
            assert!(pick.quality >= 2.0 && pick.quality <= 3.0);
        }

        let empty = choose_entry_category(&state, &[vec![0.0, 0.0]], 1.0, &mut rng);
        assert_eq!(empty, vec![None]);
    }

    #[test]
    fn profile_drops_impossible_options() {
        let mut state = market();
        state.investment_profile = vec![[0.6, 0.3, 0.1]; 3];
        // firm 0 holds every category seen so far
        let profile = effective_profile(&state, 0, false);
        assert!((profile[0] - 0.6).abs() < 1e-12);
        assert_eq!(profile[1], 0.0);
        assert!((profile[2] - 0.4).abs() < 1e-12);

        let exhausted = effective_profile(&state, 0, true);
        assert_eq!(exhausted, [1.0, 0.0, 0.0]);
        // stored profile is untouched
        assert_eq!(state.investment_profile[0], [0.6, 0.3, 0.1]);
    }

    #[test]
    fn improving_a_product_spends_capital_and_raises_quality() {
        let mut state = market();
        state.investment_profile = vec![[1.0, 0.0, 0.0]; 3];
        state.capital = vec![200.0, 10.0, 0.0];
        state.data_value[[0, 0, 0, 0]] = 5.0;
        let mut config = SimulationConfig::default();
        config.innovation.invest_cap = 50.0;
        let mut rng = ChaCha8Rng::seed_from_u64(9);

        let report = innovation_phase(&mut state, &config, &mut rng);

        assert_eq!(report.choices, vec![Some(0), Some(0), None]);
        assert_eq!(report.capital_invested, vec![50.0, 10.0, 0.0]);
        assert_eq!(state.capital, vec![150.0, 0.0, 0.0]);
        assert!(state.quality[[0, 0]] > 3.0);
        // no data, no investment, no growth
        assert_eq!(state.quality[[1, 0]], 1.0);
        assert_eq!(report.improved_products, 2);
        assert_eq!(report.new_products, 0);
    }
}
