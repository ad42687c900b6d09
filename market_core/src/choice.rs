use rand::Rng;
use rayon::prelude::*;

use crate::{
    config::UtilityWeights,
    sampling::choose_with_uniform,
    state::{Dimensions, MarketState},
    tensor::Tensor,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChoiceReport {
    pub categories_wanted: usize,
    pub products_used: usize,
}

/// Utility of `firm`'s product in `category` for `consumer`, whether or not
/// the product exists.
pub fn utility(
    state: &MarketState,
    weights: &UtilityWeights,
    consumer: usize,
    category: usize,
    firm: usize,
) -> f64 {
    let n_categories = state.dims().n_categories;
    let firm_usage_total: f64 = (0..n_categories)
        .map(|k| state.usage_counter[[consumer, k, firm]])
        .sum();
    utility_from_parts(
        weights,
        state.quality[[firm, category]],
        state.usage_counter[[consumer, category, firm]],
        firm_usage_total,
        state.privacy_concern[consumer],
        state.privacy_score[firm],
    )
}

#[inline]
fn utility_from_parts(
    weights: &UtilityWeights,
    quality: f64,
    category_loyalty: f64,
    firm_loyalty: f64,
    privacy_concern: f64,
    privacy_score: f64,
) -> f64 {
    weights.w_qual * quality + weights.w_loyal_category * category_loyalty
        + weights.w_loyal_firm * firm_loyalty
        - weights.w_priv * privacy_concern * (1.0 - privacy_score)
}

/// Logit weights `[consumer, category, firm]`, zero wherever the product does
/// not exist or the consumer has excluded the firm. Each row is shifted by
/// its maximum before exponentiation, which leaves the implied probabilities
/// unchanged.
pub fn choice_weights(state: &MarketState, weights: &UtilityWeights) -> Tensor<f64, 3> {
    let Dimensions {
        n_consumers,
        n_categories,
        n_firms,
        ..
    } = state.dims();
    let mut out: Tensor<f64, 3> = Tensor::zeros([n_consumers, n_categories, n_firms]);
    let block = n_categories * n_firms;
    if block == 0 {
        return out;
    }

    out.as_mut_slice()
        .par_chunks_mut(block)
        .enumerate()
        .for_each(|(consumer, rows)| {
            let counters = state.usage_counter.outer(consumer);
            let mut firm_loyalty = vec![0.0; n_firms];
            for category in 0..n_categories {
                for firm in 0..n_firms {
                    firm_loyalty[firm] += counters[category * n_firms + firm];
                }
            }
            let mask = state.privacy_mask.lane(&[consumer]);

            for (category, row) in rows.chunks_mut(n_firms).enumerate() {
                let mut row_max = f64::NEG_INFINITY;
                for firm in 0..n_firms {
                    let quality = state.quality[[firm, category]];
                    if quality <= 0.0 || mask[firm] == 0 {
                        row[firm] = f64::NEG_INFINITY;
                        continue;
                    }
                    let u = utility_from_parts(
                        weights,
                        quality,
                        counters[category * n_firms + firm],
                        firm_loyalty[firm],
                        state.privacy_concern[consumer],
                        state.privacy_score[firm],
                    );
                    let scaled = weights.w_logit * u;
                    row[firm] = scaled;
                    row_max = row_max.max(scaled);
                }
                for value in row.iter_mut() {
                    *value = if value.is_finite() && row_max.is_finite() {
                        (*value - row_max).exp()
                    } else {
                        0.0
                    };
                }
            }
        });
    out
}

/// Bernoulli need draw per `(consumer, category)`, restricted to categories
/// with at least one product on the market. Draws are consumer-major.
pub fn draw_wanted_categories<R: Rng + ?Sized>(
    state: &MarketState,
    rng: &mut R,
) -> Tensor<u8, 2> {
    let Dimensions {
        n_consumers,
        n_categories,
        ..
    } = state.dims();
    let live = state.live_categories();
    let mut wanted: Tensor<u8, 2> = Tensor::zeros([n_consumers, n_categories]);
    for consumer in 0..n_consumers {
        for category in 0..n_categories {
            let u: f64 = rng.gen();
            if state.need[[consumer, category]] > u && live[category] {
                wanted[[consumer, category]] = 1;
            }
        }
    }
    wanted
}

/// One categorical draw per `(consumer, category)` over the logit weights.
/// A row without weight yields no choice.
pub fn choose_firms<R: Rng + ?Sized>(weights: &Tensor<f64, 3>, rng: &mut R) -> Tensor<u8, 3> {
    let shape = weights.shape();
    let mut choice: Tensor<u8, 3> = Tensor::zeros(shape);
    for consumer in 0..shape[0] {
        for category in 0..shape[1] {
            let u: f64 = rng.gen();
            if let Some(firm) = choose_with_uniform(weights.lane(&[consumer, category]), u) {
                choice[[consumer, category, firm]] = 1;
            }
        }
    }
    choice
}

/// Resolves this tick's usage into `state.usage`: need draws, then firm
/// choice, masked by need.
pub fn consumer_choice_phase<R: Rng + ?Sized>(
    state: &mut MarketState,
    weights: &UtilityWeights,
    rng: &mut R,
) -> ChoiceReport {
    let wanted = draw_wanted_categories(state, rng);
    let logits = choice_weights(state, weights);
    let choice = choose_firms(&logits, rng);

    let Dimensions {
        n_consumers,
        n_categories,
        ..
    } = state.dims();
    let mut report = ChoiceReport::default();
    for consumer in 0..n_consumers {
        for category in 0..n_categories {
            let wants = wanted[[consumer, category]] == 1;
            if wants {
                report.categories_wanted += 1;
            }
            let lane = state.usage.lane_mut(&[consumer, category]);
            let chosen = choice.lane(&[consumer, category]);
            for (slot, &picked) in lane.iter_mut().zip(chosen) {
                *slot = if wants { picked } else { 0 };
            }
            if wants && chosen.iter().any(|&picked| picked == 1) {
                report.products_used += 1;
            }
        }
    }
    report
}
