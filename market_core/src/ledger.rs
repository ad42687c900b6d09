use rayon::prelude::*;

use crate::{
    state::{Dimensions, MarketState},
    tensor::Tensor,
};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LedgerReport {
    pub revenue: f64,
    pub bits_recorded: usize,
}

/// A consumer porting their history into the product they keep using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRequest {
    pub consumer: usize,
    pub category: usize,
    pub firm: usize,
}

/// Each consumer's wealth is split evenly over the products they used this
/// tick and credited to the firms behind them.
pub fn pay_firms(state: &mut MarketState) -> f64 {
    let Dimensions {
        n_consumers,
        n_categories,
        n_firms,
        ..
    } = state.dims();
    let mut revenue = 0.0;
    for consumer in 0..n_consumers {
        let used = state.usage.outer(consumer);
        let n_products = used.iter().filter(|&&bit| bit == 1).count().max(1);
        let share = state.wealth[consumer] / n_products as f64;
        for category in 0..n_categories {
            for firm in 0..n_firms {
                if used[category * n_firms + firm] == 1 {
                    state.capital[firm] += share;
                    revenue += share;
                }
            }
        }
    }
    revenue
}

/// Multiplies every data value by `exp(-rate)`.
pub fn decay_value(state: &mut MarketState, rate: f64) {
    let factor = (-rate).exp();
    state
        .data_value
        .as_mut_slice()
        .par_iter_mut()
        .for_each(|value| *value *= factor);
}

/// Records this tick's usage: every used product collects one unit of each
/// datatype its category generates.
pub fn apply_usage(state: &mut MarketState, tick: usize) -> usize {
    let Dimensions {
        n_consumers,
        n_categories,
        n_firms,
        n_datatypes,
        ..
    } = state.dims();
    let mut recorded = 0;
    for consumer in 0..n_consumers {
        for category in 0..n_categories {
            for firm in 0..n_firms {
                if state.usage[[consumer, category, firm]] == 0 {
                    continue;
                }
                for datatype in 0..n_datatypes {
                    if state.category_datatype[[category, datatype]] == 1 {
                        state.data_held[[tick, consumer, category, firm, datatype]] = 1;
                        state.data_value[[consumer, category, firm, datatype]] += 1.0;
                        recorded += 1;
                    }
                }
            }
        }
    }
    recorded
}

/// For every `(consumer, category)` used this tick the chosen firm's streak
/// grows and every other firm's streak resets. Unused rows are untouched.
pub fn update_streaks(state: &mut MarketState) {
    let Dimensions {
        n_consumers,
        n_categories,
        ..
    } = state.dims();
    for consumer in 0..n_consumers {
        for category in 0..n_categories {
            let used = state.usage.lane(&[consumer, category]);
            if used.iter().all(|&bit| bit == 0) {
                continue;
            }
            let streaks = state.uninterrupted_usage.lane_mut(&[consumer, category]);
            for (streak, &bit) in streaks.iter_mut().zip(used) {
                *streak = if bit == 1 { *streak + 1 } else { 0 };
            }
        }
    }
}

pub fn update_usage_counter(state: &mut MarketState, alpha_usage_decay: f64) {
    let factor = (-alpha_usage_decay).exp();
    let usage = state.usage.as_slice();
    for (counter, &bit) in state.usage_counter.as_mut_slice().iter_mut().zip(usage) {
        *counter = *counter * factor + bit as f64;
    }
}

pub fn update_category_totals(state: &mut MarketState) {
    let Dimensions {
        n_consumers,
        n_categories,
        ..
    } = state.dims();
    for category in 0..n_categories {
        let used: usize = (0..n_consumers)
            .map(|consumer| {
                state
                    .usage
                    .lane(&[consumer, category])
                    .iter()
                    .filter(|&&bit| bit == 1)
                    .count()
            })
            .sum();
        state.category_total_usage[category] += used as f64;
        if state.category_is_live(category) {
            state.category_ticks_alive[category] += 1;
        }
    }
}

/// Payment, value decay, usage recording, and the usage histories, in that
/// order.
pub fn record_tick_usage(
    state: &mut MarketState,
    tick: usize,
    data_worth_exp: f64,
    alpha_usage_decay: f64,
) -> LedgerReport {
    let revenue = pay_firms(state);
    decay_value(state, data_worth_exp);
    let bits_recorded = apply_usage(state, tick);
    update_streaks(state);
    update_usage_counter(state, alpha_usage_decay);
    update_category_totals(state);
    LedgerReport {
        revenue,
        bits_recorded,
    }
}

/// Products whose streak just reached `n_port` consecutive ticks.
pub fn pending_ports(state: &MarketState, n_port: u32) -> Vec<PortRequest> {
    let shape = state.uninterrupted_usage.shape();
    let mut out = Vec::new();
    for consumer in 0..shape[0] {
        for category in 0..shape[1] {
            for (firm, &streak) in state
                .uninterrupted_usage
                .lane(&[consumer, category])
                .iter()
                .enumerate()
            {
                if streak == n_port {
                    out.push(PortRequest {
                        consumer,
                        category,
                        firm,
                    });
                }
            }
        }
    }
    out
}

/// Copies the consumer's history from every holder the destination has a
/// portability right against, for bits the destination is missing. Only
/// ticks before `tick` are ported. Returns the number of bits copied.
pub fn port(state: &mut MarketState, requests: &[PortRequest], tick: usize) -> usize {
    let Dimensions {
        n_categories,
        n_firms,
        n_datatypes,
        ..
    } = state.dims();
    let mut copied_total = 0;
    for request in requests {
        let PortRequest {
            consumer,
            category: to_category,
            firm: to_firm,
        } = *request;
        for from_firm in 0..n_firms {
            for from_category in 0..n_categories {
                for datatype in 0..n_datatypes {
                    if state.portability[[to_firm, to_category, from_firm, from_category, datatype]]
                        == 0
                        || state.data_value[[consumer, from_category, from_firm, datatype]] <= 0.0
                    {
                        continue;
                    }
                    let mut copied = 0;
                    for t in 0..tick {
                        let dest = [t, consumer, to_category, to_firm, datatype];
                        if state.data_held[dest] == 1 {
                            continue;
                        }
                        let bit = state.data_held[[t, consumer, from_category, from_firm, datatype]];
                        state.data_held[dest] = bit;
                        copied += bit as usize;
                    }
                    state.data_value[[consumer, to_category, to_firm, datatype]] += copied as f64;
                    copied_total += copied;
                }
            }
        }
    }
    copied_total
}

/// Removes every bit held for the flagged `[consumer, firm]` pairs and
/// subtracts its decayed worth from the firm's data value, never below zero.
pub fn delete(state: &mut MarketState, deleters: &Tensor<u8, 2>, tick: usize, decay_rate: f64) {
    let Dimensions {
        n_ticks,
        n_consumers,
        n_categories,
        n_firms,
        n_datatypes,
    } = state.dims();
    let factor = (-decay_rate).exp();
    for consumer in 0..n_consumers {
        for firm in 0..n_firms {
            if deleters[[consumer, firm]] == 0 {
                continue;
            }
            for category in 0..n_categories {
                for datatype in 0..n_datatypes {
                    let mut lost = 0.0;
                    for t in 0..n_ticks {
                        let slot = [t, consumer, category, firm, datatype];
                        if state.data_held[slot] == 0 {
                            continue;
                        }
                        state.data_held[slot] = 0;
                        if t < tick {
                            lost += factor.powi((tick - 1 - t) as i32);
                        }
                    }
                    let value = &mut state.data_value[[consumer, category, firm, datatype]];
                    *value = (*value - lost).max(0.0);
                }
            }
        }
    }
}
