//! Categorical draws and normalisation helpers shared by every phase.
//!
//! A categorical draw always consumes exactly one uniform from the generator,
//! whether or not the row admits a choice, so the draw sequence only depends
//! on the number of rows and never on their contents.

use rand::Rng;

/// Draw one index with probability proportional to `weights`.
///
/// Non-positive and NaN weights count as zero. Returns `None` when the row
/// has no positive weight.
pub fn sample_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    let u: f64 = rng.gen();
    choose_with_uniform(weights, u)
}

/// Resolve a categorical draw for a pre-drawn uniform `u` in `[0, 1)`.
///
/// A weight that overflowed to `+inf` dominates every finite one: the draw
/// is uniform over the infinite entries.
pub fn choose_with_uniform(weights: &[f64], u: f64) -> Option<usize> {
    let dominant = weights.iter().filter(|&&w| w == f64::INFINITY).count();
    if dominant > 0 {
        let pick = ((u * dominant as f64) as usize).min(dominant - 1);
        return weights
            .iter()
            .enumerate()
            .filter(|(_, &w)| w == f64::INFINITY)
            .nth(pick)
            .map(|(idx, _)| idx);
    }

    let mut scale = 1.0;
    let mut total: f64 = weights.iter().copied().map(sanitize).sum();
    if total.is_infinite() {
        // finite weights whose sum overflows
        scale = weights.iter().copied().map(sanitize).fold(0.0, f64::max);
        total = weights.iter().map(|&w| sanitize(w) / scale).sum();
    }
    if total <= 0.0 {
        return None;
    }
    let target = u * total;
    let mut cumulative = 0.0;
    let mut last_positive = None;
    for (idx, &weight) in weights.iter().enumerate() {
        let weight = sanitize(weight) / scale;
        if weight <= 0.0 {
            continue;
        }
        cumulative += weight;
        last_positive = Some(idx);
        if target < cumulative {
            return Some(idx);
        }
    }
    // rounding in `u * total` can land exactly on the final edge
    last_positive
}

/// Uniform draw over the set bits of `mask`.
pub fn sample_uniform_mask<R: Rng + ?Sized>(mask: &[bool], rng: &mut R) -> Option<usize> {
    let u: f64 = rng.gen();
    let count = mask.iter().filter(|&&bit| bit).count();
    if count == 0 {
        return None;
    }
    let pick = ((u * count as f64) as usize).min(count - 1);
    mask.iter()
        .enumerate()
        .filter(|(_, &bit)| bit)
        .nth(pick)
        .map(|(idx, _)| idx)
}

#[inline]
fn sanitize(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

/// Global min-max scaling. A constant input maps to all ones.
pub fn min_max_scale(values: &[f64]) -> Vec<f64> {
    let (min, max) = bounds(values);
    if values.is_empty() || min == max {
        return vec![1.0; values.len()];
    }
    let range = max - min;
    values.iter().map(|v| (v - min) / range).collect()
}

/// Divide a row by its range. A degenerate range yields zeros.
pub fn range_scale(values: &mut [f64]) {
    let (min, max) = bounds(values);
    let range = max - min;
    if range.is_nan() || range <= 0.0 {
        values.iter_mut().for_each(|v| *v = 0.0);
        return;
    }
    values.iter_mut().for_each(|v| *v /= range);
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

fn bounds(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}
