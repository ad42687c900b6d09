use rand::Rng;
use rand_distr::{Beta, Distribution, Uniform};

use crate::{
    config::{HyperDistribution, NeedsConfig},
    error::ConfigError,
};

const SEARCH_LOW: f64 = 1.0;
const SEARCH_HIGH: f64 = 1000.0;
const SEARCH_ITERATIONS: usize = 200;

/// Shape parameters `(a, b)` of the beta distribution with the given mode and
/// variance. `a` is found by bisection on `[1, 1000]`.
pub fn beta_params(mode: f64, var: f64) -> Result<(f64, f64), ConfigError> {
    if !(mode > 0.0 && mode < 1.0) {
        return Err(ConfigError::invalid(
            "needs.needs_range_mode",
            format!("mode {mode} must lie strictly inside (0, 1)"),
        ));
    }
    let beta_for = |a: f64| a * (1.0 - mode) / mode + 2.0 - 1.0 / mode;
    let residual = |a: f64| {
        let b = beta_for(a);
        a * b - var * (a + b).powi(2) * (a + b + 1.0)
    };

    let (mut lo, mut hi) = (SEARCH_LOW, SEARCH_HIGH);
    let (mut f_lo, f_hi) = (residual(lo), residual(hi));
    if f_lo == 0.0 {
        return Ok((lo, beta_for(lo)));
    }
    if f_hi == 0.0 {
        return Ok((hi, beta_for(hi)));
    }
    if f_lo.signum() == f_hi.signum() {
        return Err(ConfigError::invalid(
            "needs.needs_range_var",
            format!("no beta distribution with mode {mode} and variance {var}"),
        ));
    }
    for _ in 0..SEARCH_ITERATIONS {
        let mid = 0.5 * (lo + hi);
        let f_mid = residual(mid);
        if f_mid == 0.0 || (hi - lo) < 1e-12 {
            lo = mid;
            break;
        }
        if f_mid.signum() == f_lo.signum() {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
        }
    }
    Ok((lo, beta_for(lo)))
}

/// Equal-weight mixture of beta distributions.
#[derive(Debug, Clone)]
pub struct NeedMixture {
    components: Vec<Beta<f64>>,
    n_bins: usize,
}

impl NeedMixture {
    pub fn new(modes: &[f64], vars: &[f64], n_bins: usize) -> Result<Self, ConfigError> {
        if modes.len() != vars.len() || modes.is_empty() {
            return Err(ConfigError::invalid(
                "needs.n_modes_probs",
                format!("{} modes for {} variances", modes.len(), vars.len()),
            ));
        }
        let components = modes
            .iter()
            .zip(vars)
            .map(|(&mode, &var)| {
                let (a, b) = beta_params(mode, var)?;
                Beta::new(a, b).map_err(|err| {
                    ConfigError::invalid("needs.needs_range_var", err.to_string())
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            components,
            n_bins: n_bins.max(1),
        })
    }

    /// One need value on the left edges of the `n_bins` grid.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let pick = rng.gen_range(0..self.components.len());
        let x = self.components[pick].sample(rng);
        let bin = ((x * self.n_bins as f64) as usize).min(self.n_bins - 1);
        bin as f64 / self.n_bins as f64
    }
}

/// Draws the number of modes, then each mode and variance, for one category.
/// Categories flagged `high_need` draw their modes from the upper half of the
/// configured range.
pub fn draw_category_mixture<R: Rng + ?Sized>(
    config: &NeedsConfig,
    high_need: bool,
    rng: &mut R,
) -> Result<NeedMixture, ConfigError> {
    let modality = crate::sampling::sample_index(&config.n_modes_probs, rng)
        .unwrap_or(1)
        .max(1);

    let mode_high = config.needs_range_mode_high;
    let mode_low = if high_need {
        config.needs_range_mode_low.max(0.5).min(mode_high)
    } else {
        config.needs_range_mode_low
    };
    let modes = draw_hyper(config.hyper_mode, mode_low, mode_high, modality, rng);
    let vars = draw_hyper(
        config.hyper_var,
        config.needs_range_var_low,
        config.needs_range_var_high,
        modality,
        rng,
    );
    NeedMixture::new(&modes, &vars, config.n_bins)
}

fn draw_hyper<R: Rng + ?Sized>(
    distribution: HyperDistribution,
    low: f64,
    high: f64,
    count: usize,
    rng: &mut R,
) -> Vec<f64> {
    match distribution {
        HyperDistribution::Uniform => {
            if high > low {
                let between = Uniform::new(low, high);
                (0..count).map(|_| between.sample(rng)).collect()
            } else {
                vec![low; count]
            }
        }
    }
}
