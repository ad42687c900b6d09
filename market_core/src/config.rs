use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const BUILTIN_SIMULATION_CONFIG: &str = include_str!("data/simulation_config.json");

/// Environment variable naming a JSON file that replaces the builtin config.
pub const SIM_CONFIG_PATH_ENV: &str = "SIM_CONFIG_PATH";

/// Every tunable of a run, grouped the way the parameter files group them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub general: GeneralConfig,
    pub seeds: SeedConfig,
    pub utility_weights: UtilityWeights,
    pub innovation: InnovationConfig,
    pub capital: CapitalConfig,
    pub needs: NeedsConfig,
    pub data: DataConfig,
    pub categories: CategoryConfig,
    pub usage: UsageConfig,
    pub port: PortConfig,
    pub privacy: PrivacyConfig,
    pub scenario: Option<ScenarioConfig>,
    pub openness: OpennessConfig,
}

impl SimulationConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_SIMULATION_CONFIG)
                .expect("builtin simulation config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        SimulationConfig::from_json_str(&contents)
    }

    /// Upper bound on firm slots over the whole run: the initial firms plus
    /// one standard deviation above the expected Poisson entry count.
    pub fn n_total_firms(&self) -> usize {
        let mean_new_firms = self.general.birth_lambda * self.general.n_ticks as f64;
        let max_new_firms = (mean_new_firms + mean_new_firms.sqrt()).floor().max(0.0) as usize;
        self.general.n_init_firms + max_new_firms
    }

    /// Rejects settings that would make setup produce a malformed state.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let general = &self.general;
        if general.n_ticks == 0 {
            return Err(ConfigError::invalid("general.n_ticks", "must be at least 1"));
        }
        if general.n_consumers == 0 {
            return Err(ConfigError::invalid(
                "general.n_consumers",
                "must be at least 1",
            ));
        }
        if general.n_init_firms == 0 {
            return Err(ConfigError::invalid(
                "general.n_init_firms",
                "must be at least 1",
            ));
        }
        if general.n_init_big_firms > general.n_init_firms {
            return Err(ConfigError::invalid(
                "general.n_init_big_firms",
                format!(
                    "{} big firms exceed {} initial firms",
                    general.n_init_big_firms, general.n_init_firms
                ),
            ));
        }
        if !(general.birth_lambda >= 0.0 && general.birth_lambda.is_finite()) {
            return Err(ConfigError::invalid(
                "general.birth_lambda",
                "must be a finite non-negative rate",
            ));
        }

        let categories = &self.categories;
        if categories.n_init_categories == 0 {
            return Err(ConfigError::invalid(
                "categories.n_init_categories",
                "must be at least 1",
            ));
        }
        if categories.n_init_categories > categories.n_total_categories {
            return Err(ConfigError::invalid(
                "categories.n_init_categories",
                format!(
                    "{} initial categories exceed {} total",
                    categories.n_init_categories, categories.n_total_categories
                ),
            ));
        }

        let data = &self.data;
        if data.n_data_types_init == 0 || data.n_data_types_init > data.n_data_types_total {
            return Err(ConfigError::invalid(
                "data.n_data_types_init",
                format!(
                    "must lie in 1..={}, got {}",
                    data.n_data_types_total, data.n_data_types_init
                ),
            ));
        }
        if data.growth_factor == 0 {
            return Err(ConfigError::invalid("data.growth_factor", "must be at least 1"));
        }
        if data.data_skill_range_high <= data.data_skill_range_low {
            return Err(ConfigError::invalid(
                "data.data_skill_range_high",
                "must exceed data_skill_range_low",
            ));
        }

        let profile = &self.innovation.investment_profile;
        let weights = profile.as_array();
        if weights.iter().any(|w| !(*w >= 0.0)) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::invalid(
                "innovation.investment_profile",
                "weights must be non-negative with a positive sum",
            ));
        }
        if !(self.innovation.alpha_f > 0.0) {
            return Err(ConfigError::invalid("innovation.alpha_f", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.innovation.success_invest_low)
            || !(0.0..=1.0).contains(&self.innovation.success_invest_high)
            || self.innovation.success_invest_low > self.innovation.success_invest_high
        {
            return Err(ConfigError::invalid(
                "innovation.success_invest_low",
                "success bounds must satisfy 0 <= low <= high <= 1",
            ));
        }

        let openness = &self.openness;
        if !(0.0..=1.0).contains(&openness.openness_lower)
            || !(0.0..=1.0).contains(&openness.openness_upper)
            || openness.openness_lower > openness.openness_upper
        {
            return Err(ConfigError::invalid(
                "openness.openness_lower",
                "bounds must satisfy 0 <= lower <= upper <= 1",
            ));
        }

        if self.port.n_port == 0 {
            return Err(ConfigError::invalid("port.n_port", "must be at least 1"));
        }

        let needs = &self.needs;
        if needs.n_modes_probs.is_empty()
            || needs.n_modes_probs.iter().any(|p| !(*p >= 0.0))
            || needs.n_modes_probs.iter().skip(1).sum::<f64>() <= 0.0
        {
            return Err(ConfigError::invalid(
                "needs.n_modes_probs",
                "needs a positive probability on at least one non-zero mode count",
            ));
        }
        if !(0.0 < needs.needs_range_mode_low
            && needs.needs_range_mode_low <= needs.needs_range_mode_high
            && needs.needs_range_mode_high < 1.0)
        {
            return Err(ConfigError::invalid(
                "needs.needs_range_mode_low",
                "modes must satisfy 0 < low <= high < 1",
            ));
        }
        if !(0.0 < needs.needs_range_var_low && needs.needs_range_var_low <= needs.needs_range_var_high)
        {
            return Err(ConfigError::invalid(
                "needs.needs_range_var_low",
                "variances must satisfy 0 < low <= high",
            ));
        }

        if let Some(scenario) = &self.scenario {
            if scenario.tick >= general.n_ticks {
                return Err(ConfigError::invalid(
                    "scenario.tick",
                    format!("tick {} is outside a {}-tick run", scenario.tick, general.n_ticks),
                ));
            }
            if !(scenario.consumer_hit_var >= 0.0 && scenario.consumer_hit_var.is_finite()) {
                return Err(ConfigError::invalid(
                    "scenario.consumer_hit_var",
                    "must be a finite non-negative spread",
                ));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub n_ticks: usize,
    pub n_consumers: usize,
    pub n_init_firms: usize,
    pub n_init_big_firms: usize,
    pub birth_lambda: f64,
    pub no_usage_ticks_before_death: u32,
    pub no_money_ticks_before_death: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            n_ticks: 36,
            n_consumers: 100,
            n_init_firms: 10,
            n_init_big_firms: 2,
            birth_lambda: 0.5,
            no_usage_ticks_before_death: 6,
            no_money_ticks_before_death: 6,
        }
    }
}

/// Seeds for the independent random streams. Only `overall_seed` drives the
/// tick loop; the others are consumed once during setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub overall_seed: u64,
    pub privacy_seed: u64,
    pub need_seed: u64,
    pub data_seed: u64,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            overall_seed: 1,
            privacy_seed: 2,
            need_seed: 3,
            data_seed: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UtilityWeights {
    pub w_qual: f64,
    pub w_loyal_category: f64,
    pub w_loyal_firm: f64,
    pub w_priv: f64,
    pub w_logit: f64,
}

impl Default for UtilityWeights {
    fn default() -> Self {
        Self {
            w_qual: 1.0,
            w_loyal_category: 0.3,
            w_loyal_firm: 0.05,
            w_priv: 1.0,
            w_logit: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InnovationConfig {
    pub qual_diff_param: f64,
    pub success_invest_low: f64,
    pub success_invest_high: f64,
    pub new_product_scaler_alpha: f64,
    pub new_firm_new_category_prob: f64,
    pub invest_cap: f64,
    pub alpha_f: f64,
    pub w_mean_usage: f64,
    pub w_datatype: f64,
    pub w_num_firms_per_cat: f64,
    pub w_usage: f64,
    pub investment_profile: InvestmentProfileConfig,
}

impl Default for InnovationConfig {
    fn default() -> Self {
        Self {
            qual_diff_param: 1.0,
            success_invest_low: 0.05,
            success_invest_high: 0.5,
            new_product_scaler_alpha: 0.0001,
            new_firm_new_category_prob: 0.3,
            invest_cap: 50.0,
            alpha_f: 10.0,
            w_mean_usage: 1.0,
            w_datatype: 1.0,
            w_num_firms_per_cat: -1.0,
            w_usage: 1.0,
            investment_profile: InvestmentProfileConfig::default(),
        }
    }
}

/// Share of investment going to each of the three options, in order:
/// existing product, new product in an existing category, new category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvestmentProfileConfig {
    pub existing_product: f64,
    pub new_product: f64,
    pub new_category: f64,
}

impl InvestmentProfileConfig {
    pub fn as_array(&self) -> [f64; 3] {
        [self.existing_product, self.new_product, self.new_category]
    }
}

impl Default for InvestmentProfileConfig {
    fn default() -> Self {
        Self {
            existing_product: 0.6,
            new_product: 0.3,
            new_category: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapitalConfig {
    pub big: f64,
    pub small: f64,
    pub capital_cutoff: f64,
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            big: 1000.0,
            small: 100.0,
            capital_cutoff: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HyperDistribution {
    #[default]
    Uniform,
}

/// Hyper-parameters of the per-category need distributions: each category
/// gets a mixture of beta distributions, with the number of modes drawn from
/// `n_modes_probs` (index = mode count).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeedsConfig {
    pub n_modes_probs: Vec<f64>,
    pub hyper_mode: HyperDistribution,
    pub hyper_var: HyperDistribution,
    pub needs_range_mode_low: f64,
    pub needs_range_mode_high: f64,
    pub needs_range_var_low: f64,
    pub needs_range_var_high: f64,
    pub n_bins: usize,
}

impl Default for NeedsConfig {
    fn default() -> Self {
        Self {
            n_modes_probs: vec![0.0, 0.6, 0.3, 0.1],
            hyper_mode: HyperDistribution::Uniform,
            hyper_var: HyperDistribution::Uniform,
            needs_range_mode_low: 0.05,
            needs_range_mode_high: 0.6,
            needs_range_var_low: 0.002,
            needs_range_var_high: 0.02,
            n_bins: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub data_worth_exp: f64,
    pub n_data_types_init: usize,
    pub n_data_types_total: usize,
    pub growth_factor: usize,
    pub data_skill_range_low: f64,
    pub data_skill_range_high: f64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_worth_exp: 0.05,
            n_data_types_init: 4,
            n_data_types_total: 8,
            growth_factor: 3,
            data_skill_range_low: 0.0,
            data_skill_range_high: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    pub n_total_categories: usize,
    pub n_init_categories: usize,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self {
            n_total_categories: 16,
            n_init_categories: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    pub alpha_usage_decay: f64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            alpha_usage_decay: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Consecutive ticks of usage after which a consumer ports their data.
    pub n_port: u32,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self { n_port: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    pub mean_firm_score: f64,
    pub var_firm_score: f64,
    pub mean_cons_concern: f64,
    pub var_cons_concern: f64,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            mean_firm_score: 0.5,
            var_firm_score: 0.2,
            mean_cons_concern: 0.4,
            var_cons_concern: 0.2,
        }
    }
}

/// One-off privacy shock. `consumer_hit_var` is the spread of the normal
/// perturbation applied to every consumer's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub tick: usize,
    pub affected_firm_count: usize,
    pub firm_hit: f64,
    pub consumer_hit_mean: f64,
    pub consumer_hit_var: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpennessConfig {
    pub openness_lower: f64,
    pub openness_upper: f64,
    /// Only the initial big firms may request or grant data rights.
    pub cartel: bool,
}

impl Default for OpennessConfig {
    fn default() -> Self {
        Self {
            openness_lower: 0.1,
            openness_upper: 0.6,
            cartel: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationConfigMetadata {
    path: Option<PathBuf>,
}

impl SimulationConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

pub fn load_simulation_config_from_env() -> (Arc<SimulationConfig>, SimulationConfigMetadata) {
    if let Some(path) = env::var(SIM_CONFIG_PATH_ENV).ok().map(PathBuf::from) {
        match SimulationConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "market_core::config",
                    path = %path.display(),
                    "simulation_config.loaded=file"
                );
                return (
                    Arc::new(config),
                    SimulationConfigMetadata::new(Some(path)),
                );
            }
            Err(err) => {
                tracing::warn!(
                    target: "market_core::config",
                    path = %path.display(),
                    error = %err,
                    "simulation_config.load_failed"
                );
            }
        }
    }

    let config = SimulationConfig::builtin();
    tracing::info!(
        target: "market_core::config",
        "simulation_config.loaded=builtin"
    );
    (config, SimulationConfigMetadata::new(None))
}
