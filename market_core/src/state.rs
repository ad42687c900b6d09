use crate::{config::SimulationConfig, error::SimulationError, tensor::Tensor};

/// Axis sizes shared by every tensor in a [`MarketState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub n_ticks: usize,
    pub n_consumers: usize,
    pub n_categories: usize,
    pub n_firms: usize,
    pub n_datatypes: usize,
}

/// Index positions of the three investment options.
pub const INVEST_EXISTING_PRODUCT: usize = 0;
pub const INVEST_NEW_PRODUCT: usize = 1;
pub const INVEST_NEW_CATEGORY: usize = 2;

/// Complete simulation state. Identity is an array coordinate: firm slots
/// are claimed in order through `next_firm_slot` and never reallocated.
#[derive(Debug, Clone)]
pub struct MarketState {
    dims: Dimensions,
    /// Tick currently being resolved (or about to be, between ticks).
    pub tick: usize,
    pub next_firm_slot: usize,

    // firms
    pub capital: Vec<f64>,
    pub alive: Vec<bool>,
    /// `[firm, category]`; zero means no product.
    pub quality: Tensor<f64, 2>,
    pub ticks_no_usage: Vec<u32>,
    pub ticks_no_capital: Vec<u32>,
    pub privacy_score: Vec<f64>,
    pub data_combination_skill: Vec<f64>,
    pub investment_profile: Vec<[f64; 3]>,

    // consumers
    pub privacy_concern: Vec<f64>,
    pub wealth: Vec<f64>,
    /// `[consumer, category]`; probability of wanting the category this tick.
    pub need: Tensor<f64, 2>,

    // categories
    /// `[category, datatype]` binary footprint.
    pub category_datatype: Tensor<u8, 2>,
    pub category_ticks_alive: Vec<u32>,
    pub category_total_usage: Vec<f64>,
    pub category_ever_alive: Vec<bool>,

    // data ledger
    /// `[tick, consumer, category, firm, datatype]`
    pub data_held: Tensor<u8, 5>,
    /// `[consumer, category, firm, datatype]`
    pub data_value: Tensor<f64, 4>,

    // negotiation
    /// `[requester, requester_category, holder, holder_category, datatype]`;
    /// 1 while the requester may still ask the holder for that datatype.
    pub requestable: Tensor<u8, 5>,
    /// Same layout as `requestable`; 1 once the holder granted the right to
    /// port into the requester's category.
    pub portability: Tensor<u8, 5>,

    // usage
    /// `[consumer, category, firm]`, one-hot per (consumer, category).
    pub usage: Tensor<u8, 3>,
    /// Exponentially decayed usage history, `[consumer, category, firm]`.
    pub usage_counter: Tensor<f64, 3>,
    /// Consecutive ticks a consumer used the same firm for a category.
    pub uninterrupted_usage: Tensor<u32, 3>,
    /// `[consumer, firm]`; once zeroed never restored.
    pub privacy_mask: Tensor<u8, 2>,
}

impl MarketState {
    /// All-zero state of the given shape with every consumer allowed to use
    /// every firm. The generator fills in the rest.
    pub fn empty(dims: Dimensions) -> Self {
        let Dimensions {
            n_ticks: t,
            n_consumers: c,
            n_categories: k,
            n_firms: f,
            n_datatypes: d,
        } = dims;
        Self {
            dims,
            tick: 0,
            next_firm_slot: 0,
            capital: vec![0.0; f],
            alive: vec![false; f],
            quality: Tensor::zeros([f, k]),
            ticks_no_usage: vec![0; f],
            ticks_no_capital: vec![0; f],
            privacy_score: vec![0.0; f],
            data_combination_skill: vec![0.0; f],
            investment_profile: vec![[1.0, 0.0, 0.0]; f],
            privacy_concern: vec![0.0; c],
            wealth: vec![0.0; c],
            need: Tensor::zeros([c, k]),
            category_datatype: Tensor::zeros([k, d]),
            category_ticks_alive: vec![0; k],
            category_total_usage: vec![0.0; k],
            category_ever_alive: vec![false; k],
            data_held: Tensor::zeros([t, c, k, f, d]),
            data_value: Tensor::zeros([c, k, f, d]),
            requestable: Tensor::zeros([f, k, f, k, d]),
            portability: Tensor::zeros([f, k, f, k, d]),
            usage: Tensor::zeros([c, k, f]),
            usage_counter: Tensor::zeros([c, k, f]),
            uninterrupted_usage: Tensor::zeros([c, k, f]),
            privacy_mask: Tensor::filled([c, f], 1),
        }
    }

    #[inline]
    pub fn dims(&self) -> Dimensions {
        self.dims
    }

    #[inline]
    pub fn has_product(&self, firm: usize, category: usize) -> bool {
        self.quality[[firm, category]] > 0.0
    }

    pub fn holds_any_product(&self, firm: usize) -> bool {
        self.quality.lane(&[firm]).iter().any(|&q| q > 0.0)
    }

    /// A category is live while at least one firm offers a product in it.
    pub fn category_is_live(&self, category: usize) -> bool {
        (0..self.dims.n_firms).any(|firm| self.has_product(firm, category))
    }

    pub fn live_categories(&self) -> Vec<bool> {
        (0..self.dims.n_categories)
            .map(|category| self.category_is_live(category))
            .collect()
    }

    /// All `(firm, category)` pairs with an active product, firm-major.
    pub fn active_pairs(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for firm in 0..self.dims.n_firms {
            for category in 0..self.dims.n_categories {
                if self.has_product(firm, category) {
                    pairs.push((firm, category));
                }
            }
        }
        pairs
    }

    pub fn refresh_ever_alive(&mut self) {
        for category in 0..self.dims.n_categories {
            if !self.category_ever_alive[category] && self.category_is_live(category) {
                self.category_ever_alive[category] = true;
            }
        }
    }

    pub fn n_alive(&self) -> usize {
        self.alive.iter().filter(|&&alive| alive).count()
    }

    /// Removes a firm from the market: products, negotiation rows and
    /// columns, and the alive flag. Held data stays on the ledger.
    pub fn retire_firm(&mut self, firm: usize) {
        let Dimensions {
            n_categories: k,
            n_firms: f,
            ..
        } = self.dims;
        self.alive[firm] = false;
        self.quality.lane_mut(&[firm]).fill(0.0);
        for category in 0..k {
            for other in 0..f {
                for other_category in 0..k {
                    self.requestable
                        .lane_mut(&[firm, category, other, other_category])
                        .fill(0);
                    self.requestable
                        .lane_mut(&[other, other_category, firm, category])
                        .fill(0);
                    self.portability
                        .lane_mut(&[firm, category, other, other_category])
                        .fill(0);
                    self.portability
                        .lane_mut(&[other, other_category, firm, category])
                        .fill(0);
                }
            }
        }
    }

    /// Shape and structural checks run once before tick 0, so a foreign
    /// generator cannot hand the engine a malformed state.
    pub fn validate(&self, config: &SimulationConfig) -> Result<(), SimulationError> {
        let expected_firms = config.n_total_firms();
        let d = self.dims;
        check_shape("dims.n_ticks", &[config.general.n_ticks], &[d.n_ticks])?;
        check_shape(
            "dims.n_consumers",
            &[config.general.n_consumers],
            &[d.n_consumers],
        )?;
        check_shape(
            "dims.n_categories",
            &[config.categories.n_total_categories],
            &[d.n_categories],
        )?;
        check_shape("dims.n_firms", &[expected_firms], &[d.n_firms])?;
        if d.n_datatypes == 0 || d.n_datatypes > config.data.n_data_types_total {
            return Err(SimulationError::ShapeMismatch {
                tensor: "dims.n_datatypes",
                expected: vec![config.data.n_data_types_total],
                actual: vec![d.n_datatypes],
            });
        }

        let (t, c, k, f, dt) = (
            d.n_ticks,
            d.n_consumers,
            d.n_categories,
            d.n_firms,
            d.n_datatypes,
        );
        check_shape("capital", &[f], &[self.capital.len()])?;
        check_shape("alive", &[f], &[self.alive.len()])?;
        check_shape("quality", &[f, k], &self.quality.shape())?;
        check_shape("ticks_no_usage", &[f], &[self.ticks_no_usage.len()])?;
        check_shape("ticks_no_capital", &[f], &[self.ticks_no_capital.len()])?;
        check_shape("privacy_score", &[f], &[self.privacy_score.len()])?;
        check_shape(
            "data_combination_skill",
            &[f],
            &[self.data_combination_skill.len()],
        )?;
        check_shape(
            "investment_profile",
            &[f],
            &[self.investment_profile.len()],
        )?;
        check_shape("privacy_concern", &[c], &[self.privacy_concern.len()])?;
        check_shape("wealth", &[c], &[self.wealth.len()])?;
        check_shape("need", &[c, k], &self.need.shape())?;
        check_shape("category_datatype", &[k, dt], &self.category_datatype.shape())?;
        check_shape(
            "category_ticks_alive",
            &[k],
            &[self.category_ticks_alive.len()],
        )?;
        check_shape(
            "category_total_usage",
            &[k],
            &[self.category_total_usage.len()],
        )?;
        check_shape(
            "category_ever_alive",
            &[k],
            &[self.category_ever_alive.len()],
        )?;
        check_shape("data_held", &[t, c, k, f, dt], &self.data_held.shape())?;
        check_shape("data_value", &[c, k, f, dt], &self.data_value.shape())?;
        check_shape("requestable", &[f, k, f, k, dt], &self.requestable.shape())?;
        check_shape("portability", &[f, k, f, k, dt], &self.portability.shape())?;
        check_shape("usage", &[c, k, f], &self.usage.shape())?;
        check_shape("usage_counter", &[c, k, f], &self.usage_counter.shape())?;
        check_shape(
            "uninterrupted_usage",
            &[c, k, f],
            &self.uninterrupted_usage.shape(),
        )?;
        check_shape("privacy_mask", &[c, f], &self.privacy_mask.shape())?;

        for datatype in 0..dt {
            if (0..k).all(|category| self.category_datatype[[category, datatype]] == 0) {
                return Err(SimulationError::invariant(
                    self.tick,
                    format!("datatype {datatype} is not used by any category"),
                ));
            }
        }
        if self.next_firm_slot > f {
            return Err(SimulationError::invariant(
                self.tick,
                format!(
                    "next firm slot {} exceeds {f} firm slots",
                    self.next_firm_slot
                ),
            ));
        }
        if let Some(firm) = (self.next_firm_slot..f).find(|&firm| self.alive[firm]) {
            return Err(SimulationError::invariant(
                self.tick,
                format!("firm {firm} is alive beyond the claimed slots"),
            ));
        }
        self.check_self_pairs()?;
        self.check_dead_firms()
    }

    /// Firms never hold requestable or portable rights against themselves.
    pub fn check_self_pairs(&self) -> Result<(), SimulationError> {
        let Dimensions {
            n_categories: k,
            n_firms: f,
            ..
        } = self.dims;
        for firm in 0..f {
            for category in 0..k {
                for other_category in 0..k {
                    let head = [firm, category, firm, other_category];
                    if self.requestable.lane(&head).iter().any(|&bit| bit != 0)
                        || self.portability.lane(&head).iter().any(|&bit| bit != 0)
                    {
                        return Err(SimulationError::invariant(
                            self.tick,
                            format!("firm {firm} holds a data right against itself"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Dead firms carry no products, and firms that have died (slots already
    /// claimed) carry no negotiation rights. Unclaimed slots keep their
    /// setup-time masks so entrants can negotiate.
    pub fn check_dead_firms(&self) -> Result<(), SimulationError> {
        let Dimensions {
            n_categories: k,
            n_firms: f,
            ..
        } = self.dims;
        for firm in (0..f).filter(|&firm| !self.alive[firm]) {
            if self.holds_any_product(firm) {
                return Err(SimulationError::invariant(
                    self.tick,
                    format!("firm {firm} is dead but holds quality"),
                ));
            }
            if firm >= self.next_firm_slot {
                continue;
            }
            for category in 0..k {
                for other in 0..f {
                    for other_category in 0..k {
                        let outgoing = [firm, category, other, other_category];
                        let incoming = [other, other_category, firm, category];
                        let dirty = self.requestable.lane(&outgoing).iter().any(|&b| b != 0)
                            || self.requestable.lane(&incoming).iter().any(|&b| b != 0)
                            || self.portability.lane(&outgoing).iter().any(|&b| b != 0)
                            || self.portability.lane(&incoming).iter().any(|&b| b != 0);
                        if dirty {
                            return Err(SimulationError::invariant(
                                self.tick,
                                format!("dead firm {firm} still appears in the negotiation masks"),
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_shape(
    tensor: &'static str,
    expected: &[usize],
    actual: &[usize],
) -> Result<(), SimulationError> {
    if expected == actual {
        Ok(())
    } else {
        Err(SimulationError::ShapeMismatch {
            tensor,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        })
    }
}
