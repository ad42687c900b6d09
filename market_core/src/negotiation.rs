//! Data-rights negotiation between firms.
//!
//! Each tick every firm slot may file one request for the right to port a
//! datatype from another firm's category into one of its own. A request is
//! built in four stages (datatype, holder, holder category, own category),
//! each stage drawing one uniform per firm slot whether or not the firm has
//! anything left to choose. Requests are then granted with a probability
//! that grows with the overlap of the two firms' portfolios.

use rand::Rng;
use tracing::debug;

use crate::{
    config::OpennessConfig,
    sampling::{choose_with_uniform, sample_uniform_mask},
    state::{Dimensions, MarketState},
};

/// Coordinates of one cell in the `requestable`/`portability` masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataRequest {
    pub requester: usize,
    pub requester_category: usize,
    pub holder: usize,
    pub holder_category: usize,
    pub datatype: usize,
}

impl DataRequest {
    #[inline]
    pub fn index(&self) -> [usize; 5] {
        [
            self.requester,
            self.requester_category,
            self.holder,
            self.holder_category,
            self.datatype,
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NegotiationReport {
    /// Requests that survived the feasibility re-check, in requester order.
    pub requests: Vec<DataRequest>,
    pub granted: Vec<DataRequest>,
    pub grants_per_requester: Vec<u32>,
}

/// Keeps the per-firm candidate buffers alive across ticks.
#[derive(Debug, Clone, Default)]
pub struct Negotiator {
    candidates: Vec<Vec<DataRequest>>,
    datatype_weights: Vec<f64>,
    firm_mask: Vec<bool>,
    category_mask: Vec<bool>,
}

impl Negotiator {
    pub fn new(dims: Dimensions) -> Self {
        Self {
            candidates: vec![Vec::new(); dims.n_firms],
            datatype_weights: vec![0.0; dims.n_datatypes],
            firm_mask: vec![false; dims.n_firms],
            category_mask: vec![false; dims.n_categories],
        }
    }

    /// Candidate requests for every firm: requestable cells between two
    /// active products of different firms.
    pub fn snapshot(&mut self, state: &MarketState) {
        let dims = state.dims();
        self.resize(dims);
        for buffer in &mut self.candidates {
            buffer.clear();
        }
        let active = state.active_pairs();
        for &(requester, requester_category) in &active {
            for &(holder, holder_category) in &active {
                if requester == holder {
                    continue;
                }
                let lane = state
                    .requestable
                    .lane(&[requester, requester_category, holder, holder_category]);
                for (datatype, &bit) in lane.iter().enumerate() {
                    if bit == 1 {
                        self.candidates[requester].push(DataRequest {
                            requester,
                            requester_category,
                            holder,
                            holder_category,
                            datatype,
                        });
                    }
                }
            }
        }
    }

    pub fn candidates(&self, firm: usize) -> &[DataRequest] {
        &self.candidates[firm]
    }

    fn resize(&mut self, dims: Dimensions) {
        self.candidates.resize_with(dims.n_firms, Vec::new);
        self.datatype_weights.resize(dims.n_datatypes, 0.0);
        self.firm_mask.resize(dims.n_firms, false);
        self.category_mask.resize(dims.n_categories, false);
    }

    /// Runs one negotiation round and applies it to the masks.
    pub fn negotiate<R: Rng + ?Sized>(
        &mut self,
        state: &mut MarketState,
        openness: &OpennessConfig,
        rng: &mut R,
    ) -> NegotiationReport {
        let Dimensions {
            n_categories,
            n_firms,
            n_datatypes,
            ..
        } = state.dims();
        self.snapshot(state);

        // stage 1: datatype, weighted by how many of the firm's products use it
        let mut datatypes: Vec<Option<usize>> = Vec::with_capacity(n_firms);
        for firm in 0..n_firms {
            self.datatype_weights.fill(0.0);
            for candidate in &self.candidates[firm] {
                self.datatype_weights[candidate.datatype] = 1.0;
            }
            for datatype in 0..n_datatypes {
                if self.datatype_weights[datatype] == 0.0 {
                    continue;
                }
                let usage = (0..n_categories)
                    .filter(|&category| {
                        state.has_product(firm, category)
                            && state.category_datatype[[category, datatype]] == 1
                    })
                    .count();
                self.datatype_weights[datatype] = usage as f64;
            }
            let u: f64 = rng.gen();
            datatypes.push(choose_with_uniform(&self.datatype_weights, u));
        }

        // stage 2: holder, uniform over firms offering that datatype
        let mut holders: Vec<Option<usize>> = Vec::with_capacity(n_firms);
        for firm in 0..n_firms {
            self.firm_mask.fill(false);
            if let Some(datatype) = datatypes[firm] {
                for candidate in &self.candidates[firm] {
                    if candidate.datatype == datatype {
                        self.firm_mask[candidate.holder] = true;
                    }
                }
            }
            holders.push(sample_uniform_mask(&self.firm_mask, rng));
        }

        // stage 3: the holder's category to port from
        let mut holder_categories: Vec<Option<usize>> = Vec::with_capacity(n_firms);
        for firm in 0..n_firms {
            self.category_mask.fill(false);
            if let (Some(datatype), Some(holder)) = (datatypes[firm], holders[firm]) {
                for candidate in &self.candidates[firm] {
                    if candidate.datatype == datatype && candidate.holder == holder {
                        self.category_mask[candidate.holder_category] = true;
                    }
                }
            }
            holder_categories.push(sample_uniform_mask(&self.category_mask, rng));
        }

        // stage 4: the requester's own category to port into
        let mut requester_categories: Vec<Option<usize>> = Vec::with_capacity(n_firms);
        for firm in 0..n_firms {
            self.category_mask.fill(false);
            if let (Some(datatype), Some(holder), Some(holder_category)) =
                (datatypes[firm], holders[firm], holder_categories[firm])
            {
                for candidate in &self.candidates[firm] {
                    if candidate.datatype == datatype
                        && candidate.holder == holder
                        && candidate.holder_category == holder_category
                    {
                        self.category_mask[candidate.requester_category] = true;
                    }
                }
            }
            requester_categories.push(sample_uniform_mask(&self.category_mask, rng));
        }

        let requests: Vec<DataRequest> = (0..n_firms)
            .filter_map(|firm| {
                Some(DataRequest {
                    requester: firm,
                    requester_category: requester_categories[firm]?,
                    holder: holders[firm]?,
                    holder_category: holder_categories[firm]?,
                    datatype: datatypes[firm]?,
                })
            })
            .filter(|request| self.candidates[request.requester].contains(request))
            .collect();

        let mut granted = Vec::new();
        let mut grants_per_requester = vec![0; n_firms];
        for request in &requests {
            let p = granting_probability(state, openness, request.requester, request.holder);
            let u: f64 = rng.gen();
            if u < p {
                granted.push(*request);
                grants_per_requester[request.requester] += 1;
            }
        }

        for request in &requests {
            state.requestable[request.index()] = 0;
        }
        for request in &granted {
            state.portability[request.index()] = 1;
        }

        debug!(
            target: "market_core::negotiation",
            tick = state.tick,
            requests = requests.len(),
            granted = granted.len(),
            "negotiation.resolved"
        );
        NegotiationReport {
            requests,
            granted,
            grants_per_requester,
        }
    }
}

/// Share of the holder's categories the requester also sells in, mapped
/// onto the openness range. A holder with no products grants at the lower
/// bound.
pub fn granting_probability(
    state: &MarketState,
    openness: &OpennessConfig,
    requester: usize,
    holder: usize,
) -> f64 {
    let n_categories = state.dims().n_categories;
    let holder_products = (0..n_categories)
        .filter(|&category| state.has_product(holder, category))
        .count();
    let overlap = if holder_products == 0 {
        0.0
    } else {
        let shared = (0..n_categories)
            .filter(|&category| {
                state.has_product(holder, category) && state.has_product(requester, category)
            })
            .count();
        shared as f64 / holder_products as f64
    };
    openness.openness_lower + (openness.openness_upper - openness.openness_lower) * overlap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::tiny_dims;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn open_market() -> MarketState {
        let mut state = MarketState::empty(tiny_dims());
        state.alive = vec![true, true, true];
        state.next_firm_slot = 3;
        state.quality[[0, 0]] = 1.0;
        state.quality[[1, 0]] = 1.0;
        state.quality[[1, 1]] = 1.0;
        state.category_datatype[[0, 0]] = 1;
        state.category_datatype[[1, 0]] = 1;
        state.category_datatype[[1, 1]] = 1;
        for from in 0..3 {
            for to in 0..3 {
                if from == to {
                    continue;
                }
                for fc in 0..2 {
                    for tc in 0..2 {
                        for dt in 0..2 {
                            if state.category_datatype[[fc, dt]] == 1
                                && state.category_datatype[[tc, dt]] == 1
                            {
                                state.requestable[[from, fc, to, tc, dt]] = 1;
                            }
                        }
                    }
                }
            }
        }
        state
    }

    fn openness(lower: f64, upper: f64) -> OpennessConfig {
        OpennessConfig {
            openness_lower: lower,
            openness_upper: upper,
            cartel: false,
        }
    }

    #[test]
    fn snapshot_only_pairs_active_products_of_different_firms() {
        let state = open_market();
        let mut negotiator = Negotiator::new(state.dims());
        negotiator.snapshot(&state);

        // firm 2 has no product
        assert!(negotiator.candidates(2).is_empty());
        for candidate in negotiator.candidates(0) {
            assert_eq!(candidate.holder, 1);
            assert!(state.has_product(candidate.holder, candidate.holder_category));
        }
        // firm 0 (category 0, datatype 0) from firm 1 (categories 0 and 1)
        assert_eq!(negotiator.candidates(0).len(), 2);
    }

    #[test]
    fn overlap_drives_granting_probability() {
        let state = open_market();
        let open = openness(0.1, 0.6);
        // firm 1 holds both categories, firm 0 shares one of them
        assert!((granting_probability(&state, &open, 0, 1) - 0.35).abs() < 1e-12);
        assert!((granting_probability(&state, &open, 1, 0) - 0.6).abs() < 1e-12);
        assert!((granting_probability(&state, &open, 0, 2) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn every_request_clears_its_cell_and_grants_set_portability() {
        let mut state = open_market();
        let before = state.requestable.clone();
        let mut negotiator = Negotiator::new(state.dims());
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        let report = negotiator.negotiate(&mut state, &openness(1.0, 1.0), &mut rng);

        // firms 0 and 1 both have something to ask for
        assert_eq!(report.requests.len(), 2);
        assert_eq!(report.granted, report.requests);
        for request in &report.requests {
            assert_ne!(request.requester, request.holder);
            assert_eq!(before[request.index()], 1);
            assert_eq!(state.requestable[request.index()], 0);
            assert_eq!(state.portability[request.index()], 1);
        }
        assert_eq!(report.grants_per_requester, vec![1, 1, 0]);
        for (after, before) in state.requestable.as_slice().iter().zip(before.as_slice()) {
            assert!(after <= before);
        }
    }

    #[test]
    fn closed_market_denies_everything() {
        let mut state = open_market();
        let mut negotiator = Negotiator::new(state.dims());
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let report = negotiator.negotiate(&mut state, &openness(0.0, 0.0), &mut rng);
        assert!(!report.requests.is_empty());
        assert!(report.granted.is_empty());
        assert!(state.portability.as_slice().iter().all(|&bit| bit == 0));
    }

    #[test]
    fn repeated_rounds_exhaust_the_requestable_cells() {
        let mut state = open_market();
        let mut negotiator = Negotiator::new(state.dims());
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..20 {
            negotiator.negotiate(&mut state, &openness(0.5, 0.5), &mut rng);
        }
        negotiator.snapshot(&state);
        assert!((0..3).all(|firm| negotiator.candidates(firm).is_empty()));
    }

    #[test]
    fn draw_count_does_not_depend_on_candidates() {
        // four stages, one uniform per firm each, and nothing to grant
        let mut state = MarketState::empty(tiny_dims());
        let mut negotiator = Negotiator::new(state.dims());
        let mut a = ChaCha8Rng::seed_from_u64(77);
        let mut b = ChaCha8Rng::seed_from_u64(77);
        let report = negotiator.negotiate(&mut state, &openness(0.1, 0.6), &mut a);
        assert!(report.requests.is_empty());
        for _ in 0..4 * 3 {
            let _: f64 = b.gen();
        }
        assert_eq!(a.gen::<u64>(), b.gen::<u64>());
    }
}
