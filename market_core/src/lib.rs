//! Core engine for the data-portability market simulation.
//!
//! Firms sell products in categories, collect data from the consumers who
//! use them, negotiate rights to port each other's data, and invest to
//! improve or launch products. A run is a pure function of its
//! [`SimulationConfig`]: [`run`] builds the initial market, resolves every
//! tick in a fixed phase order and returns the [`SimulationOutput`].

mod choice;
pub mod config;
mod engine;
mod error;
mod hashing;
mod innovation;
mod ledger;
mod lifecycle;
mod needs;
mod negotiation;
mod sampling;
mod scenario;
mod setup;
mod state;
mod tensor;
mod tracking;

pub use choice::{utility, ChoiceReport};
pub use config::{
    load_simulation_config_from_env, ScenarioConfig, SimulationConfig, SimulationConfigMetadata,
    BUILTIN_SIMULATION_CONFIG, SIM_CONFIG_PATH_ENV,
};
pub use engine::{advance_tick, run, SimRng, Simulation, TickReport};
pub use error::{ConfigError, SimulationError};
pub use hashing::{fnv1a, FnvHasher};
pub use innovation::InnovationReport;
pub use ledger::{pending_ports, port, LedgerReport, PortRequest};
pub use lifecycle::BirthReport;
pub use negotiation::{DataRequest, NegotiationReport, Negotiator};
pub use scenario::{top_firms_by_capital, ScenarioReport, PRIVACY_SCORE_FLOOR};
pub use setup::{InitialStateGenerator, StandardSetup};
pub use state::{Dimensions, MarketState};
pub use tensor::Tensor;
pub use tracking::{SimTracker, SimulationOutput};
