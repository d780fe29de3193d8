//! Arbitrage domain - cycle generation, simulation and selection

pub mod amm_math;
pub mod opportunity_selector;
pub mod path_generator;
pub mod path_simulator;
pub mod quote;

pub use opportunity_selector::{ArbitrageOpportunity, ExecutionPricing, OpportunitySelector, SelectionStats};
pub use path_generator::{ArbitragePath, PathGenerator, PathHop, MAX_HOPS, MIN_HOPS};
pub use path_simulator::{PathSimulationResult, PathSimulator, ProfitThresholds, SimulationThresholds, SwapLegResult};
pub use quote::{QuoteProvider, VenueQuote};
