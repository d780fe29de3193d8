//! Depools - Solana multi-hop cycle arbitrage
//! Built with Domain-Driven Design principles

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod shared;

// Re-export main types for convenience
pub use application::ArbitrageMonitor;
pub use domain::arbitrage::{OpportunitySelector, PathGenerator, PathSimulator};
pub use domain::execution::AtomicExecutionEngine;
pub use domain::safety::SafetyGovernor;
pub use infrastructure::rpc::RpcManager;
