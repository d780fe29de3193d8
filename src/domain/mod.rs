//! Domain layer - core business logic and entities

pub mod arbitrage;
pub mod execution;
pub mod pool;
pub mod safety;
