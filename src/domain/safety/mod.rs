//! Safety domain - pre-trade checks and the fail-stop circuit breaker

pub mod circuit_breaker;
pub mod safety_governor;

pub use circuit_breaker::{CircuitBreaker, FailureRecord};
pub use safety_governor::{SafetyGovernor, SafetyLimits, SafetyReport, WalletProbe};
