//! Error handling for the application

use serde::Serialize;
use thiserror::Error;

/// Why a simulated path is not executable.
///
/// Variants drive aggregation; the display string is for logs only.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum FailureReason {
    #[error("stale or missing liquidity data")]
    StaleOrMissingLiquidity,

    #[error("venue quote unavailable")]
    VenueQuoteUnavailable,

    #[error("hop liquidity below floor")]
    InsufficientHopLiquidity,

    #[error("hop price impact above ceiling")]
    ExcessiveHopPriceImpact,

    #[error("non-positive swap output")]
    NonPositiveOutput,

    #[error("numeric overflow in swap math")]
    NumericOverflow,

    #[error("path does not return to the base currency")]
    OpenLoop,

    #[error("net profit below hop-count threshold")]
    BelowProfitThreshold,

    #[error("aggregate price impact above ceiling")]
    ExcessiveTotalPriceImpact,

    #[error("aggregate liquidity below floor")]
    InsufficientAggregateLiquidity,
}

/// Terminal network errors surfaced by the RPC resilience layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("No RPC endpoints configured")]
    NoEndpoints,

    #[error("{operation} failed after {attempts} attempts: {last_cause}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last_cause: String,
    },

    #[error("Ledger rejected request: {0}")]
    Ledger(String),
}

/// Execution-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Invalid opportunity: {0}")]
    InvalidOpportunity(String),

    #[error("Failed to build swap instruction: {0}")]
    InstructionBuild(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Transaction too large: {size} bytes (limit {limit})")]
    TransactionTooLarge { size: usize, limit: usize },

    #[error("Network error: {0}")]
    Network(#[from] RpcError),
}

/// General application error
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Circuit breaker tripped after {consecutive_failures} consecutive failures")]
    CircuitBreakerTripped { consecutive_failures: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
