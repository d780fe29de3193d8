//! Execution domain - atomic transaction assembly, submission and confirmation

pub mod compute_budget;
pub mod execution_engine;
pub mod transaction_builder;

pub use execution_engine::{
    AtomicExecutionEngine, ExecutionAttempt, ExecutionConfig, ExecutionOutcome, LedgerGateway, SignatureOutcome,
};
pub use transaction_builder::{SwapInstructionBuilder, SwapLeg, TransactionBuilder};
