//! Structured record emission for simulations and execution attempts

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::arbitrage::PathSimulationResult;
use crate::domain::execution::ExecutionAttempt;

/// Receives every simulated path and every execution attempt.
/// Implementations must not block the simulation pass.
pub trait RecordSink: Send + Sync {
    fn record_simulation(&self, result: &PathSimulationResult);
    fn record_execution(&self, attempt: &ExecutionAttempt);
}

/// Writes records as single-line JSON through `tracing` under the `records` target
#[derive(Debug, Clone, Default)]
pub struct TracingRecordSink {
    /// Simulation records are voluminous; off unless asked for
    pub include_simulations: bool,
}

impl TracingRecordSink {
    pub fn new(include_simulations: bool) -> Self {
        Self { include_simulations }
    }

    fn emit<T: Serialize>(&self, kind: &str, record: &T) {
        match serde_json::to_string(record) {
            Ok(json) => info!(target: "records", kind, "{}", json),
            Err(e) => warn!(target: "records", "Failed to serialize {} record: {}", kind, e),
        }
    }
}

impl RecordSink for TracingRecordSink {
    fn record_simulation(&self, result: &PathSimulationResult) {
        if self.include_simulations {
            self.emit("simulation", result);
        }
    }

    fn record_execution(&self, attempt: &ExecutionAttempt) {
        self.emit("execution", attempt);
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRecordSink;

impl RecordSink for NullRecordSink {
    fn record_simulation(&self, _result: &PathSimulationResult) {}
    fn record_execution(&self, _attempt: &ExecutionAttempt) {}
}
