//! Consecutive-failure circuit breaker. Fail-stop: only an explicit reset closes it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{error, info};

use crate::domain::execution::{ExecutionAttempt, ExecutionOutcome};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub attempt_id: String,
    pub path_id: String,
    pub outcome: ExecutionOutcome,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_failures: u32,
    tripped_at: Option<DateTime<Utc>>,
    history: VecDeque<FailureRecord>,
    history_limit: usize,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, history_limit: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
            tripped_at: None,
            history: VecDeque::with_capacity(history_limit),
            history_limit,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped_at.is_some()
    }

    pub fn tripped_at(&self) -> Option<DateTime<Utc>> {
        self.tripped_at
    }

    pub fn history(&self) -> &VecDeque<FailureRecord> {
        &self.history
    }

    /// Feed one attempt. Returns true when this attempt tripped the breaker.
    pub fn record(&mut self, attempt: &ExecutionAttempt) -> bool {
        match attempt.outcome {
            ExecutionOutcome::Success => {
                self.consecutive_failures = 0;
                false
            }
            ExecutionOutcome::Aborted => false,
            ExecutionOutcome::Failure | ExecutionOutcome::Timeout => {
                self.push_history(FailureRecord {
                    attempt_id: attempt.id.clone(),
                    path_id: attempt.opportunity.simulation.path_id.clone(),
                    outcome: attempt.outcome,
                    error: attempt.error.clone(),
                    at: Utc::now(),
                });
                self.record_failure()
            }
        }
    }

    fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.tripped_at.is_none() && self.consecutive_failures >= self.threshold {
            self.tripped_at = Some(Utc::now());
            error!(
                "🛑 Circuit breaker TRIPPED after {} consecutive failures; manual reset required",
                self.consecutive_failures
            );
            return true;
        }
        false
    }

    fn push_history(&mut self, record: FailureRecord) {
        if self.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }

    pub fn reset(&mut self) {
        if self.is_tripped() {
            info!("🔄 Circuit breaker reset");
        }
        self.consecutive_failures = 0;
        self.tripped_at = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::arbitrage::fixtures::profitable_opportunity;
    use crate::domain::execution::ExecutionAttempt;

    pub(crate) fn attempt(outcome: ExecutionOutcome) -> ExecutionAttempt {
        ExecutionAttempt {
            id: crate::shared::utils::generate_id(),
            opportunity: profitable_opportunity(1),
            transaction: None,
            signature: None,
            submitted_at: None,
            outcome,
            error: Some(format!("{:?}", outcome)),
            realized_profit: None,
            dry_run: false,
            latency_ms: 0,
        }
    }

    #[test]
    fn test_trips_at_threshold_and_stays_open() {
        let mut breaker = CircuitBreaker::new(3, 10);
        assert!(!breaker.record(&attempt(ExecutionOutcome::Failure)));
        assert!(!breaker.record(&attempt(ExecutionOutcome::Timeout)));
        assert!(breaker.record(&attempt(ExecutionOutcome::Failure)));
        assert!(breaker.is_tripped());

        // a later success does not close it
        breaker.record(&attempt(ExecutionOutcome::Success));
        assert!(breaker.is_tripped());

        breaker.reset();
        assert!(!breaker.is_tripped());
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn test_success_resets_the_run() {
        let mut breaker = CircuitBreaker::new(3, 10);
        breaker.record(&attempt(ExecutionOutcome::Failure));
        breaker.record(&attempt(ExecutionOutcome::Failure));
        breaker.record(&attempt(ExecutionOutcome::Success));
        breaker.record(&attempt(ExecutionOutcome::Failure));
        breaker.record(&attempt(ExecutionOutcome::Failure));
        assert!(!breaker.is_tripped());
        assert_eq!(breaker.consecutive_failures(), 2);
    }

    #[test]
    fn test_aborted_attempts_are_ignored() {
        let mut breaker = CircuitBreaker::new(2, 10);
        breaker.record(&attempt(ExecutionOutcome::Failure));
        breaker.record(&attempt(ExecutionOutcome::Aborted));
        breaker.record(&attempt(ExecutionOutcome::Aborted));
        assert_eq!(breaker.consecutive_failures(), 1);
        assert_eq!(breaker.history().len(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut breaker = CircuitBreaker::new(100, 3);
        for _ in 0..5 {
            breaker.record(&attempt(ExecutionOutcome::Failure));
        }
        assert_eq!(breaker.history().len(), 3);
    }
}
