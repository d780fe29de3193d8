//! Single-flight atomic execution of a selected opportunity

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use solana_sdk::{hash::Hash, signature::Signature, signer::Signer, transaction::Transaction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::transaction_builder::TransactionBuilder;
use crate::domain::arbitrage::ArbitrageOpportunity;
use crate::infrastructure::persistence::RecordSink;
use crate::shared::errors::{ExecutionError, RpcError};
use crate::shared::utils::{generate_id, now_millis};

/// Terminal status of a submitted or simulated transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureOutcome {
    Confirmed,
    Failed(String),
}

/// Network side of execution. Implementations route every call through the
/// RPC resilience layer.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn latest_blockhash(&self) -> Result<Hash, RpcError>;

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, RpcError>;

    /// Dry-run the transaction against current ledger state
    async fn simulate_transaction(&self, transaction: &Transaction) -> Result<SignatureOutcome, RpcError>;

    /// Wait for a push notification; `None` when none arrived within `timeout`
    async fn await_signature_notification(
        &self,
        signature: &Signature,
        timeout: Duration,
    ) -> Result<Option<SignatureOutcome>, RpcError>;

    /// One direct status query; `None` while the ledger has no terminal status
    async fn poll_signature_status(&self, signature: &Signature) -> Result<Option<SignatureOutcome>, RpcError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub quote_staleness: Duration,
    pub confirmation_timeout: Duration,
    pub max_status_polls: u32,
    pub status_poll_interval: Duration,
    pub dry_run: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            quote_staleness: Duration::from_millis(1500),
            confirmation_timeout: Duration::from_secs(5),
            max_status_polls: 5,
            status_poll_interval: Duration::from_millis(400),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    Failure,
    Timeout,
    /// Dropped before any network call (stale quote, another attempt in flight)
    Aborted,
}

impl ExecutionOutcome {
    /// Outcomes that count toward the circuit breaker
    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionOutcome::Failure | ExecutionOutcome::Timeout)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionAttempt {
    pub id: String,
    pub opportunity: ArbitrageOpportunity,
    #[serde(skip)]
    pub transaction: Option<Transaction>,
    pub signature: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub outcome: ExecutionOutcome,
    pub error: Option<String>,
    pub realized_profit: Option<Decimal>,
    pub dry_run: bool,
    pub latency_ms: u64,
}

impl ExecutionAttempt {
    fn new(opportunity: &ArbitrageOpportunity, dry_run: bool) -> Self {
        Self {
            id: generate_id(),
            opportunity: opportunity.clone(),
            transaction: None,
            signature: None,
            submitted_at: None,
            outcome: ExecutionOutcome::Aborted,
            error: None,
            realized_profit: None,
            dry_run,
            latency_ms: 0,
        }
    }
}

/// Clears the in-flight flag on drop
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AtomicExecutionEngine {
    builder: TransactionBuilder,
    gateway: Arc<dyn LedgerGateway>,
    signer: Arc<dyn Signer + Send + Sync>,
    config: ExecutionConfig,
    in_flight: AtomicBool,
    records: Option<Arc<dyn RecordSink>>,
}

impl AtomicExecutionEngine {
    pub fn new(
        builder: TransactionBuilder,
        gateway: Arc<dyn LedgerGateway>,
        signer: Arc<dyn Signer + Send + Sync>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            builder,
            gateway,
            signer,
            config,
            in_flight: AtomicBool::new(false),
            records: None,
        }
    }

    pub fn with_record_sink(mut self, records: Arc<dyn RecordSink>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(&self.in_flight))
    }

    /// Execute `opportunity` as one transaction and wait for its outcome.
    /// At most one attempt runs at a time; a concurrent call is aborted.
    pub async fn execute(&self, opportunity: &ArbitrageOpportunity) -> ExecutionAttempt {
        let started = Instant::now();
        let mut attempt = ExecutionAttempt::new(opportunity, self.config.dry_run);

        match self.begin() {
            Some(_guard) => self.run(opportunity, &mut attempt).await,
            None => {
                debug!("Dropping {}: execution already in flight", opportunity.simulation.path_id);
                attempt.error = Some("execution already in flight".to_string());
            }
        }

        attempt.latency_ms = started.elapsed().as_millis() as u64;
        match attempt.outcome {
            ExecutionOutcome::Success => info!(
                "✅ {} {} in {}ms ({})",
                if attempt.dry_run { "Simulated" } else { "Executed" },
                opportunity.simulation.path_id,
                attempt.latency_ms,
                attempt.signature.as_deref().unwrap_or("-")
            ),
            ExecutionOutcome::Aborted => {}
            _ => error!(
                "❌ Execution of {} ended {:?}: {}",
                opportunity.simulation.path_id,
                attempt.outcome,
                attempt.error.as_deref().unwrap_or("unknown")
            ),
        }
        if let Some(records) = &self.records {
            records.record_execution(&attempt);
        }
        attempt
    }

    async fn run(&self, opportunity: &ArbitrageOpportunity, attempt: &mut ExecutionAttempt) {
        // cancellation point: nothing has touched the network yet
        let age = opportunity.quote_age_ms(now_millis());
        if u128::from(age) > self.config.quote_staleness.as_millis() {
            warn!(
                "⏱️ Stale quote for {}: {}ms old (ceiling {}ms)",
                opportunity.simulation.path_id,
                age,
                self.config.quote_staleness.as_millis()
            );
            attempt.outcome = ExecutionOutcome::Aborted;
            attempt.error = Some(format!("stale quote ({}ms)", age));
            return;
        }

        let transaction = match self.prepare(opportunity).await {
            Ok(tx) => tx,
            Err(e) => {
                attempt.outcome = ExecutionOutcome::Failure;
                attempt.error = Some(e.to_string());
                return;
            }
        };
        let signature = transaction.signatures.first().copied().unwrap_or_default();
        attempt.signature = Some(signature.to_string());
        attempt.transaction = Some(transaction.clone());

        if self.config.dry_run {
            attempt.submitted_at = Some(Utc::now());
            match self.gateway.simulate_transaction(&transaction).await {
                Ok(outcome) => apply_outcome(attempt, outcome),
                Err(e) => {
                    attempt.outcome = ExecutionOutcome::Failure;
                    attempt.error = Some(e.to_string());
                }
            }
            return;
        }

        attempt.submitted_at = Some(Utc::now());
        match self.gateway.send_transaction(&transaction).await {
            Ok(sent) => attempt.signature = Some(sent.to_string()),
            Err(e) => {
                attempt.outcome = ExecutionOutcome::Failure;
                attempt.error = Some(e.to_string());
                return;
            }
        }
        info!("🚀 Submitted {} ({})", opportunity.simulation.path_id, signature);

        match self.confirm(&signature).await {
            Some(outcome) => apply_outcome(attempt, outcome),
            None => {
                attempt.outcome = ExecutionOutcome::Timeout;
                attempt.error = Some("confirmation timed out".to_string());
            }
        }
    }

    async fn prepare(&self, opportunity: &ArbitrageOpportunity) -> Result<Transaction, ExecutionError> {
        // instructions must build before any network call
        self.builder.build_instructions(opportunity, &self.signer.pubkey())?;
        let blockhash = self.gateway.latest_blockhash().await?;
        self.builder.build_transaction(opportunity, self.signer.as_ref(), blockhash)
    }

    /// Push notification first, then a bounded number of direct polls
    async fn confirm(&self, signature: &Signature) -> Option<SignatureOutcome> {
        match self
            .gateway
            .await_signature_notification(signature, self.config.confirmation_timeout)
            .await
        {
            Ok(Some(outcome)) => return Some(outcome),
            Ok(None) => debug!("No notification for {} within timeout, polling", signature),
            Err(e) => warn!("Signature subscription failed for {}: {}", signature, e),
        }

        for poll in 1..=self.config.max_status_polls {
            match self.gateway.poll_signature_status(signature).await {
                Ok(Some(outcome)) => return Some(outcome),
                Ok(None) => debug!("Status poll {}/{}: pending", poll, self.config.max_status_polls),
                Err(e) => warn!("Status poll {}/{} failed: {}", poll, self.config.max_status_polls, e),
            }
            if poll < self.config.max_status_polls {
                tokio::time::sleep(self.config.status_poll_interval).await;
            }
        }
        None
    }
}

fn apply_outcome(attempt: &mut ExecutionAttempt, outcome: SignatureOutcome) {
    match outcome {
        SignatureOutcome::Confirmed => {
            attempt.outcome = ExecutionOutcome::Success;
            attempt.error = None;
        }
        SignatureOutcome::Failed(payload) => {
            attempt.outcome = ExecutionOutcome::Failure;
            attempt.error = Some(payload);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::arbitrage::fixtures::profitable_opportunity;
    use crate::domain::execution::transaction_builder::tests::EchoSwaps;
    use solana_sdk::signature::Keypair;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted gateway that records every call it receives
    #[derive(Default)]
    pub(crate) struct MockGateway {
        pub calls: Mutex<Vec<&'static str>>,
        pub send_error: Option<RpcError>,
        pub notification: Option<SignatureOutcome>,
        pub polls: Mutex<VecDeque<Option<SignatureOutcome>>>,
        pub simulation: Option<SignatureOutcome>,
    }

    impl MockGateway {
        pub(crate) fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn log(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl LedgerGateway for MockGateway {
        async fn latest_blockhash(&self) -> Result<Hash, RpcError> {
            self.log("blockhash");
            Ok(Hash::new_unique())
        }

        async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, RpcError> {
            self.log("send");
            match &self.send_error {
                Some(e) => Err(e.clone()),
                None => Ok(transaction.signatures[0]),
            }
        }

        async fn simulate_transaction(&self, _transaction: &Transaction) -> Result<SignatureOutcome, RpcError> {
            self.log("simulate");
            Ok(self.simulation.clone().unwrap_or(SignatureOutcome::Confirmed))
        }

        async fn await_signature_notification(
            &self,
            _signature: &Signature,
            _timeout: Duration,
        ) -> Result<Option<SignatureOutcome>, RpcError> {
            self.log("notify");
            Ok(self.notification.clone())
        }

        async fn poll_signature_status(&self, _signature: &Signature) -> Result<Option<SignatureOutcome>, RpcError> {
            self.log("poll");
            Ok(self.polls.lock().unwrap().pop_front().flatten())
        }
    }

    fn config() -> ExecutionConfig {
        ExecutionConfig {
            quote_staleness: Duration::from_millis(1500),
            confirmation_timeout: Duration::from_millis(10),
            max_status_polls: 3,
            status_poll_interval: Duration::from_millis(1),
            dry_run: false,
        }
    }

    fn engine(gateway: Arc<MockGateway>, config: ExecutionConfig) -> AtomicExecutionEngine {
        AtomicExecutionEngine::new(
            TransactionBuilder::new(300_000, Arc::new(EchoSwaps)),
            gateway,
            Arc::new(Keypair::new()),
            config,
        )
    }

    #[tokio::test]
    async fn test_stale_quote_aborts_without_network_calls() {
        let gateway = Arc::new(MockGateway::default());
        let engine = engine(Arc::clone(&gateway), config());
        let opportunity = profitable_opportunity(now_millis() - 10_000);

        let attempt = engine.execute(&opportunity).await;
        assert_eq!(attempt.outcome, ExecutionOutcome::Aborted);
        assert!(attempt.error.unwrap().contains("stale quote"));
        assert!(attempt.transaction.is_none());
        assert!(gateway.calls().is_empty());
        assert!(!engine.is_busy());
    }

    #[tokio::test]
    async fn test_push_confirmation() {
        let gateway = Arc::new(MockGateway {
            notification: Some(SignatureOutcome::Confirmed),
            ..Default::default()
        });
        let engine = engine(Arc::clone(&gateway), config());
        let attempt = engine.execute(&profitable_opportunity(now_millis())).await;

        assert_eq!(attempt.outcome, ExecutionOutcome::Success);
        assert_eq!(gateway.calls(), vec!["blockhash", "send", "notify"]);
        assert!(attempt.signature.is_some());
        assert!(attempt.submitted_at.is_some());
        let tx = attempt.transaction.unwrap();
        assert_eq!(tx.message.instructions.len(), 4);
    }

    #[tokio::test]
    async fn test_falls_back_to_bounded_polls() {
        let gateway = Arc::new(MockGateway {
            polls: Mutex::new(VecDeque::from(vec![None, Some(SignatureOutcome::Confirmed)])),
            ..Default::default()
        });
        let engine = engine(Arc::clone(&gateway), config());
        let attempt = engine.execute(&profitable_opportunity(now_millis())).await;

        assert_eq!(attempt.outcome, ExecutionOutcome::Success);
        assert_eq!(gateway.calls(), vec!["blockhash", "send", "notify", "poll", "poll"]);
    }

    #[tokio::test]
    async fn test_confirmation_timeout_after_poll_budget() {
        let gateway = Arc::new(MockGateway::default());
        let engine = engine(Arc::clone(&gateway), config());
        let attempt = engine.execute(&profitable_opportunity(now_millis())).await;

        assert_eq!(attempt.outcome, ExecutionOutcome::Timeout);
        assert!(attempt.outcome.is_failure());
        assert_eq!(gateway.calls().iter().filter(|c| **c == "poll").count(), 3);
    }

    #[tokio::test]
    async fn test_ledger_rejection_is_failed_attempt() {
        let gateway = Arc::new(MockGateway {
            send_error: Some(RpcError::Ledger("custom program error: 0x1771".to_string())),
            ..Default::default()
        });
        let engine = engine(Arc::clone(&gateway), config());
        let attempt = engine.execute(&profitable_opportunity(now_millis())).await;

        assert_eq!(attempt.outcome, ExecutionOutcome::Failure);
        assert!(attempt.error.unwrap().contains("0x1771"));
        assert_eq!(gateway.calls(), vec!["blockhash", "send"]);
    }

    #[tokio::test]
    async fn test_on_chain_failure_carries_payload() {
        let gateway = Arc::new(MockGateway {
            notification: Some(SignatureOutcome::Failed("InstructionError(2, Custom(6001))".to_string())),
            ..Default::default()
        });
        let engine = engine(Arc::clone(&gateway), config());
        let attempt = engine.execute(&profitable_opportunity(now_millis())).await;
        assert_eq!(attempt.outcome, ExecutionOutcome::Failure);
        assert_eq!(attempt.error.as_deref(), Some("InstructionError(2, Custom(6001))"));
    }

    #[tokio::test]
    async fn test_dry_run_simulates_instead_of_sending() {
        let gateway = Arc::new(MockGateway::default());
        let engine = engine(
            Arc::clone(&gateway),
            ExecutionConfig {
                dry_run: true,
                ..config()
            },
        );
        let attempt = engine.execute(&profitable_opportunity(now_millis())).await;
        assert_eq!(attempt.outcome, ExecutionOutcome::Success);
        assert!(attempt.dry_run);
        assert_eq!(gateway.calls(), vec!["blockhash", "simulate"]);
    }

    #[tokio::test]
    async fn test_second_attempt_dropped_while_in_flight() {
        let gateway = Arc::new(MockGateway::default());
        let engine = engine(Arc::clone(&gateway), config());
        let guard = engine.begin();
        assert!(guard.is_some());
        assert!(engine.is_busy());

        let attempt = engine.execute(&profitable_opportunity(now_millis())).await;
        assert_eq!(attempt.outcome, ExecutionOutcome::Aborted);
        assert!(!attempt.outcome.is_failure());
        assert!(gateway.calls().is_empty());

        drop(guard);
        assert!(!engine.is_busy());
        assert!(engine.begin().is_some());
    }
}
