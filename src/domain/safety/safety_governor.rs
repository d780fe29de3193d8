//! Pre-trade checks and the circuit breaker gating execution

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::circuit_breaker::{CircuitBreaker, FailureRecord};
use crate::domain::arbitrage::ArbitrageOpportunity;
use crate::domain::execution::ExecutionAttempt;
use crate::shared::errors::RpcError;

/// Wallet and connectivity readings for pre-trade checks
#[async_trait]
pub trait WalletProbe: Send + Sync {
    /// Balance of the settlement (base) currency in UI units
    async fn settlement_balance(&self) -> Result<Decimal, RpcError>;

    async fn gas_balance_lamports(&self) -> Result<u64, RpcError>;

    /// Most recent network round trip
    fn last_round_trip(&self) -> Duration;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SafetyLimits {
    /// Notional / balance above this is a hard failure
    pub max_utilization_error: Decimal,
    /// Notional / balance above this is a warning
    pub max_utilization_warning: Decimal,
    /// Settlement currency that must remain after the notional
    pub balance_buffer: Decimal,
    pub min_gas_lamports: u64,
    pub max_latency: Duration,
    pub max_slippage_bps: u32,
    pub min_hop_liquidity: Decimal,
    pub circuit_breaker_threshold: u32,
    pub failure_history: usize,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_utilization_error: dec!(0.8),
            max_utilization_warning: dec!(0.6),
            balance_buffer: dec!(10),
            min_gas_lamports: 10_000_000,
            max_latency: Duration::from_millis(800),
            max_slippage_bps: 100,
            min_hop_liquidity: dec!(1000),
            circuit_breaker_threshold: 3,
            failure_history: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SafetyReport {
    pub passed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SafetyReport {
    fn finish(mut self) -> Self {
        self.passed = self.errors.is_empty();
        self
    }
}

pub struct SafetyGovernor {
    limits: SafetyLimits,
    wallet: Arc<dyn WalletProbe>,
    breaker: RwLock<CircuitBreaker>,
}

impl SafetyGovernor {
    pub fn new(limits: SafetyLimits, wallet: Arc<dyn WalletProbe>) -> Self {
        let breaker = CircuitBreaker::new(limits.circuit_breaker_threshold, limits.failure_history);
        Self {
            limits,
            wallet,
            breaker: RwLock::new(breaker),
        }
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    /// Balance, gas, latency, slippage and breaker checks for a trade of `notional`
    pub async fn perform_safety_check(&self, notional: Decimal, slippage_bps: u32) -> SafetyReport {
        let mut report = SafetyReport::default();

        {
            let breaker = self.breaker.read().await;
            if breaker.is_tripped() {
                report.errors.push(format!(
                    "circuit breaker tripped after {} consecutive failures",
                    breaker.consecutive_failures()
                ));
            }
        }

        match self.wallet.settlement_balance().await {
            Ok(balance) => self.check_balance(&mut report, notional, balance),
            Err(e) => report.errors.push(format!("settlement balance unavailable: {}", e)),
        }

        match self.wallet.gas_balance_lamports().await {
            Ok(lamports) if lamports < self.limits.min_gas_lamports => report.errors.push(format!(
                "gas balance {} lamports below minimum {}",
                lamports, self.limits.min_gas_lamports
            )),
            Ok(_) => {}
            Err(e) => report.errors.push(format!("gas balance unavailable: {}", e)),
        }

        let latency = self.wallet.last_round_trip();
        if latency > self.limits.max_latency {
            report.errors.push(format!(
                "network latency {}ms above ceiling {}ms",
                latency.as_millis(),
                self.limits.max_latency.as_millis()
            ));
        }

        if slippage_bps > self.limits.max_slippage_bps {
            report.errors.push(format!(
                "slippage {} bps above maximum {} bps",
                slippage_bps, self.limits.max_slippage_bps
            ));
        }

        report.finish()
    }

    /// Full pre-trade gate for a selected opportunity, including per-leg liquidity
    pub async fn check_opportunity(&self, opportunity: &ArbitrageOpportunity) -> SafetyReport {
        let mut report = self
            .perform_safety_check(opportunity.simulation.notional, opportunity.slippage_bps)
            .await;
        for leg in &opportunity.simulation.legs {
            if leg.liquidity_quote < self.limits.min_hop_liquidity {
                report.errors.push(format!(
                    "pool {} liquidity {} below floor {}",
                    leg.pool_id,
                    leg.liquidity_quote.round_dp(2),
                    self.limits.min_hop_liquidity
                ));
            }
        }
        let report = report.finish();
        if report.passed {
            for warning in &report.warnings {
                warn!("⚠️ {}", warning);
            }
        } else {
            debug!("Safety check failed for {}: {:?}", opportunity.simulation.path_id, report.errors);
        }
        report
    }

    fn check_balance(&self, report: &mut SafetyReport, notional: Decimal, balance: Decimal) {
        if balance <= Decimal::ZERO {
            report.errors.push("settlement balance is empty".to_string());
            return;
        }
        let required = notional.saturating_add(self.limits.balance_buffer);
        if balance < required {
            report.errors.push(format!(
                "balance {} does not cover notional {} plus buffer {}",
                balance, notional, self.limits.balance_buffer
            ));
        }
        let utilization = notional.checked_div(balance).unwrap_or(Decimal::MAX);
        if utilization > self.limits.max_utilization_error {
            report.errors.push(format!(
                "utilization {}% above {}%",
                (utilization * dec!(100)).round_dp(2),
                self.limits.max_utilization_error * dec!(100)
            ));
        } else if utilization > self.limits.max_utilization_warning {
            report.warnings.push(format!(
                "utilization {}% above {}%",
                (utilization * dec!(100)).round_dp(2),
                self.limits.max_utilization_warning * dec!(100)
            ));
        }
    }

    /// Feed an attempt to the breaker. Returns true when it tripped.
    pub async fn record_attempt(&self, attempt: &ExecutionAttempt) -> bool {
        self.breaker.write().await.record(attempt)
    }

    pub async fn is_tripped(&self) -> bool {
        self.breaker.read().await.is_tripped()
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.breaker.read().await.consecutive_failures()
    }

    pub async fn failure_history(&self) -> Vec<FailureRecord> {
        self.breaker.read().await.history().iter().cloned().collect()
    }

    /// Manual reset; the only way a tripped breaker closes
    pub async fn reset_circuit_breaker(&self) {
        self.breaker.write().await.reset();
    }
}
