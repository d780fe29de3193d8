//! Scan loop: feed events in, throttled simulation passes, governed execution out

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::domain::arbitrage::{ArbitrageOpportunity, ArbitragePath, OpportunitySelector};
use crate::domain::execution::{AtomicExecutionEngine, ExecutionAttempt, ExecutionOutcome};
use crate::domain::pool::{FeedEvent, LiquidityCache, PoolRegistry};
use crate::domain::safety::SafetyGovernor;
use crate::shared::errors::AppError;
use crate::shared::utils::format_amount;

/// Monitoring configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Amount of base currency pushed through each cycle
    pub notional: Decimal,
    /// At most one simulation pass per window
    pub throttle: Duration,
    /// Timer for periodic passes; also flushes deferred triggers
    pub simulation_interval: Duration,
    pub stats_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            notional: Decimal::from(1000),
            throttle: Duration::from_millis(1000),
            simulation_interval: Duration::from_millis(250),
            stats_interval: Duration::from_secs(30),
        }
    }
}

/// Coalesces bursts of feed events into at most one pass per window
#[derive(Debug, Clone)]
pub struct SimulationThrottle {
    window: Duration,
    last_run: Option<Instant>,
    pending: bool,
}

impl SimulationThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_run: None,
            pending: false,
        }
    }

    fn ready(&self, now: Instant) -> bool {
        self.last_run.map_or(true, |last| now.duration_since(last) >= self.window)
    }

    fn mark_run(&mut self, now: Instant) {
        self.last_run = Some(now);
        self.pending = false;
    }

    /// Register a trigger. Returns true when a pass may run now; otherwise
    /// the trigger is deferred until the next flush.
    pub fn trigger(&mut self, now: Instant) -> bool {
        if self.ready(now) {
            self.mark_run(now);
            true
        } else {
            self.pending = true;
            false
        }
    }

    /// True when a deferred trigger is due
    pub fn flush(&mut self, now: Instant) -> bool {
        if self.pending && self.ready(now) {
            self.mark_run(now);
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonitorStats {
    pub events_applied: u64,
    pub events_rejected: u64,
    pub passes: u64,
    pub opportunities: u64,
    pub blocked_by_safety: u64,
    pub dropped_in_flight: u64,
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub aborted: u64,
}

pub struct ArbitrageMonitor {
    config: MonitorConfig,
    registry: PoolRegistry,
    cache: LiquidityCache,
    paths: Vec<ArbitragePath>,
    selector: OpportunitySelector,
    engine: Arc<AtomicExecutionEngine>,
    governor: Arc<SafetyGovernor>,
    throttle: SimulationThrottle,
    executions: JoinSet<ExecutionAttempt>,
    stats: MonitorStats,
}

impl ArbitrageMonitor {
    pub fn new(
        config: MonitorConfig,
        registry: PoolRegistry,
        cache: LiquidityCache,
        paths: Vec<ArbitragePath>,
        selector: OpportunitySelector,
        engine: Arc<AtomicExecutionEngine>,
        governor: Arc<SafetyGovernor>,
    ) -> Self {
        let throttle = SimulationThrottle::new(config.throttle);
        Self {
            config,
            registry,
            cache,
            paths,
            selector,
            engine,
            governor,
            throttle,
            executions: JoinSet::new(),
            stats: MonitorStats::default(),
        }
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    pub fn cache(&self) -> &LiquidityCache {
        &self.cache
    }

    pub fn selector(&self) -> &OpportunitySelector {
        &self.selector
    }

    /// Apply one feed event to the snapshot cache. Returns true when it changed state.
    pub fn handle_event(&mut self, event: FeedEvent) -> bool {
        let applied = match event {
            FeedEvent::Reserves(update) => match self.registry.get(&update.pool_id) {
                Some(pool) => {
                    let pool = Arc::clone(pool);
                    self.cache.apply(&pool, update)
                }
                None => {
                    warn!("Reserve update for unknown pool {}", update.pool_id);
                    false
                }
            },
            FeedEvent::BasePrice { mint, price } => {
                self.cache.set_base_price(mint, price);
                true
            }
        };
        if applied {
            self.stats.events_applied += 1;
        } else {
            self.stats.events_rejected += 1;
        }
        applied
    }

    /// One simulation pass over every path against the current cache
    pub fn run_pass(&mut self) -> Option<ArbitrageOpportunity> {
        self.stats.passes += 1;
        let opportunity = self.selector.select_best(&self.paths, self.config.notional, &self.cache);
        if opportunity.is_some() {
            self.stats.opportunities += 1;
        }
        opportunity
    }

    /// Gate an opportunity through the governor and hand it to the engine
    pub async fn dispatch(&mut self, opportunity: ArbitrageOpportunity) {
        if self.engine.is_busy() || !self.executions.is_empty() {
            debug!("Dropping {}: execution already in flight", opportunity.simulation.path_id);
            self.stats.dropped_in_flight += 1;
            return;
        }

        let report = self.governor.check_opportunity(&opportunity).await;
        if !report.passed {
            warn!(
                "🛡️ Safety check blocked {}: {}",
                opportunity.simulation.path_id,
                report.errors.join("; ")
            );
            self.stats.blocked_by_safety += 1;
            return;
        }

        let engine = Arc::clone(&self.engine);
        self.executions.spawn(async move { engine.execute(&opportunity).await });
    }

    /// Feed a finished attempt to the breaker
    pub async fn record_outcome(&mut self, attempt: &ExecutionAttempt) -> Result<(), AppError> {
        match attempt.outcome {
            ExecutionOutcome::Success => {
                self.stats.executions += 1;
                self.stats.successes += 1;
            }
            ExecutionOutcome::Failure | ExecutionOutcome::Timeout => {
                self.stats.executions += 1;
                self.stats.failures += 1;
            }
            ExecutionOutcome::Aborted => self.stats.aborted += 1,
        }

        if self.governor.record_attempt(attempt).await || self.governor.is_tripped().await {
            let consecutive_failures = self.governor.consecutive_failures().await;
            error!("🛑 Halting: circuit breaker open after {} consecutive failures", consecutive_failures);
            return Err(AppError::CircuitBreakerTripped { consecutive_failures });
        }
        Ok(())
    }

    async fn on_trigger(&mut self) {
        if let Some(opportunity) = self.run_pass() {
            self.dispatch(opportunity).await;
        }
    }

    /// Timer tick: flush a deferred trigger, or run a periodic pass so
    /// snapshots ageing out are noticed without a feed event
    async fn on_tick(&mut self, now: Instant) {
        let due = if self.throttle.is_pending() {
            self.throttle.flush(now)
        } else {
            self.throttle.trigger(now)
        };
        if due {
            self.on_trigger().await;
        }
    }

    fn log_stats(&self) {
        let cumulative = self.selector.cumulative();
        info!(
            "📊 passes {} | events {} | opportunities {} | executions {} ({} ok, {} failed) | best {}%",
            self.stats.passes,
            self.stats.events_applied,
            self.stats.opportunities,
            self.stats.executions,
            self.stats.successes,
            self.stats.failures,
            cumulative
                .best_net_profit_pct
                .map(|p| format_amount(p, 4))
                .unwrap_or_else(|| "-".to_string())
        );
    }

    /// Run until the feed closes or the circuit breaker trips
    pub async fn run(mut self, mut feed: mpsc::Receiver<FeedEvent>) -> Result<MonitorStats, AppError> {
        info!(
            "🚀 Monitoring {} paths over {} pools, notional {}",
            self.paths.len(),
            self.registry.len(),
            self.config.notional
        );
        let period = self.config.simulation_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_stats = Instant::now();

        loop {
            tokio::select! {
                event = feed.recv() => {
                    let Some(event) = event else {
                        info!("Feed closed");
                        break;
                    };
                    if self.handle_event(event) && self.throttle.trigger(Instant::now()) {
                        self.on_trigger().await;
                    }
                }
                Some(joined) = self.executions.join_next(), if !self.executions.is_empty() => {
                    match joined {
                        Ok(attempt) => self.record_outcome(&attempt).await?,
                        Err(e) => error!("Execution task failed: {}", e),
                    }
                }
                _ = ticker.tick() => {
                    self.on_tick(Instant::now()).await;
                    if last_stats.elapsed() >= self.config.stats_interval {
                        self.log_stats();
                        last_stats = Instant::now();
                    }
                }
            }
        }

        while let Some(joined) = self.executions.join_next().await {
            match joined {
                Ok(attempt) => self.record_outcome(&attempt).await?,
                Err(e) => error!("Execution task failed: {}", e),
            }
        }
        self.log_stats();
        Ok(self.stats)
    }
}
