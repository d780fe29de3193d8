//! Ranks simulated paths and picks the single best executable opportunity

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::path_generator::ArbitragePath;
use super::path_simulator::{PathSimulationResult, PathSimulator};
use crate::domain::pool::LiquidityCache;
use crate::infrastructure::persistence::RecordSink;
use crate::shared::errors::FailureReason;
use crate::shared::utils::{generate_id, now_millis};

/// Execution parameters derived from a selected result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPricing {
    pub slippage_bps: u32,
    pub base_priority_fee_micro_lamports: u64,
    /// Added per basis point of expected net profit
    pub priority_fee_per_bps: u64,
    pub max_priority_fee_micro_lamports: u64,
    /// Net profit percentage at which an opportunity is logged as optimal
    pub optimal_profit_pct: Decimal,
}

impl ExecutionPricing {
    /// Non-decreasing in `net_profit_pct`, capped at the configured maximum
    pub fn priority_fee(&self, net_profit_pct: Decimal) -> u64 {
        let profit_bps = (net_profit_pct * dec!(100)).floor().to_u64().unwrap_or(0);
        self.priority_fee_per_bps
            .saturating_mul(profit_bps)
            .saturating_add(self.base_priority_fee_micro_lamports)
            .min(self.max_priority_fee_micro_lamports)
    }
}

impl Default for ExecutionPricing {
    fn default() -> Self {
        Self {
            slippage_bps: 50,
            base_priority_fee_micro_lamports: 10_000,
            priority_fee_per_bps: 1_000,
            max_priority_fee_micro_lamports: 1_000_000,
            optimal_profit_pct: dec!(1.0),
        }
    }
}

/// Best executable result of one selection pass. Never carried across passes.
#[derive(Debug, Clone, Serialize)]
pub struct ArbitrageOpportunity {
    pub id: String,
    #[serde(skip)]
    pub path: ArbitragePath,
    pub simulation: PathSimulationResult,
    pub priority_fee_micro_lamports: u64,
    pub slippage_bps: u32,
    pub quote_captured_at_ms: u64,
    pub selected_at: DateTime<Utc>,
    pub is_optimal: bool,
}

impl ArbitrageOpportunity {
    pub fn quote_age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.quote_captured_at_ms)
    }

    pub fn tier(&self) -> &'static str {
        if self.is_optimal {
            "OPTIMAL"
        } else {
            "PROFITABLE"
        }
    }
}

/// Aggregates of a single selection pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectionStats {
    pub total_paths: usize,
    pub executable: usize,
    pub executable_by_hops: BTreeMap<usize, usize>,
    pub average_net_profit_pct: Option<Decimal>,
    pub best_net_profit_pct: Option<Decimal>,
    pub failure_reasons: BTreeMap<FailureReason, usize>,
    pub total_simulation_us: u64,
}

impl SelectionStats {
    fn from_results(results: &[PathSimulationResult]) -> Self {
        let mut stats = SelectionStats {
            total_paths: results.len(),
            ..Default::default()
        };
        let mut profit_sum = Decimal::ZERO;

        for result in results {
            stats.total_simulation_us = stats.total_simulation_us.saturating_add(result.simulation_latency_us);
            match result.failure_reason {
                Some(reason) => *stats.failure_reasons.entry(reason).or_insert(0) += 1,
                None if result.is_executable => {
                    stats.executable += 1;
                    *stats.executable_by_hops.entry(result.hop_count).or_insert(0) += 1;
                    profit_sum = profit_sum.saturating_add(result.net_profit_pct);
                    stats.best_net_profit_pct = Some(
                        stats
                            .best_net_profit_pct
                            .map_or(result.net_profit_pct, |best| best.max(result.net_profit_pct)),
                    );
                }
                None => {}
            }
        }

        if stats.executable > 0 {
            stats.average_net_profit_pct = profit_sum.checked_div(Decimal::from(stats.executable));
        }
        stats
    }
}

/// Totals across every pass since startup
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CumulativeStats {
    pub passes: u64,
    pub paths_simulated: u64,
    pub executable_found: u64,
    pub opportunities_selected: u64,
    pub best_net_profit_pct: Option<Decimal>,
    pub failure_reasons: BTreeMap<FailureReason, u64>,
}

impl CumulativeStats {
    fn absorb(&mut self, pass: &SelectionStats, selected: bool) {
        self.passes += 1;
        self.paths_simulated += pass.total_paths as u64;
        self.executable_found += pass.executable as u64;
        if selected {
            self.opportunities_selected += 1;
        }
        if let Some(best) = pass.best_net_profit_pct {
            self.best_net_profit_pct = Some(self.best_net_profit_pct.map_or(best, |b| b.max(best)));
        }
        for (reason, count) in &pass.failure_reasons {
            *self.failure_reasons.entry(*reason).or_insert(0) += *count as u64;
        }
    }
}

pub struct OpportunitySelector {
    simulator: PathSimulator,
    pricing: ExecutionPricing,
    last_stats: SelectionStats,
    cumulative: CumulativeStats,
    records: Option<Arc<dyn RecordSink>>,
}

impl OpportunitySelector {
    pub fn new(simulator: PathSimulator, pricing: ExecutionPricing) -> Self {
        Self {
            simulator,
            pricing,
            last_stats: SelectionStats::default(),
            cumulative: CumulativeStats::default(),
            records: None,
        }
    }

    pub fn with_record_sink(mut self, records: Arc<dyn RecordSink>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn simulator(&self) -> &PathSimulator {
        &self.simulator
    }

    pub fn pricing(&self) -> &ExecutionPricing {
        &self.pricing
    }

    pub fn last_stats(&self) -> &SelectionStats {
        &self.last_stats
    }

    pub fn cumulative(&self) -> &CumulativeStats {
        &self.cumulative
    }

    pub fn select_best(
        &mut self,
        paths: &[ArbitragePath],
        notional: Decimal,
        cache: &LiquidityCache,
    ) -> Option<ArbitrageOpportunity> {
        self.select_best_at(paths, notional, cache, now_millis())
    }

    /// Simulate every path, rank by net profit, and return the best executable one
    pub fn select_best_at(
        &mut self,
        paths: &[ArbitragePath],
        notional: Decimal,
        cache: &LiquidityCache,
        now_ms: u64,
    ) -> Option<ArbitrageOpportunity> {
        let mut ranked: Vec<(usize, PathSimulationResult)> = paths
            .iter()
            .enumerate()
            .map(|(index, path)| (index, self.simulator.simulate_at(path, notional, cache, now_ms)))
            .collect();

        if let Some(records) = &self.records {
            for (_, result) in &ranked {
                records.record_simulation(result);
            }
        }

        ranked.sort_by(|(_, a), (_, b)| rank(a, b));

        let results: Vec<PathSimulationResult> = ranked.iter().map(|(_, r)| r.clone()).collect();
        let stats = SelectionStats::from_results(&results);

        let opportunity = ranked
            .into_iter()
            .find(|(_, result)| result.is_executable)
            .and_then(|(index, result)| self.build_opportunity(&paths[index], result));

        debug!(
            "Selection pass: {} paths, {} executable, reasons {:?}",
            stats.total_paths, stats.executable, stats.failure_reasons
        );
        self.cumulative.absorb(&stats, opportunity.is_some());
        self.last_stats = stats;

        if let Some(opp) = &opportunity {
            info!(
                "💰 {} opportunity {} [{}] net {}% ({} {}) impact {} fee {} µlamports/CU",
                opp.tier(),
                opp.simulation.path_id,
                opp.simulation.route,
                opp.simulation.net_profit_pct.round_dp(4),
                opp.simulation.net_profit.round_dp(6),
                opp.simulation.legs.first().map(|l| l.token_in.as_str()).unwrap_or(""),
                opp.simulation.total_price_impact.round_dp(6),
                opp.priority_fee_micro_lamports
            );
        }
        opportunity
    }

    fn build_opportunity(&self, path: &ArbitragePath, simulation: PathSimulationResult) -> Option<ArbitrageOpportunity> {
        // an executable result always simulated at least one snapshot
        let quote_captured_at_ms = simulation.quote_captured_at_ms?;
        Some(ArbitrageOpportunity {
            id: generate_id(),
            path: path.clone(),
            priority_fee_micro_lamports: self.pricing.priority_fee(simulation.net_profit_pct),
            slippage_bps: self.pricing.slippage_bps,
            quote_captured_at_ms,
            selected_at: Utc::now(),
            is_optimal: simulation.net_profit_pct >= self.pricing.optimal_profit_pct,
            simulation,
        })
    }
}

/// Net profit descending, then lower aggregate impact, then path id
fn rank(a: &PathSimulationResult, b: &PathSimulationResult) -> Ordering {
    b.net_profit_pct
        .cmp(&a.net_profit_pct)
        .then_with(|| a.total_price_impact.cmp(&b.total_price_impact))
        .then_with(|| a.path_id.cmp(&b.path_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::arbitrage::fixtures::{cache_with, pool_with_fee, tokens, NOW};
    use crate::domain::arbitrage::{PathGenerator, ProfitThresholds, SimulationThresholds};
    use crate::domain::pool::PoolRegistry;
    use std::sync::Mutex;

    fn thresholds() -> SimulationThresholds {
        SimulationThresholds {
            min_profit: ProfitThresholds::default(),
            max_hop_price_impact: dec!(0.02),
            max_total_price_impact: dec!(0.05),
            min_hop_liquidity: dec!(100),
            min_total_liquidity: dec!(200),
            estimated_network_cost: Decimal::ZERO,
        }
    }

    fn market() -> (Vec<ArbitragePath>, LiquidityCache, OpportunitySelector) {
        let (usdc, sol, bonk, _) = tokens();
        let registry = PoolRegistry::from_pools(vec![
            pool_with_fee("a", &usdc, &sol, Decimal::ZERO),
            pool_with_fee("b", &sol, &usdc, Decimal::ZERO),
            pool_with_fee("c", &usdc, &bonk, Decimal::ZERO),
            pool_with_fee("d", &bonk, &usdc, Decimal::ZERO),
        ]);
        let cache = cache_with(
            &registry,
            &usdc,
            &[("a", dec!(1_500_000), dec!(10_000), NOW), ("b", dec!(10_000), dec!(1_600_000), NOW)],
        );
        let paths = PathGenerator::new(usdc.clone()).generate(&registry);
        let selector = OpportunitySelector::new(PathSimulator::new(usdc.mint, thresholds()), ExecutionPricing::default());
        (paths, cache, selector)
    }

    #[test]
    fn test_selects_highest_net_profit() {
        let (paths, cache, mut selector) = market();
        assert_eq!(paths.len(), 8);

        let opp = selector.select_best_at(&paths, dec!(1000), &cache, NOW).unwrap();
        // the edge is far from exhausted at this size, so looping it twice still pays more
        assert_eq!(opp.simulation.path_id, "4h:a>b>a>b");
        assert!(opp.simulation.is_executable);
        assert_eq!(opp.quote_captured_at_ms, NOW);
        assert_eq!(opp.slippage_bps, 50);
        assert!(opp.is_optimal);
        assert_eq!(opp.path.id, opp.simulation.path_id);
    }

    #[test]
    fn test_repeat_loop_loses_once_first_pass_moves_pools() {
        let (paths, cache, _) = market();
        let base = paths[0].hops[0].token_in.mint;
        let thresholds = SimulationThresholds {
            max_total_price_impact: dec!(0.1),
            ..thresholds()
        };
        let mut selector = OpportunitySelector::new(PathSimulator::new(base, thresholds), ExecutionPricing::default());

        let opp = selector.select_best_at(&paths, dec!(20_000), &cache, NOW).unwrap();
        assert_eq!(opp.simulation.path_id, "2h:a>b");
        assert_eq!(selector.last_stats().executable_by_hops.get(&4), Some(&1));
    }

    #[test]
    fn test_aggregate_statistics() {
        let (paths, cache, mut selector) = market();
        selector.select_best_at(&paths, dec!(1000), &cache, NOW);
        let stats = selector.last_stats();

        assert_eq!(stats.total_paths, 8);
        assert_eq!(stats.executable, 2);
        assert_eq!(stats.executable_by_hops.get(&2), Some(&1));
        assert_eq!(stats.executable_by_hops.get(&4), Some(&1));
        assert_eq!(stats.failure_reasons.get(&FailureReason::StaleOrMissingLiquidity), Some(&4));
        assert_eq!(stats.failure_reasons.get(&FailureReason::BelowProfitThreshold), Some(&2));
        let average = stats.average_net_profit_pct.unwrap();
        let best = stats.best_net_profit_pct.unwrap();
        assert!(average > Decimal::ZERO && average < best);
    }

    #[test]
    fn test_none_when_nothing_executable() {
        let (paths, cache, mut selector) = market();
        // every snapshot is stale by now
        assert!(selector.select_best_at(&paths, dec!(1000), &cache, NOW + 60_000).is_none());
        assert_eq!(selector.last_stats().executable, 0);
        assert_eq!(
            selector.last_stats().failure_reasons.get(&FailureReason::StaleOrMissingLiquidity),
            Some(&8)
        );
    }

    #[test]
    fn test_cumulative_statistics() {
        let (paths, cache, mut selector) = market();
        selector.select_best_at(&paths, dec!(1000), &cache, NOW);
        selector.select_best_at(&paths, dec!(1000), &cache, NOW + 60_000);
        let totals = selector.cumulative();
        assert_eq!(totals.passes, 2);
        assert_eq!(totals.paths_simulated, 16);
        assert_eq!(totals.opportunities_selected, 1);
        assert_eq!(totals.failure_reasons.get(&FailureReason::StaleOrMissingLiquidity), Some(&12));
        assert!(totals.best_net_profit_pct.is_some());
    }

    #[test]
    fn test_tie_break_prefers_lower_impact() {
        let (paths, cache, _) = market();
        let simulator = PathSimulator::new(paths[0].hops[0].token_in.mint, thresholds());
        let base = simulator.simulate_at(&paths[0], dec!(1000), &cache, NOW);

        let mut calm = base.clone();
        calm.path_id = "z-calm".to_string();
        calm.total_price_impact = dec!(0.001);
        let mut rough = base.clone();
        rough.path_id = "a-rough".to_string();
        rough.total_price_impact = dec!(0.01);

        let mut results = vec![rough, calm];
        results.sort_by(rank);
        assert_eq!(results[0].path_id, "z-calm");

        let mut richer = base.clone();
        richer.net_profit_pct += dec!(1);
        richer.total_price_impact = dec!(0.04);
        results.push(richer);
        results.sort_by(rank);
        assert_eq!(results[0].total_price_impact, dec!(0.04));
    }

    #[test]
    fn test_priority_fee_is_monotonic_and_capped() {
        let pricing = ExecutionPricing::default();
        let low = pricing.priority_fee(dec!(0.2));
        let mid = pricing.priority_fee(dec!(0.8));
        let high = pricing.priority_fee(dec!(5));
        assert!(low < mid && mid < high);
        assert_eq!(low, 10_000 + 20 * 1_000);
        assert_eq!(pricing.priority_fee(dec!(1000)), pricing.max_priority_fee_micro_lamports);
        assert_eq!(pricing.priority_fee(dec!(-3)), pricing.base_priority_fee_micro_lamports);
    }

    struct CountingSink(Mutex<usize>);

    impl RecordSink for CountingSink {
        fn record_simulation(&self, _: &PathSimulationResult) {
            *self.0.lock().unwrap() += 1;
        }

        fn record_execution(&self, _: &crate::domain::execution::ExecutionAttempt) {}
    }

    #[test]
    fn test_every_simulation_is_recorded() {
        let (paths, cache, selector) = market();
        let sink = Arc::new(CountingSink(Mutex::new(0)));
        let mut selector = selector.with_record_sink(sink.clone());
        selector.select_best_at(&paths, dec!(1000), &cache, NOW);
        assert_eq!(*sink.0.lock().unwrap(), 8);
    }
}
