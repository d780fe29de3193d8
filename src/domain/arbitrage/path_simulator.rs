//! Replays a path's swap chain against the liquidity snapshots

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

use super::amm_math::{self, Overflow};
use super::path_generator::{ArbitragePath, PathHop};
use super::quote::QuoteProvider;
use crate::domain::pool::{LiquidityCache, LiquiditySnapshot, Pool};
use crate::shared::errors::FailureReason;
use crate::shared::types::{SwapDirection, VenueKind};
use crate::shared::utils::{now_millis, serialize_display};

/// Minimum net profit, in percent, per hop count. Must increase with hops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProfitThresholds {
    pub two_hop_pct: Decimal,
    pub three_hop_pct: Decimal,
    pub four_hop_pct: Decimal,
}

impl ProfitThresholds {
    pub fn for_hops(&self, hops: usize) -> Decimal {
        match hops {
            0..=2 => self.two_hop_pct,
            3 => self.three_hop_pct,
            _ => self.four_hop_pct,
        }
    }

    pub fn is_monotonic(&self) -> bool {
        self.two_hop_pct < self.three_hop_pct && self.three_hop_pct < self.four_hop_pct
    }
}

impl Default for ProfitThresholds {
    fn default() -> Self {
        Self {
            two_hop_pct: dec!(0.15),
            three_hop_pct: dec!(0.3),
            four_hop_pct: dec!(1.5),
        }
    }
}

/// Risk limits applied per leg and per path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationThresholds {
    pub min_profit: ProfitThresholds,
    /// Fraction
    pub max_hop_price_impact: Decimal,
    /// Fraction, summed over legs
    pub max_total_price_impact: Decimal,
    /// Base currency
    pub min_hop_liquidity: Decimal,
    /// Base currency, summed over legs
    pub min_total_liquidity: Decimal,
    /// Expected transaction cost in the base currency, deducted from gross profit
    pub estimated_network_cost: Decimal,
}

impl Default for SimulationThresholds {
    fn default() -> Self {
        Self {
            min_profit: ProfitThresholds::default(),
            max_hop_price_impact: dec!(0.02),
            max_total_price_impact: dec!(0.05),
            min_hop_liquidity: dec!(1000),
            min_total_liquidity: dec!(5000),
            estimated_network_cost: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapLegResult {
    pub pool_id: String,
    pub token_in: String,
    pub token_out: String,
    #[serde(serialize_with = "serialize_display")]
    pub token_in_mint: Pubkey,
    #[serde(serialize_with = "serialize_display")]
    pub token_out_mint: Pubkey,
    pub direction: SwapDirection,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub price_impact: Decimal,
    pub fee_paid: Decimal,
    pub liquidity_quote: Decimal,
    /// Concentrated-liquidity tick the leg was quoted at
    pub tick_current_index: Option<i32>,
    pub is_valid: bool,
    pub failure_reason: Option<FailureReason>,
}

impl SwapLegResult {
    fn pending(hop: &PathHop, amount_in: Decimal) -> Self {
        Self {
            pool_id: hop.pool.id.clone(),
            token_in: hop.token_in.symbol.clone(),
            token_out: hop.token_out.symbol.clone(),
            token_in_mint: hop.token_in.mint,
            token_out_mint: hop.token_out.mint,
            direction: hop.direction().unwrap_or(SwapDirection::AToB),
            amount_in,
            amount_out: Decimal::ZERO,
            price_impact: Decimal::ZERO,
            fee_paid: Decimal::ZERO,
            liquidity_quote: Decimal::ZERO,
            tick_current_index: None,
            is_valid: false,
            failure_reason: None,
        }
    }

    fn fail(mut self, reason: FailureReason) -> Self {
        self.is_valid = false;
        self.failure_reason = Some(reason);
        self
    }
}

/// Verdict for one path in one simulation pass. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathSimulationResult {
    pub path_id: String,
    pub route: String,
    pub hop_count: usize,
    pub legs: Vec<SwapLegResult>,
    pub notional: Decimal,
    pub final_amount: Decimal,
    pub gross_profit: Decimal,
    pub gross_profit_pct: Decimal,
    pub net_profit: Decimal,
    pub net_profit_pct: Decimal,
    pub total_price_impact: Decimal,
    pub total_liquidity: Decimal,
    pub min_hop_liquidity: Decimal,
    pub is_executable: bool,
    pub failure_reason: Option<FailureReason>,
    /// Capture time of the oldest snapshot the result depends on
    pub quote_captured_at_ms: Option<u64>,
    pub simulation_latency_us: u64,
}

impl PathSimulationResult {
    fn empty(path: &ArbitragePath, notional: Decimal) -> Self {
        Self {
            path_id: path.id.clone(),
            route: path.route(),
            hop_count: path.hop_count(),
            legs: Vec::with_capacity(path.hop_count()),
            notional,
            final_amount: Decimal::ZERO,
            gross_profit: Decimal::ZERO,
            gross_profit_pct: Decimal::ZERO,
            net_profit: Decimal::ZERO,
            net_profit_pct: Decimal::ZERO,
            total_price_impact: Decimal::ZERO,
            total_liquidity: Decimal::ZERO,
            min_hop_liquidity: Decimal::ZERO,
            is_executable: false,
            failure_reason: None,
            quote_captured_at_ms: None,
            simulation_latency_us: 0,
        }
    }

    /// True when every leg simulated and only a path-level threshold failed
    pub fn fully_simulated(&self) -> bool {
        self.legs.len() == self.hop_count && self.legs.iter().all(|leg| leg.is_valid)
    }
}

struct HopPricing {
    amount_out: Decimal,
    price_impact: Decimal,
    /// Pool reserves after the hop, when the hop was priced from reserves
    reserves_after: Option<(Decimal, Decimal)>,
}

pub struct PathSimulator {
    base_mint: Pubkey,
    thresholds: SimulationThresholds,
    quotes: Option<Arc<dyn QuoteProvider>>,
}

impl PathSimulator {
    pub fn new(base_mint: Pubkey, thresholds: SimulationThresholds) -> Self {
        Self {
            base_mint,
            thresholds,
            quotes: None,
        }
    }

    pub fn with_quote_provider(mut self, quotes: Arc<dyn QuoteProvider>) -> Self {
        self.quotes = Some(quotes);
        self
    }

    pub fn thresholds(&self) -> &SimulationThresholds {
        &self.thresholds
    }

    pub fn simulate(&self, path: &ArbitragePath, notional: Decimal, cache: &LiquidityCache) -> PathSimulationResult {
        self.simulate_at(path, notional, cache, now_millis())
    }

    /// Simulate against snapshots as of `now_ms`. The first stale or invalid
    /// leg ends the pass; path-level thresholds run only when every leg is valid.
    pub fn simulate_at(
        &self,
        path: &ArbitragePath,
        notional: Decimal,
        cache: &LiquidityCache,
        now_ms: u64,
    ) -> PathSimulationResult {
        let started = Instant::now();
        let mut result = PathSimulationResult::empty(path, notional);
        let mut amount_in = notional;
        let mut min_liquidity: Option<Decimal> = None;
        // Pools an earlier leg already traded through. `None` marks a quoted
        // venue whose post-trade state is unknown.
        let mut touched: HashMap<&str, Option<(Decimal, Decimal)>> = HashMap::new();

        for hop in &path.hops {
            let leg = SwapLegResult::pending(hop, amount_in);

            let Some(snapshot) = cache.fresh(&hop.pool.id, now_ms) else {
                result.legs.push(leg.fail(FailureReason::StaleOrMissingLiquidity));
                return self.finish(result, Some(FailureReason::StaleOrMissingLiquidity), started);
            };

            result.quote_captured_at_ms = Some(
                result
                    .quote_captured_at_ms
                    .map_or(snapshot.captured_at_ms, |t| t.min(snapshot.captured_at_ms)),
            );

            let prior = touched.get(hop.pool.id.as_str()).copied();
            let leg = match self.simulate_leg(hop, snapshot, prior, leg) {
                Ok((leg, reserves_after)) => {
                    touched.insert(hop.pool.id.as_str(), reserves_after);
                    leg
                }
                Err(leg) => {
                    let reason = leg.failure_reason;
                    result.legs.push(leg);
                    return self.finish(result, reason, started);
                }
            };

            amount_in = leg.amount_out;
            min_liquidity = Some(min_liquidity.map_or(leg.liquidity_quote, |m| m.min(leg.liquidity_quote)));
            result.total_price_impact = match result.total_price_impact.checked_add(leg.price_impact) {
                Some(v) => v,
                None => return self.finish(result, Some(FailureReason::NumericOverflow), started),
            };
            result.total_liquidity = match result.total_liquidity.checked_add(leg.liquidity_quote) {
                Some(v) => v,
                None => return self.finish(result, Some(FailureReason::NumericOverflow), started),
            };
            result.legs.push(leg);
        }

        result.min_hop_liquidity = min_liquidity.unwrap_or(Decimal::ZERO);
        result.final_amount = amount_in;

        let reason = match self.apply_path_thresholds(path, &mut result) {
            Ok(()) => None,
            Err(reason) => Some(reason),
        };
        self.finish(result, reason, started)
    }

    fn simulate_leg(
        &self,
        hop: &PathHop,
        snapshot: &LiquiditySnapshot,
        prior: Option<Option<(Decimal, Decimal)>>,
        mut leg: SwapLegResult,
    ) -> Result<(SwapLegResult, Option<(Decimal, Decimal)>), SwapLegResult> {
        leg.liquidity_quote = match snapshot.liquidity_quote {
            Some(value) => value,
            None => return Err(leg.fail(FailureReason::NumericOverflow)),
        };
        leg.tick_current_index = snapshot.tick_current_index;

        let pricing = match self.swap(hop, snapshot, prior, leg.amount_in, leg.direction) {
            Ok(v) => v,
            Err(reason) => return Err(leg.fail(reason)),
        };
        leg.amount_out = pricing.amount_out;
        leg.price_impact = pricing.price_impact;
        leg.fee_paid = match leg.amount_in.checked_mul(hop.pool.fee_rate) {
            Some(fee) => fee,
            None => return Err(leg.fail(FailureReason::NumericOverflow)),
        };

        if leg.liquidity_quote < self.thresholds.min_hop_liquidity {
            return Err(leg.fail(FailureReason::InsufficientHopLiquidity));
        }
        if leg.price_impact > self.thresholds.max_hop_price_impact {
            return Err(leg.fail(FailureReason::ExcessiveHopPriceImpact));
        }
        if leg.amount_out <= Decimal::ZERO {
            return Err(leg.fail(FailureReason::NonPositiveOutput));
        }

        leg.is_valid = true;
        Ok((leg, pricing.reserves_after))
    }

    /// Price one hop. `prior` holds the pool state an earlier leg of the
    /// same path left behind, so a revisited pool trades against moved reserves.
    fn swap(
        &self,
        hop: &PathHop,
        snapshot: &LiquiditySnapshot,
        prior: Option<Option<(Decimal, Decimal)>>,
        amount_in: Decimal,
        direction: SwapDirection,
    ) -> Result<HopPricing, FailureReason> {
        let pool = &hop.pool;

        let (reserve_a, reserve_b) = match prior {
            Some(Some(reserves)) => reserves,
            // a quote cannot be replayed against the state it moved
            Some(None) => return Err(FailureReason::VenueQuoteUnavailable),
            None => {
                if pool.venue != VenueKind::ConstantProduct {
                    if let Some(quote) = self.quotes.as_ref().and_then(|q| q.quote(pool, amount_in, direction)) {
                        return Ok(HopPricing {
                            amount_out: quote.amount_out,
                            price_impact: quote.price_impact,
                            reserves_after: None,
                        });
                    }
                }
                Self::snapshot_reserves(pool, snapshot)?
            }
        };

        let (reserve_in, reserve_out) = match direction {
            SwapDirection::AToB => (reserve_a, reserve_b),
            SwapDirection::BToA => (reserve_b, reserve_a),
        };
        let amount_out =
            amm_math::constant_product_out(reserve_in, reserve_out, amount_in, pool.fee_rate).map_err(overflow)?;
        let price_impact = amm_math::price_impact(amount_in, reserve_in).map_err(overflow)?;

        // fees stay in the pool
        let moved_in = reserve_in.checked_add(amount_in).ok_or(FailureReason::NumericOverflow)?;
        let moved_out = reserve_out.checked_sub(amount_out).ok_or(FailureReason::NumericOverflow)?;
        let reserves_after = match direction {
            SwapDirection::AToB => (moved_in, moved_out),
            SwapDirection::BToA => (moved_out, moved_in),
        };

        Ok(HopPricing {
            amount_out,
            price_impact,
            reserves_after: Some(reserves_after),
        })
    }

    /// Reserves to run the constant-product formula against
    fn snapshot_reserves(
        pool: &Pool,
        snapshot: &LiquiditySnapshot,
    ) -> Result<(Decimal, Decimal), FailureReason> {
        match pool.venue {
            VenueKind::ConstantProduct => Ok((snapshot.reserve_a, snapshot.reserve_b)),
            VenueKind::ConcentratedLiquidity => match (snapshot.sqrt_price_x64, snapshot.liquidity) {
                (Some(sqrt_price), Some(liquidity)) => {
                    amm_math::virtual_reserves(sqrt_price, liquidity, pool.token_a.decimals, pool.token_b.decimals)
                        .map_err(overflow)
                }
                _ => Err(FailureReason::VenueQuoteUnavailable),
            },
            VenueKind::OrderBook => Err(FailureReason::VenueQuoteUnavailable),
        }
    }

    fn apply_path_thresholds(
        &self,
        path: &ArbitragePath,
        result: &mut PathSimulationResult,
    ) -> Result<(), FailureReason> {
        let final_token = path.hops.last().map(|h| h.token_out.mint);
        if final_token != Some(self.base_mint) {
            return Err(FailureReason::OpenLoop);
        }

        let notional = result.notional;
        result.gross_profit = result.final_amount.checked_sub(notional).ok_or(FailureReason::NumericOverflow)?;
        result.net_profit = result
            .gross_profit
            .checked_sub(self.thresholds.estimated_network_cost)
            .ok_or(FailureReason::NumericOverflow)?;
        if notional > Decimal::ZERO {
            result.gross_profit_pct = percent_of(result.gross_profit, notional)?;
            result.net_profit_pct = percent_of(result.net_profit, notional)?;
        }

        if result.net_profit_pct < self.thresholds.min_profit.for_hops(result.hop_count) {
            return Err(FailureReason::BelowProfitThreshold);
        }
        if result.total_price_impact > self.thresholds.max_total_price_impact {
            return Err(FailureReason::ExcessiveTotalPriceImpact);
        }
        if result.total_liquidity < self.thresholds.min_total_liquidity {
            return Err(FailureReason::InsufficientAggregateLiquidity);
        }
        Ok(())
    }

    fn finish(
        &self,
        mut result: PathSimulationResult,
        reason: Option<FailureReason>,
        started: Instant,
    ) -> PathSimulationResult {
        result.is_executable = reason.is_none();
        result.failure_reason = reason;
        result.simulation_latency_us = started.elapsed().as_micros() as u64;
        trace!(
            "Simulated {} -> executable={} net={}% reason={:?}",
            result.path_id,
            result.is_executable,
            result.net_profit_pct.round_dp(4),
            result.failure_reason
        );
        result
    }
}

fn percent_of(value: Decimal, of: Decimal) -> Result<Decimal, FailureReason> {
    value
        .checked_div(of)
        .and_then(|f| f.checked_mul(Decimal::ONE_HUNDRED))
        .ok_or(FailureReason::NumericOverflow)
}

fn overflow(_: Overflow) -> FailureReason {
    FailureReason::NumericOverflow
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::arbitrage::fixtures::{cache_with, pool_with_fee, tokens, two_pool_path, NOW};
    use crate::domain::arbitrage::quote::VenueQuote;
    use crate::domain::pool::{PoolRegistry, ReserveUpdate};
    use crate::domain::arbitrage::PathGenerator;

    fn loose_thresholds() -> SimulationThresholds {
        SimulationThresholds {
            min_profit: ProfitThresholds {
                two_hop_pct: dec!(0.15),
                three_hop_pct: dec!(0.3),
                four_hop_pct: dec!(1.5),
            },
            max_hop_price_impact: dec!(0.02),
            max_total_price_impact: dec!(0.05),
            min_hop_liquidity: dec!(100),
            min_total_liquidity: dec!(200),
            estimated_network_cost: Decimal::ZERO,
        }
    }

    #[test]
    fn test_profitable_two_hop_cycle() {
        let (usdc, sol, _, _) = tokens();
        // pool a sells SOL cheap (150), pool b buys it dear (160)
        let (path, registry) = two_pool_path(&usdc, &sol, Decimal::ZERO);
        let cache = cache_with(
            &registry,
            &usdc,
            &[("a", dec!(1_500_000), dec!(10_000), NOW), ("b", dec!(10_000), dec!(1_600_000), NOW)],
        );

        let simulator = PathSimulator::new(usdc.mint, loose_thresholds());
        let result = simulator.simulate_at(&path, dec!(1000), &cache, NOW);

        assert!(result.is_executable, "{:?}", result.failure_reason);
        assert_eq!(result.legs.len(), 2);
        assert!(result.net_profit > Decimal::ZERO);
        assert!(result.net_profit_pct > dec!(5));
        assert_eq!(result.quote_captured_at_ms, Some(NOW));
        assert_eq!(result.legs[0].token_out_mint, sol.mint);
    }

    #[test]
    fn test_stale_snapshot_short_circuits() {
        let (usdc, sol, _, _) = tokens();
        let (path, registry) = two_pool_path(&usdc, &sol, Decimal::ZERO);
        // first hop fresh, second hop 5s old against a 2s max age
        let cache = cache_with(
            &registry,
            &usdc,
            &[("a", dec!(1_500_000), dec!(10_000), NOW), ("b", dec!(10_000), dec!(1_600_000), NOW - 5_000)],
        );

        let simulator = PathSimulator::new(usdc.mint, loose_thresholds());
        let result = simulator.simulate_at(&path, dec!(1000), &cache, NOW);

        assert!(!result.is_executable);
        assert_eq!(result.failure_reason, Some(FailureReason::StaleOrMissingLiquidity));
        assert_eq!(result.legs.len(), 2);
        assert!(result.legs[0].is_valid);
        assert_eq!(result.legs[1].failure_reason, Some(FailureReason::StaleOrMissingLiquidity));
        // path-level figures were never evaluated
        assert_eq!(result.net_profit, Decimal::ZERO);
        assert_eq!(result.final_amount, Decimal::ZERO);
    }

    #[test]
    fn test_missing_first_snapshot_stops_immediately() {
        let (usdc, sol, _, _) = tokens();
        let (path, registry) = two_pool_path(&usdc, &sol, Decimal::ZERO);
        let cache = cache_with(&registry, &usdc, &[("b", dec!(10_000), dec!(1_600_000), NOW)]);

        let result = PathSimulator::new(usdc.mint, loose_thresholds()).simulate_at(&path, dec!(1000), &cache, NOW);
        assert_eq!(result.legs.len(), 1);
        assert_eq!(result.failure_reason, Some(FailureReason::StaleOrMissingLiquidity));
    }

    #[test]
    fn test_unprofitable_cycle_reports_threshold() {
        let (usdc, sol, _, _) = tokens();
        let (path, registry) = two_pool_path(&usdc, &sol, dec!(0.003));
        let cache = cache_with(
            &registry,
            &usdc,
            &[("a", dec!(1_500_000), dec!(10_000), NOW), ("b", dec!(10_000), dec!(1_500_000), NOW)],
        );

        let result = PathSimulator::new(usdc.mint, loose_thresholds()).simulate_at(&path, dec!(1000), &cache, NOW);
        assert!(!result.is_executable);
        assert_eq!(result.failure_reason, Some(FailureReason::BelowProfitThreshold));
        assert!(result.fully_simulated());
        assert!(result.net_profit < Decimal::ZERO);
    }

    #[test]
    fn test_hop_price_impact_ceiling() {
        let (usdc, sol, _, _) = tokens();
        let (path, registry) = two_pool_path(&usdc, &sol, Decimal::ZERO);
        // 1000 USDC into a 10_000 USDC reserve is a 10% impact
        let cache = cache_with(
            &registry,
            &usdc,
            &[("a", dec!(10_000), dec!(100), NOW), ("b", dec!(100), dec!(20_000), NOW)],
        );

        let result = PathSimulator::new(usdc.mint, loose_thresholds()).simulate_at(&path, dec!(1000), &cache, NOW);
        assert_eq!(result.failure_reason, Some(FailureReason::ExcessiveHopPriceImpact));
        assert_eq!(result.legs.len(), 1);
    }

    #[test]
    fn test_hop_liquidity_floor() {
        let (usdc, sol, _, _) = tokens();
        let (path, registry) = two_pool_path(&usdc, &sol, Decimal::ZERO);
        let cache = cache_with(
            &registry,
            &usdc,
            &[("a", dec!(40), dec!(1), NOW), ("b", dec!(1), dec!(40), NOW)],
        );

        let result = PathSimulator::new(usdc.mint, loose_thresholds()).simulate_at(&path, dec!(0.001), &cache, NOW);
        assert_eq!(result.failure_reason, Some(FailureReason::InsufficientHopLiquidity));
    }

    #[test]
    fn test_total_liquidity_floor() {
        let (usdc, sol, _, _) = tokens();
        let (path, registry) = two_pool_path(&usdc, &sol, Decimal::ZERO);
        let cache = cache_with(
            &registry,
            &usdc,
            &[("a", dec!(15_000), dec!(100), NOW), ("b", dec!(100), dec!(16_000), NOW)],
        );
        let mut thresholds = loose_thresholds();
        thresholds.min_total_liquidity = dec!(1_000_000);

        let result = PathSimulator::new(usdc.mint, thresholds).simulate_at(&path, dec!(10), &cache, NOW);
        assert_eq!(result.failure_reason, Some(FailureReason::InsufficientAggregateLiquidity));
        assert!(result.fully_simulated());
    }

    #[test]
    fn test_unvaluable_pool_fails_with_overflow() {
        let (usdc, sol, _, _) = tokens();
        let (path, registry) = two_pool_path(&usdc, &sol, Decimal::ZERO);
        let cache = cache_with(
            &registry,
            &usdc,
            &[("a", Decimal::MAX, dec!(10_000), NOW), ("b", dec!(10_000), dec!(1_600_000), NOW)],
        );

        let result = PathSimulator::new(usdc.mint, loose_thresholds()).simulate_at(&path, dec!(1000), &cache, NOW);
        assert_eq!(result.legs.len(), 1);
        assert_eq!(result.failure_reason, Some(FailureReason::NumericOverflow));
    }

    #[test]
    fn test_network_cost_is_deducted() {
        let (usdc, sol, _, _) = tokens();
        let (path, registry) = two_pool_path(&usdc, &sol, Decimal::ZERO);
        let cache = cache_with(
            &registry,
            &usdc,
            &[("a", dec!(1_500_000), dec!(10_000), NOW), ("b", dec!(10_000), dec!(1_600_000), NOW)],
        );
        let mut thresholds = loose_thresholds();
        thresholds.estimated_network_cost = dec!(2);

        let result = PathSimulator::new(usdc.mint, thresholds).simulate_at(&path, dec!(1000), &cache, NOW);
        assert_eq!(result.gross_profit - result.net_profit, dec!(2));
    }

    #[test]
    fn test_four_hop_threshold_exceeds_two_hop() {
        let thresholds = ProfitThresholds::default();
        assert!(thresholds.for_hops(4) > thresholds.for_hops(2));
        assert!(thresholds.for_hops(3) > thresholds.for_hops(2));
        assert!(thresholds.is_monotonic());
    }

    #[test]
    fn test_same_edge_passes_two_hop_but_not_four_hop() {
        let (usdc, sol, _, _) = tokens();
        let registry = PoolRegistry::from_pools(vec![
            pool_with_fee("a", &usdc, &sol, Decimal::ZERO),
            pool_with_fee("b", &sol, &usdc, Decimal::ZERO),
        ]);
        // ~0.6% round-trip edge on a deep book
        let cache = cache_with(
            &registry,
            &usdc,
            &[("a", dec!(150_000_000), dec!(1_000_000), NOW), ("b", dec!(1_000_000), dec!(150_900_000), NOW)],
        );
        let paths = PathGenerator::new(usdc.clone()).generate(&registry);
        let simulator = PathSimulator::new(usdc.mint, loose_thresholds());
        let two = paths.iter().find(|p| p.id == "2h:a>b").unwrap();
        let four = paths.iter().find(|p| p.id == "4h:a>b>a>b").unwrap();

        let two_result = simulator.simulate_at(two, dec!(100), &cache, NOW);
        let four_result = simulator.simulate_at(four, dec!(100), &cache, NOW);
        assert!(two_result.is_executable, "{:?}", two_result.failure_reason);
        assert_eq!(four_result.failure_reason, Some(FailureReason::BelowProfitThreshold));
    }

    #[test]
    fn test_revisited_pool_trades_against_moved_reserves() {
        let (usdc, sol, _, _) = tokens();
        let registry = PoolRegistry::from_pools(vec![
            pool_with_fee("a", &usdc, &sol, Decimal::ZERO),
            pool_with_fee("b", &sol, &usdc, Decimal::ZERO),
        ]);
        let cache = cache_with(
            &registry,
            &usdc,
            &[("a", dec!(1_500_000), dec!(10_000), NOW), ("b", dec!(10_000), dec!(1_600_000), NOW)],
        );
        let paths = PathGenerator::new(usdc.clone()).generate(&registry);
        let two = paths.iter().find(|p| p.id == "2h:a>b").unwrap();
        let four = paths.iter().find(|p| p.id == "4h:a>b>a>b").unwrap();
        let mut thresholds = loose_thresholds();
        thresholds.max_total_price_impact = dec!(0.1);
        let simulator = PathSimulator::new(usdc.mint, thresholds);

        let notional = dec!(20_000);
        let cp = |reserve_in: Decimal, reserve_out: Decimal, amount_in: Decimal| {
            reserve_out * amount_in / (reserve_in + amount_in)
        };
        let (mut a_usdc, mut a_sol) = (dec!(1_500_000), dec!(10_000));
        let (mut b_sol, mut b_usdc) = (dec!(10_000), dec!(1_600_000));
        let sol_1 = cp(a_usdc, a_sol, notional);
        a_usdc += notional;
        a_sol -= sol_1;
        let usdc_1 = cp(b_sol, b_usdc, sol_1);
        b_sol += sol_1;
        b_usdc -= usdc_1;
        let sol_2 = cp(a_usdc, a_sol, usdc_1);
        let usdc_2 = cp(b_sol, b_usdc, sol_2);

        let four_result = simulator.simulate_at(four, notional, &cache, NOW);
        assert!(four_result.is_executable, "{:?}", four_result.failure_reason);
        assert_eq!(four_result.legs[2].amount_out, sol_2);
        assert_eq!(four_result.final_amount, usdc_2);
        // ~2.38% once the first pass has moved both pools
        assert!(four_result.net_profit_pct > dec!(2.3) && four_result.net_profit_pct < dec!(2.4));

        let two_result = simulator.simulate_at(two, notional, &cache, NOW);
        assert!(two_result.net_profit_pct > four_result.net_profit_pct);
    }

    #[test]
    fn test_revisited_quoted_pool_is_unavailable() {
        let (usdc, sol, _, _) = tokens();
        let mut a = pool_with_fee("a", &usdc, &sol, Decimal::ZERO);
        a.venue = VenueKind::OrderBook;
        let registry = PoolRegistry::from_pools(vec![a, pool_with_fee("b", &sol, &usdc, Decimal::ZERO)]);
        let cache = cache_with(
            &registry,
            &usdc,
            &[("a", dec!(1_500_000), dec!(10_000), NOW), ("b", dec!(10_000), dec!(1_600_000), NOW)],
        );
        let quotes: Arc<dyn QuoteProvider> = Arc::new(|_: &Pool, amount_in: Decimal, _: SwapDirection| {
            Some(VenueQuote {
                amount_out: amount_in / dec!(150),
                price_impact: dec!(0.001),
            })
        });
        let four = PathGenerator::new(usdc.clone())
            .generate(&registry)
            .into_iter()
            .find(|p| p.id == "4h:a>b>a>b")
            .unwrap();

        let result = PathSimulator::new(usdc.mint, loose_thresholds())
            .with_quote_provider(quotes)
            .simulate_at(&four, dec!(1000), &cache, NOW);
        assert_eq!(result.legs.len(), 3);
        assert!(result.legs[0].is_valid && result.legs[1].is_valid);
        assert_eq!(result.failure_reason, Some(FailureReason::VenueQuoteUnavailable));
    }

    #[test]
    fn test_order_book_without_quote_is_unavailable() {
        let (usdc, sol, _, _) = tokens();
        let mut a = pool_with_fee("a", &usdc, &sol, Decimal::ZERO);
        a.venue = VenueKind::OrderBook;
        let b = pool_with_fee("b", &sol, &usdc, Decimal::ZERO);
        let registry = PoolRegistry::from_pools(vec![a, b]);
        let path = PathGenerator::new(usdc.clone()).generate(&registry).remove(0);
        let cache = cache_with(
            &registry,
            &usdc,
            &[("a", dec!(1_500_000), dec!(10_000), NOW), ("b", dec!(10_000), dec!(1_600_000), NOW)],
        );

        let simulator = PathSimulator::new(usdc.mint, loose_thresholds());
        let result = simulator.simulate_at(&path, dec!(1000), &cache, NOW);
        assert_eq!(result.failure_reason, Some(FailureReason::VenueQuoteUnavailable));

        let quotes: Arc<dyn QuoteProvider> = Arc::new(|_: &crate::domain::pool::Pool, amount_in: Decimal, _: SwapDirection| {
            Some(VenueQuote {
                amount_out: amount_in / dec!(150),
                price_impact: dec!(0.001),
            })
        });
        let simulator = PathSimulator::new(usdc.mint, loose_thresholds()).with_quote_provider(quotes);
        let result = simulator.simulate_at(&path, dec!(1000), &cache, NOW);
        assert!(result.legs[0].is_valid);
        assert_eq!(result.legs[0].price_impact, dec!(0.001));
    }

    #[test]
    fn test_concentrated_liquidity_uses_virtual_reserves() {
        let (usdc, sol, _, _) = tokens();
        let mut a = pool_with_fee("a", &usdc, &sol, Decimal::ZERO);
        a.venue = VenueKind::ConcentratedLiquidity;
        a.token_a.decimals = 6;
        a.token_b.decimals = 6;
        let registry = PoolRegistry::from_pools(vec![a.clone(), pool_with_fee("b", &sol, &usdc, Decimal::ZERO)]);
        let mut cache = cache_with(&registry, &usdc, &[("b", dec!(10_000), dec!(1_000_000), NOW)]);
        cache.apply(
            &a,
            ReserveUpdate {
                pool_id: "a".to_string(),
                reserve_a: dec!(1_000_000),
                reserve_b: dec!(1_000_000),
                sqrt_price_x64: Some(1u128 << 64),
                liquidity: Some(1_000_000_000_000),
                tick_current_index: Some(0),
                captured_at_ms: NOW,
            },
        );
        let path = PathGenerator::new(usdc.clone()).generate(&registry).remove(0);

        let result = PathSimulator::new(usdc.mint, loose_thresholds()).simulate_at(&path, dec!(1000), &cache, NOW);
        let leg = &result.legs[0];
        assert!(leg.is_valid, "{:?}", leg.failure_reason);
        // virtual reserves are 1_000_000 / 1_000_000 at unit price
        let expected = dec!(1_000_000) * dec!(1000) / dec!(1_001_000);
        assert!((leg.amount_out - expected).abs() < dec!(0.000001));
    }
}
