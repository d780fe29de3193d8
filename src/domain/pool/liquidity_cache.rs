//! Most recent reserve reading per pool

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use tracing::debug;

use super::Pool;

/// Raw reading pushed by a price-feed collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveUpdate {
    pub pool_id: String,
    pub reserve_a: Decimal,
    pub reserve_b: Decimal,
    /// Whirlpool-style Q64.64 square-root price, for concentrated-liquidity pools
    pub sqrt_price_x64: Option<u128>,
    pub liquidity: Option<u128>,
    pub tick_current_index: Option<i32>,
    pub captured_at_ms: u64,
}

impl ReserveUpdate {
    pub fn reserves(pool_id: impl Into<String>, reserve_a: Decimal, reserve_b: Decimal, captured_at_ms: u64) -> Self {
        Self {
            pool_id: pool_id.into(),
            reserve_a,
            reserve_b,
            sqrt_price_x64: None,
            liquidity: None,
            tick_current_index: None,
            captured_at_ms,
        }
    }
}

/// Message from a price-feed collaborator to the snapshot owner
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Reserves(ReserveUpdate),
    /// Oracle price of a non-base token, in the base currency
    BasePrice { mint: Pubkey, price: Decimal },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquiditySnapshot {
    pub pool_id: String,
    pub reserve_a: Decimal,
    pub reserve_b: Decimal,
    pub sqrt_price_x64: Option<u128>,
    pub liquidity: Option<u128>,
    pub tick_current_index: Option<i32>,
    /// Pool depth valued in the base currency. `None` when the valuation overflowed.
    pub liquidity_quote: Option<Decimal>,
    pub captured_at_ms: u64,
}

impl LiquiditySnapshot {
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.captured_at_ms)
    }
}

/// Snapshot store owned by the monitor; simulation passes borrow it read-only.
#[derive(Debug, Clone)]
pub struct LiquidityCache {
    base_mint: Pubkey,
    max_age_ms: u64,
    snapshots: HashMap<String, LiquiditySnapshot>,
    /// (token_a, token_b) mints of every pool with a snapshot
    pairs: HashMap<String, (Pubkey, Pubkey)>,
    base_prices: HashMap<Pubkey, Decimal>,
}

impl LiquidityCache {
    pub fn new(base_mint: Pubkey, max_age_ms: u64) -> Self {
        Self {
            base_mint,
            max_age_ms,
            snapshots: HashMap::new(),
            pairs: HashMap::new(),
            base_prices: HashMap::new(),
        }
    }

    pub fn max_age_ms(&self) -> u64 {
        self.max_age_ms
    }

    /// Record an oracle price of `mint` denominated in the base currency and
    /// revalue the cached snapshots that depend on it
    pub fn set_base_price(&mut self, mint: Pubkey, price: Decimal) {
        self.base_prices.insert(mint, price);
        for (pool_id, snapshot) in self.snapshots.iter_mut() {
            let Some(&pair) = self.pairs.get(pool_id) else {
                continue;
            };
            if pair.0 == mint || pair.1 == mint {
                snapshot.liquidity_quote = Self::estimate_liquidity(
                    self.base_mint,
                    &self.base_prices,
                    pair,
                    snapshot.reserve_a,
                    snapshot.reserve_b,
                );
            }
        }
    }

    /// Overwrite the pool's snapshot. Readings older than the stored one are ignored.
    pub fn apply(&mut self, pool: &Pool, update: ReserveUpdate) -> bool {
        if let Some(existing) = self.snapshots.get(&update.pool_id) {
            if existing.captured_at_ms > update.captured_at_ms {
                debug!(
                    "Ignoring out-of-order snapshot for {} ({} < {})",
                    update.pool_id, update.captured_at_ms, existing.captured_at_ms
                );
                return false;
            }
        }

        let pair = (pool.token_a.mint, pool.token_b.mint);
        let liquidity_quote =
            Self::estimate_liquidity(self.base_mint, &self.base_prices, pair, update.reserve_a, update.reserve_b);
        if liquidity_quote.is_none() {
            debug!("Liquidity valuation overflowed for {}", update.pool_id);
        }
        self.pairs.insert(update.pool_id.clone(), pair);
        let snapshot = LiquiditySnapshot {
            pool_id: update.pool_id.clone(),
            reserve_a: update.reserve_a,
            reserve_b: update.reserve_b,
            sqrt_price_x64: update.sqrt_price_x64,
            liquidity: update.liquidity,
            tick_current_index: update.tick_current_index,
            liquidity_quote,
            captured_at_ms: update.captured_at_ms,
        };
        self.snapshots.insert(update.pool_id, snapshot);
        true
    }

    /// Snapshot if present and not older than the configured max age
    pub fn fresh(&self, pool_id: &str, now_ms: u64) -> Option<&LiquiditySnapshot> {
        self.snapshots
            .get(pool_id)
            .filter(|snapshot| snapshot.age_ms(now_ms) <= self.max_age_ms)
    }

    pub fn get(&self, pool_id: &str) -> Option<&LiquiditySnapshot> {
        self.snapshots.get(pool_id)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Value both sides of the pool in the base currency. Zero when neither
    /// side is the base currency and no oracle price is known; `None` on overflow.
    fn estimate_liquidity(
        base_mint: Pubkey,
        base_prices: &HashMap<Pubkey, Decimal>,
        (mint_a, mint_b): (Pubkey, Pubkey),
        reserve_a: Decimal,
        reserve_b: Decimal,
    ) -> Option<Decimal> {
        let (side, price) = if mint_a == base_mint {
            (reserve_a, Decimal::ONE)
        } else if mint_b == base_mint {
            (reserve_b, Decimal::ONE)
        } else if let Some(price) = base_prices.get(&mint_a) {
            (reserve_a, *price)
        } else if let Some(price) = base_prices.get(&mint_b) {
            (reserve_b, *price)
        } else {
            return Some(Decimal::ZERO);
        };
        side.checked_mul(price)?.checked_mul(Decimal::TWO)
    }
}
