//! Static catalogue of liquidity pools

use rust_decimal::Decimal;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::Arc;

use crate::shared::types::{SwapDirection, Token, VenueKind};

/// Order-book market a Raydium V4 AMM settles against. Token A is the coin
/// side, token B the pc side.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketAccounts {
    pub amm_authority: Pubkey,
    pub open_orders: Pubkey,
    pub target_orders: Pubkey,
    pub program: Pubkey,
    pub market: Pubkey,
    pub bids: Pubkey,
    pub asks: Pubkey,
    pub event_queue: Pubkey,
    pub coin_vault: Pubkey,
    pub pc_vault: Pubkey,
    pub vault_signer: Pubkey,
}

/// A liquidity pool. Immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pool {
    pub id: String,
    pub name: String,
    pub address: Pubkey,
    pub venue: VenueKind,
    pub token_a: Token,
    pub token_b: Token,
    /// Fraction, e.g. 0.0025 for 25 bps
    pub fee_rate: Decimal,
    pub tick_spacing: Option<u16>,
    pub vault_a: Option<Pubkey>,
    pub vault_b: Option<Pubkey>,
    #[serde(skip)]
    pub market: Option<MarketAccounts>,
}

impl Pool {
    pub fn contains(&self, mint: &Pubkey) -> bool {
        self.token_a.mint == *mint || self.token_b.mint == *mint
    }

    /// The other side of the pair, if `mint` belongs to this pool
    pub fn counterpart(&self, mint: &Pubkey) -> Option<&Token> {
        if self.token_a.mint == *mint {
            Some(&self.token_b)
        } else if self.token_b.mint == *mint {
            Some(&self.token_a)
        } else {
            None
        }
    }

    pub fn token(&self, mint: &Pubkey) -> Option<&Token> {
        if self.token_a.mint == *mint {
            Some(&self.token_a)
        } else if self.token_b.mint == *mint {
            Some(&self.token_b)
        } else {
            None
        }
    }

    pub fn direction(&self, token_in: &Pubkey, token_out: &Pubkey) -> Option<SwapDirection> {
        if self.token_a.mint == *token_in && self.token_b.mint == *token_out {
            Some(SwapDirection::AToB)
        } else if self.token_b.mint == *token_in && self.token_a.mint == *token_out {
            Some(SwapDirection::BToA)
        } else {
            None
        }
    }

    pub fn connects(&self, x: &Pubkey, y: &Pubkey) -> bool {
        self.direction(x, y).is_some()
    }
}

/// Ordered pool catalogue. Iteration order is load order, which keeps path
/// generation deterministic.
#[derive(Debug, Clone, Default)]
pub struct PoolRegistry {
    pools: Vec<Arc<Pool>>,
    by_id: HashMap<String, usize>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pools(pools: impl IntoIterator<Item = Pool>) -> Self {
        let mut registry = Self::new();
        for pool in pools {
            registry.insert(pool);
        }
        registry
    }

    /// Insert a pool; a duplicate id replaces the earlier entry in place.
    pub fn insert(&mut self, pool: Pool) {
        if let Some(&index) = self.by_id.get(&pool.id) {
            self.pools[index] = Arc::new(pool);
            return;
        }
        self.by_id.insert(pool.id.clone(), self.pools.len());
        self.pools.push(Arc::new(pool));
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Pool>> {
        self.by_id.get(id).map(|&index| &self.pools[index])
    }

    pub fn pools(&self) -> &[Arc<Pool>] {
        &self.pools
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Pools trading the pair (x, y) in either orientation, in load order
    pub fn pools_between(&self, x: &Pubkey, y: &Pubkey) -> Vec<Arc<Pool>> {
        self.pools
            .iter()
            .filter(|pool| pool.connects(x, y))
            .cloned()
            .collect()
    }

    /// Tokens paired directly with `base`, in order of first appearance
    pub fn tokens_paired_with(&self, base: &Pubkey) -> Vec<Token> {
        let mut seen = Vec::<Token>::new();
        for pool in &self.pools {
            if let Some(other) = pool.counterpart(base) {
                if other.mint != *base && !seen.iter().any(|t| t.mint == other.mint) {
                    seen.push(other.clone());
                }
            }
        }
        seen
    }
}
