//! Closed trade-cycle enumeration over the pool registry

use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::pool::{Pool, PoolRegistry};
use crate::shared::errors::FailureReason;
use crate::shared::types::{SwapDirection, Token};

pub const MIN_HOPS: usize = 2;
pub const MAX_HOPS: usize = 4;

/// One swap through one pool
#[derive(Debug, Clone, PartialEq)]
pub struct PathHop {
    pub pool: Arc<Pool>,
    pub token_in: Token,
    pub token_out: Token,
}

impl PathHop {
    fn new(pool: &Arc<Pool>, token_in: &Token) -> Option<Self> {
        let token_out = pool.counterpart(&token_in.mint)?.clone();
        Some(Self {
            pool: Arc::clone(pool),
            token_in: token_in.clone(),
            token_out,
        })
    }

    pub fn direction(&self) -> Option<SwapDirection> {
        self.pool.direction(&self.token_in.mint, &self.token_out.mint)
    }
}

/// Ordered loop of 2-4 pools starting and ending in the base currency
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitragePath {
    pub id: String,
    pub hops: Vec<PathHop>,
}

impl ArbitragePath {
    pub fn new(hops: Vec<PathHop>) -> Self {
        let pool_ids: Vec<&str> = hops.iter().map(|h| h.pool.id.as_str()).collect();
        Self {
            id: format!("{}h:{}", hops.len(), pool_ids.join(">")),
            hops,
        }
    }

    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    /// Human-readable token route, e.g. `USDC -> SOL -> USDC`
    pub fn route(&self) -> String {
        let mut symbols: Vec<&str> = Vec::with_capacity(self.hops.len() + 1);
        if let Some(first) = self.hops.first() {
            symbols.push(first.token_in.symbol.as_str());
        }
        symbols.extend(self.hops.iter().map(|h| h.token_out.symbol.as_str()));
        symbols.join(" -> ")
    }

    /// Closed-loop invariant: hop i's output feeds hop i+1 and both ends are `base`.
    pub fn validate(&self, base: &Pubkey) -> Result<(), FailureReason> {
        if !(MIN_HOPS..=MAX_HOPS).contains(&self.hops.len()) {
            return Err(FailureReason::OpenLoop);
        }
        let first = &self.hops[0];
        let last = &self.hops[self.hops.len() - 1];
        if first.token_in.mint != *base || last.token_out.mint != *base {
            return Err(FailureReason::OpenLoop);
        }
        for hop in &self.hops {
            if hop.direction().is_none() {
                return Err(FailureReason::OpenLoop);
            }
        }
        for pair in self.hops.windows(2) {
            if pair[0].token_out.mint != pair[1].token_in.mint {
                return Err(FailureReason::OpenLoop);
            }
        }
        Ok(())
    }
}

/// Enumerates exactly four cycle shapes per intermediate token X (and Y):
/// base>X>base, base>X>Y>base, base>X>Y>X>base and base>X>base>X>base.
/// Consecutive hops never reuse a pool.
pub struct PathGenerator {
    base: Token,
}

impl PathGenerator {
    pub fn new(base: Token) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &Token {
        &self.base
    }

    /// Pure function of the registry: same registry, same ids, same order.
    pub fn generate(&self, registry: &PoolRegistry) -> Vec<ArbitragePath> {
        let base = &self.base;
        let intermediates = registry.tokens_paired_with(&base.mint);
        let mut candidates: Vec<Vec<PathHop>> = Vec::new();

        // base -> X -> base
        for x in &intermediates {
            let legs = registry.pools_between(&base.mint, &x.mint);
            for p1 in &legs {
                for p2 in &legs {
                    if p1.id == p2.id {
                        continue;
                    }
                    candidates.push(self.chain(&[p1, p2]));
                }
            }
        }

        // base -> X -> Y -> base
        for x in &intermediates {
            for y in &intermediates {
                if x.mint == y.mint {
                    continue;
                }
                let first = registry.pools_between(&base.mint, &x.mint);
                let middle = registry.pools_between(&x.mint, &y.mint);
                let last = registry.pools_between(&y.mint, &base.mint);
                for p1 in &first {
                    for p2 in &middle {
                        for p3 in &last {
                            candidates.push(self.chain(&[p1, p2, p3]));
                        }
                    }
                }
            }
        }

        // base -> X -> Y -> X -> base
        for x in &intermediates {
            let outer = registry.pools_between(&base.mint, &x.mint);
            for y in neighbours(registry, &x.mint, &base.mint) {
                let inner = registry.pools_between(&x.mint, &y.mint);
                for p1 in &outer {
                    for p2 in &inner {
                        for p3 in &inner {
                            if p2.id == p3.id {
                                continue;
                            }
                            for p4 in &outer {
                                candidates.push(self.chain(&[p1, p2, p3, p4]));
                            }
                        }
                    }
                }
            }
        }

        // base <-> X twice
        for x in &intermediates {
            let legs = registry.pools_between(&base.mint, &x.mint);
            for p1 in &legs {
                for p2 in &legs {
                    if p1.id == p2.id {
                        continue;
                    }
                    candidates.push(self.chain(&[p1, p2, p1, p2]));
                }
            }
        }

        let mut paths = Vec::with_capacity(candidates.len());
        for hops in candidates {
            if hops.is_empty() {
                continue;
            }
            let path = ArbitragePath::new(hops);
            match path.validate(&base.mint) {
                Ok(()) => paths.push(path),
                Err(reason) => warn!("Rejecting generated path {}: {}", path.id, reason),
            }
        }

        info!(
            "🧭 Generated {} cycles over {} pools ({} intermediate tokens)",
            paths.len(),
            registry.len(),
            intermediates.len()
        );
        for path in &paths {
            debug!("   {} [{}]", path.id, path.route());
        }
        paths
    }

    /// Walk the pools starting from the base token. Empty on a broken link.
    fn chain(&self, pools: &[&Arc<Pool>]) -> Vec<PathHop> {
        let mut hops = Vec::with_capacity(pools.len());
        let mut token_in = self.base.clone();
        for pool in pools {
            match PathHop::new(pool, &token_in) {
                Some(hop) => {
                    token_in = hop.token_out.clone();
                    hops.push(hop);
                }
                None => return Vec::new(),
            }
        }
        hops
    }
}

/// Tokens paired with `x`, excluding `x` and `base`, in first-seen order
fn neighbours(registry: &PoolRegistry, x: &Pubkey, base: &Pubkey) -> Vec<Token> {
    let mut seen: Vec<Token> = Vec::new();
    for pool in registry.pools() {
        if let Some(other) = pool.counterpart(x) {
            if other.mint != *base && other.mint != *x && !seen.iter().any(|t| t.mint == other.mint) {
                seen.push(other.clone());
            }
        }
    }
    seen
}
