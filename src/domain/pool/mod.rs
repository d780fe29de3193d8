//! Pool domain - static pool catalogue and live reserve snapshots

mod pool_registry;
mod liquidity_cache;

pub use pool_registry::{MarketAccounts, Pool, PoolRegistry};
pub use liquidity_cache::{FeedEvent, LiquidityCache, LiquiditySnapshot, ReserveUpdate};
