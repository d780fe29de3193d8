//! Polls pool vault balances and pushes reserve updates to the monitor

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::pool::{FeedEvent, Pool, PoolRegistry, ReserveUpdate};
use crate::infrastructure::rpc::RpcManager;
use crate::shared::errors::RpcError;
use crate::shared::types::VenueKind;
use crate::shared::utils::{now_millis, raw_amount_to_decimal};

/// Whirlpool account offsets (after the 8-byte discriminator, config, bump,
/// tick spacing, seed and fee fields)
const WHIRLPOOL_LIQUIDITY_OFFSET: usize = 49;
const WHIRLPOOL_SQRT_PRICE_OFFSET: usize = 65;
const WHIRLPOOL_TICK_OFFSET: usize = 81;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WhirlpoolState {
    pub sqrt_price_x64: u128,
    pub liquidity: u128,
    pub tick_current_index: i32,
}

pub fn parse_whirlpool_state(data: &[u8]) -> Option<WhirlpoolState> {
    let read_u128 = |offset: usize| -> Option<u128> {
        let bytes: [u8; 16] = data.get(offset..offset + 16)?.try_into().ok()?;
        Some(u128::from_le_bytes(bytes))
    };
    let tick: [u8; 4] = data.get(WHIRLPOOL_TICK_OFFSET..WHIRLPOOL_TICK_OFFSET + 4)?.try_into().ok()?;
    Some(WhirlpoolState {
        sqrt_price_x64: read_u128(WHIRLPOOL_SQRT_PRICE_OFFSET)?,
        liquidity: read_u128(WHIRLPOOL_LIQUIDITY_OFFSET)?,
        tick_current_index: i32::from_le_bytes(tick),
    })
}

pub struct VaultFeed {
    rpc: Arc<RpcManager<RpcClient>>,
    pools: Vec<Arc<Pool>>,
    interval: Duration,
}

impl VaultFeed {
    /// Only pools with both vaults configured are polled
    pub fn new(rpc: Arc<RpcManager<RpcClient>>, registry: &PoolRegistry, interval: Duration) -> Self {
        let pools = registry
            .pools()
            .iter()
            .filter(|p| p.vault_a.is_some() && p.vault_b.is_some())
            .cloned()
            .collect();
        Self { rpc, pools, interval }
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    async fn vault_balance(&self, vault: Pubkey) -> Result<rust_decimal::Decimal, RpcError> {
        let balance = self
            .rpc
            .execute_with_retry("get_token_account_balance", move |client: Arc<RpcClient>| async move {
                client.get_token_account_balance(&vault).await
            })
            .await?;
        raw_amount_to_decimal(&balance.amount, balance.decimals)
            .ok_or_else(|| RpcError::Ledger(format!("unparseable vault balance {} for {}", balance.amount, vault)))
    }

    pub async fn read_pool(&self, pool: &Pool) -> Result<ReserveUpdate, RpcError> {
        let (Some(vault_a), Some(vault_b)) = (pool.vault_a, pool.vault_b) else {
            return Err(RpcError::Ledger(format!("pool {} has no vaults configured", pool.id)));
        };
        let reserve_a = self.vault_balance(vault_a).await?;
        let reserve_b = self.vault_balance(vault_b).await?;
        let mut update = ReserveUpdate::reserves(pool.id.clone(), reserve_a, reserve_b, now_millis());

        if pool.venue == VenueKind::ConcentratedLiquidity {
            let address = pool.address;
            let data = self
                .rpc
                .execute_with_retry("get_account_data", move |client: Arc<RpcClient>| async move {
                    client.get_account_data(&address).await
                })
                .await?;
            match parse_whirlpool_state(&data) {
                Some(state) => {
                    update.sqrt_price_x64 = Some(state.sqrt_price_x64);
                    update.liquidity = Some(state.liquidity);
                    update.tick_current_index = Some(state.tick_current_index);
                }
                None => warn!("Pool {} account too short for concentrated-liquidity state", pool.id),
            }
        }
        Ok(update)
    }

    /// Read every pool once and forward the results. Returns the number sent.
    pub async fn refresh_once(&self, tx: &mpsc::Sender<FeedEvent>) -> usize {
        let mut sent = 0;
        for pool in &self.pools {
            match self.read_pool(pool).await {
                Ok(update) => {
                    if tx.send(FeedEvent::Reserves(update)).await.is_err() {
                        debug!("Feed receiver closed");
                        break;
                    }
                    sent += 1;
                }
                Err(e) => warn!("Failed to refresh {}: {}", pool.id, e),
            }
        }
        sent
    }

    pub fn spawn(self, tx: mpsc::Sender<FeedEvent>) -> JoinHandle<()> {
        info!("📡 Vault feed polling {} pools every {}ms", self.pools.len(), self.interval.as_millis());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.refresh_once(&tx).await;
                if tx.is_closed() {
                    break;
                }
            }
        })
    }
}
