use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use std::{fs, path::Path};

use crate::application::MonitorConfig;
use crate::domain::arbitrage::{ExecutionPricing, ProfitThresholds, SimulationThresholds};
use crate::domain::execution::ExecutionConfig;
use crate::domain::pool::{MarketAccounts, Pool, PoolRegistry};
use crate::domain::safety::SafetyLimits;
use crate::infrastructure::blockchain::ProgramSwapInstructionBuilder;
use crate::infrastructure::rpc::RetryPolicy;
use crate::shared::errors::AppError;
use crate::shared::types::{Token, VenueKind};

const SPL_TOKEN_PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
const RAYDIUM_AMM_AUTHORITY: &str = "5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1";

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointCfg {
    pub name: String,
    pub url: String,
    pub ws_url: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    50
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcCfg {
    pub endpoints: Vec<EndpointCfg>,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_backoff_step_ms: u64,
    pub request_timeout_ms: u64,
    pub rate_limit_cooldown_ms: u64,
    pub unhealthy_error_rate: f64,
    pub unhealthy_min_requests: u64,
    pub recovery_window_ms: u64,
    pub rate_limit_reset_ms: u64,
    pub health_probe_interval_ms: u64,
    pub commitment: String,
}

impl Default for RpcCfg {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            max_attempts: 5,
            base_backoff_ms: 250,
            max_backoff_ms: 8_000,
            timeout_backoff_step_ms: 200,
            request_timeout_ms: 10_000,
            rate_limit_cooldown_ms: 5_000,
            unhealthy_error_rate: 0.5,
            unhealthy_min_requests: 10,
            recovery_window_ms: 30_000,
            rate_limit_reset_ms: 60_000,
            health_probe_interval_ms: 10_000,
            commitment: "confirmed".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletCfg {
    pub keypair: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
    pub mint: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokensCfg {
    pub base: TokenInfo,
    #[serde(default)]
    pub intermediates: Vec<TokenInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolCfg {
    pub address: String,
    pub name: String,
    pub venue: String,
    /// Token symbols from `[tokens]`
    pub token_a: String,
    pub token_b: String,
    pub fee_rate: Decimal,
    pub tick_spacing: Option<u16>,
    pub vault_a: Option<String>,
    pub vault_b: Option<String>,
    /// Order-book accounts a Raydium V4 swap settles against
    pub market: Option<MarketCfg>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketCfg {
    #[serde(default = "default_amm_authority")]
    pub amm_authority: String,
    pub open_orders: String,
    pub target_orders: String,
    pub program: String,
    pub address: String,
    pub bids: String,
    pub asks: String,
    pub event_queue: String,
    pub coin_vault: String,
    pub pc_vault: String,
    pub vault_signer: String,
}

fn default_amm_authority() -> String {
    RAYDIUM_AMM_AUTHORITY.to_string()
}

impl MarketCfg {
    fn accounts(&self, pool: &str) -> Result<MarketAccounts, AppError> {
        let key = |field: &str, value: &str| parse_pubkey(&format!("{}.market.{}", pool, field), value);
        Ok(MarketAccounts {
            amm_authority: key("amm_authority", &self.amm_authority)?,
            open_orders: key("open_orders", &self.open_orders)?,
            target_orders: key("target_orders", &self.target_orders)?,
            program: key("program", &self.program)?,
            market: key("address", &self.address)?,
            bids: key("bids", &self.bids)?,
            asks: key("asks", &self.asks)?,
            event_queue: key("event_queue", &self.event_queue)?,
            coin_vault: key("coin_vault", &self.coin_vault)?,
            pc_vault: key("pc_vault", &self.pc_vault)?,
            vault_signer: key("vault_signer", &self.vault_signer)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProgramsCfg {
    pub constant_product: Option<String>,
    pub concentrated_liquidity: Option<String>,
    pub order_book: Option<String>,
    pub spl_token: String,
}

impl Default for ProgramsCfg {
    fn default() -> Self {
        Self {
            constant_product: None,
            concentrated_liquidity: None,
            order_book: None,
            spl_token: SPL_TOKEN_PROGRAM.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradeCfg {
    pub notional: Decimal,
    pub slippage_bps: u32,
    pub estimated_network_cost: Decimal,
    pub snapshot_max_age_ms: u64,
    pub simulation_interval_ms: u64,
    pub throttle_ms: u64,
    pub vault_poll_interval_ms: u64,
    pub dry_run: bool,
    pub record_simulations: bool,
}

impl Default for TradeCfg {
    fn default() -> Self {
        Self {
            notional: dec!(1000),
            slippage_bps: 50,
            estimated_network_cost: Decimal::ZERO,
            snapshot_max_age_ms: 2_000,
            simulation_interval_ms: 250,
            throttle_ms: 1_000,
            vault_poll_interval_ms: 1_000,
            dry_run: false,
            record_simulations: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThresholdsCfg {
    /// Percent, for 2, 3 and 4 hops
    pub min_profit_pct: [Decimal; 3],
    pub max_hop_price_impact: Decimal,
    pub max_total_price_impact: Decimal,
    pub min_hop_liquidity: Decimal,
    pub min_total_liquidity: Decimal,
    pub optimal_profit_pct: Decimal,
}

impl Default for ThresholdsCfg {
    fn default() -> Self {
        Self {
            min_profit_pct: [dec!(0.15), dec!(0.3), dec!(1.5)],
            max_hop_price_impact: dec!(0.02),
            max_total_price_impact: dec!(0.05),
            min_hop_liquidity: dec!(1000),
            min_total_liquidity: dec!(5000),
            optimal_profit_pct: dec!(1.0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionCfg {
    pub quote_staleness_ms: u64,
    pub compute_unit_limit: u32,
    pub base_priority_fee_micro_lamports: u64,
    pub priority_fee_per_bps: u64,
    pub max_priority_fee_micro_lamports: u64,
    pub confirmation_timeout_ms: u64,
    pub max_status_polls: u32,
    pub status_poll_interval_ms: u64,
}

impl Default for ExecutionCfg {
    fn default() -> Self {
        Self {
            quote_staleness_ms: 1_500,
            compute_unit_limit: 400_000,
            base_priority_fee_micro_lamports: 10_000,
            priority_fee_per_bps: 1_000,
            max_priority_fee_micro_lamports: 1_000_000,
            confirmation_timeout_ms: 5_000,
            max_status_polls: 5,
            status_poll_interval_ms: 400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyCfg {
    pub max_utilization_error: Decimal,
    pub max_utilization_warning: Decimal,
    pub balance_buffer: Decimal,
    pub min_gas_lamports: u64,
    pub max_latency_ms: u64,
    pub max_slippage_bps: u32,
    pub circuit_breaker_threshold: u32,
    pub failure_history: usize,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        let limits = SafetyLimits::default();
        Self {
            max_utilization_error: limits.max_utilization_error,
            max_utilization_warning: limits.max_utilization_warning,
            balance_buffer: limits.balance_buffer,
            min_gas_lamports: limits.min_gas_lamports,
            max_latency_ms: limits.max_latency.as_millis() as u64,
            max_slippage_bps: limits.max_slippage_bps,
            circuit_breaker_threshold: limits.circuit_breaker_threshold,
            failure_history: limits.failure_history,
        }
    }
}

/// Named override set selected with `--profile`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileCfg {
    pub notional: Option<Decimal>,
    pub slippage_bps: Option<u32>,
    pub min_profit_pct: Option<[Decimal; 3]>,
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcCfg,
    pub wallet: WalletCfg,
    pub tokens: TokensCfg,
    #[serde(default)]
    pub pools: Vec<PoolCfg>,
    #[serde(default)]
    pub programs: ProgramsCfg,
    #[serde(default)]
    pub trade: TradeCfg,
    #[serde(default)]
    pub thresholds: ThresholdsCfg,
    #[serde(default)]
    pub execution: ExecutionCfg,
    #[serde(default)]
    pub safety: SafetyCfg,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileCfg>,
}

fn config_error(message: impl Into<String>) -> AppError {
    AppError::ConfigError(message.into())
}

fn parse_pubkey(field: &str, value: &str) -> Result<Pubkey, AppError> {
    Pubkey::from_str(value).map_err(|e| config_error(format!("{}: invalid pubkey {}: {}", field, value, e)))
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path.as_ref())
            .with_context(|| format!("read {}", path.as_ref().display()))?;
        Self::parse(&s)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s).context("parse Config.toml")?;
        Ok(cfg)
    }

    /// Overlay a named profile onto the base settings
    pub fn apply_profile(&mut self, name: &str) -> Result<(), AppError> {
        let profile = self
            .profiles
            .get(name)
            .cloned()
            .ok_or_else(|| config_error(format!("unknown profile '{}'", name)))?;
        if let Some(notional) = profile.notional {
            self.trade.notional = notional;
        }
        if let Some(slippage_bps) = profile.slippage_bps {
            self.trade.slippage_bps = slippage_bps;
        }
        if let Some(min_profit_pct) = profile.min_profit_pct {
            self.thresholds.min_profit_pct = min_profit_pct;
        }
        if let Some(dry_run) = profile.dry_run {
            self.trade.dry_run = dry_run;
        }
        Ok(())
    }

    /// Startup checks. Any error here is fatal.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.rpc.endpoints.is_empty() {
            return Err(config_error("[rpc] needs at least one endpoint"));
        }
        if self.wallet.keypair.trim().is_empty() {
            return Err(config_error("[wallet] keypair path is empty"));
        }
        if self.trade.notional <= Decimal::ZERO {
            return Err(config_error("[trade] notional must be positive"));
        }
        if !self.profit_thresholds().is_monotonic() {
            return Err(config_error(
                "[thresholds] min_profit_pct must strictly increase with hop count",
            ));
        }
        self.commitment()?;
        let tokens = self.tokens()?;
        for pool in &self.pools {
            for symbol in [&pool.token_a, &pool.token_b] {
                if !tokens.contains_key(symbol) {
                    return Err(config_error(format!("pool {} references unknown token {}", pool.name, symbol)));
                }
            }
        }
        if self.trade.simulation_interval_ms == 0 {
            return Err(config_error("[trade] simulation_interval_ms must be positive"));
        }
        let registry = self.pool_registry()?;
        let swaps = ProgramSwapInstructionBuilder::new(self.swap_programs()?, self.token_program()?);
        if !self.trade.dry_run {
            for pool in registry.pools() {
                swaps
                    .supports(pool)
                    .map_err(|e| config_error(format!("live trading: {}", e)))?;
            }
        }
        Ok(())
    }

    pub fn base_token(&self) -> Result<Token, AppError> {
        let base = &self.tokens.base;
        Ok(Token::new(parse_pubkey("tokens.base", &base.mint)?, &base.symbol, base.decimals))
    }

    /// Every configured token keyed by symbol
    pub fn tokens(&self) -> Result<HashMap<String, Token>, AppError> {
        let mut tokens = HashMap::new();
        for info in std::iter::once(&self.tokens.base).chain(&self.tokens.intermediates) {
            let token = Token::new(parse_pubkey(&info.symbol, &info.mint)?, &info.symbol, info.decimals);
            if tokens.insert(info.symbol.clone(), token).is_some() {
                return Err(config_error(format!("duplicate token symbol {}", info.symbol)));
            }
        }
        Ok(tokens)
    }

    pub fn pool_registry(&self) -> Result<PoolRegistry, AppError> {
        let tokens = self.tokens()?;
        let lookup = |symbol: &str| {
            tokens
                .get(symbol)
                .cloned()
                .ok_or_else(|| config_error(format!("unknown token {}", symbol)))
        };
        let optional_key = |field: &str, value: &Option<String>| -> Result<Option<Pubkey>, AppError> {
            value.as_deref().map(|v| parse_pubkey(field, v)).transpose()
        };

        let mut registry = PoolRegistry::new();
        for cfg in &self.pools {
            let venue = VenueKind::from_str(&cfg.venue).map_err(|e| config_error(format!("pool {}: {}", cfg.name, e)))?;
            if cfg.fee_rate < Decimal::ZERO || cfg.fee_rate >= Decimal::ONE {
                return Err(config_error(format!("pool {}: fee_rate must be in [0, 1)", cfg.name)));
            }
            registry.insert(Pool {
                id: cfg.name.clone(),
                name: format!("{}/{}", cfg.token_a, cfg.token_b),
                address: parse_pubkey(&cfg.name, &cfg.address)?,
                venue,
                token_a: lookup(&cfg.token_a)?,
                token_b: lookup(&cfg.token_b)?,
                fee_rate: cfg.fee_rate,
                tick_spacing: cfg.tick_spacing,
                vault_a: optional_key(&cfg.name, &cfg.vault_a)?,
                vault_b: optional_key(&cfg.name, &cfg.vault_b)?,
                market: cfg.market.as_ref().map(|m| m.accounts(&cfg.name)).transpose()?,
            });
        }
        Ok(registry)
    }

    pub fn swap_programs(&self) -> Result<HashMap<VenueKind, Pubkey>, AppError> {
        let mut programs = HashMap::new();
        for (venue, program) in [
            (VenueKind::ConstantProduct, &self.programs.constant_product),
            (VenueKind::ConcentratedLiquidity, &self.programs.concentrated_liquidity),
            (VenueKind::OrderBook, &self.programs.order_book),
        ] {
            if let Some(program) = program {
                programs.insert(venue, parse_pubkey(venue.as_str(), program)?);
            }
        }
        Ok(programs)
    }

    pub fn token_program(&self) -> Result<Pubkey, AppError> {
        parse_pubkey("programs.spl_token", &self.programs.spl_token)
    }

    pub fn commitment(&self) -> Result<CommitmentConfig, AppError> {
        CommitmentConfig::from_str(&self.rpc.commitment)
            .map_err(|_| config_error(format!("unknown commitment '{}'", self.rpc.commitment)))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let rpc = &self.rpc;
        RetryPolicy {
            max_attempts: rpc.max_attempts.max(1),
            base_backoff: Duration::from_millis(rpc.base_backoff_ms),
            max_backoff: Duration::from_millis(rpc.max_backoff_ms),
            timeout_backoff_step: Duration::from_millis(rpc.timeout_backoff_step_ms),
            request_timeout: Duration::from_millis(rpc.request_timeout_ms),
            rate_limit_cooldown: Duration::from_millis(rpc.rate_limit_cooldown_ms),
            unhealthy_error_rate: rpc.unhealthy_error_rate,
            unhealthy_min_requests: rpc.unhealthy_min_requests,
            recovery_window: Duration::from_millis(rpc.recovery_window_ms),
            rate_limit_reset: Duration::from_millis(rpc.rate_limit_reset_ms),
        }
    }

    pub fn health_probe_interval(&self) -> Duration {
        Duration::from_millis(self.rpc.health_probe_interval_ms)
    }

    pub fn profit_thresholds(&self) -> ProfitThresholds {
        let [two_hop_pct, three_hop_pct, four_hop_pct] = self.thresholds.min_profit_pct;
        ProfitThresholds {
            two_hop_pct,
            three_hop_pct,
            four_hop_pct,
        }
    }

    pub fn simulation_thresholds(&self) -> SimulationThresholds {
        SimulationThresholds {
            min_profit: self.profit_thresholds(),
            max_hop_price_impact: self.thresholds.max_hop_price_impact,
            max_total_price_impact: self.thresholds.max_total_price_impact,
            min_hop_liquidity: self.thresholds.min_hop_liquidity,
            min_total_liquidity: self.thresholds.min_total_liquidity,
            estimated_network_cost: self.trade.estimated_network_cost,
        }
    }

    pub fn execution_pricing(&self) -> ExecutionPricing {
        ExecutionPricing {
            slippage_bps: self.trade.slippage_bps,
            base_priority_fee_micro_lamports: self.execution.base_priority_fee_micro_lamports,
            priority_fee_per_bps: self.execution.priority_fee_per_bps,
            max_priority_fee_micro_lamports: self.execution.max_priority_fee_micro_lamports,
            optimal_profit_pct: self.thresholds.optimal_profit_pct,
        }
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            quote_staleness: Duration::from_millis(self.execution.quote_staleness_ms),
            confirmation_timeout: Duration::from_millis(self.execution.confirmation_timeout_ms),
            max_status_polls: self.execution.max_status_polls,
            status_poll_interval: Duration::from_millis(self.execution.status_poll_interval_ms),
            dry_run: self.trade.dry_run,
        }
    }

    pub fn safety_limits(&self) -> SafetyLimits {
        let safety = &self.safety;
        SafetyLimits {
            max_utilization_error: safety.max_utilization_error,
            max_utilization_warning: safety.max_utilization_warning,
            balance_buffer: safety.balance_buffer,
            min_gas_lamports: safety.min_gas_lamports,
            max_latency: Duration::from_millis(safety.max_latency_ms),
            max_slippage_bps: safety.max_slippage_bps,
            min_hop_liquidity: self.thresholds.min_hop_liquidity,
            circuit_breaker_threshold: safety.circuit_breaker_threshold,
            failure_history: safety.failure_history,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            notional: self.trade.notional,
            throttle: Duration::from_millis(self.trade.throttle_ms),
            simulation_interval: Duration::from_millis(self.trade.simulation_interval_ms),
            ..MonitorConfig::default()
        }
    }
}
