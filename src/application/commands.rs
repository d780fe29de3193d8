//! CLI commands and handlers
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::signature::{read_keypair_file, Signer};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::application::arbitrage_monitor::ArbitrageMonitor;
use crate::config::Config;
use crate::domain::arbitrage::{ArbitragePath, OpportunitySelector, PathGenerator, PathSimulator};
use crate::domain::execution::{AtomicExecutionEngine, LedgerGateway, TransactionBuilder};
use crate::domain::pool::{FeedEvent, LiquidityCache, PoolRegistry};
use crate::domain::safety::{SafetyGovernor, WalletProbe};
use crate::infrastructure::blockchain::{probe_endpoint, ProgramSwapInstructionBuilder, SolanaGateway, VaultFeed};
use crate::infrastructure::persistence::{RecordSink, TracingRecordSink};
use crate::infrastructure::rpc::{spawn_health_prober, RpcEndpoint, RpcManager};
use crate::shared::errors::AppError;
use crate::shared::types::Token;
use crate::shared::utils::format_amount;

#[derive(Parser)]
#[command(name = "depools-arb", version)]
#[command(about = "Solana multi-hop cycle arbitrage: path scan, simulation and atomic execution")]
pub struct Cli {
    /// Path to the TOML configuration
    #[arg(long, global = true, default_value = "Config.toml")]
    pub config: String,

    /// Named override set from [profiles]
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// Sign and simulate instead of submitting
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Base currency pushed through each cycle (overrides config)
    #[arg(long, global = true)]
    pub notional: Option<Decimal>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the scan and execute loop
    Run {
        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Print the generated path set and exit
    Paths {
        /// Limit number of paths to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// One vault refresh and one simulation pass
    Scan {
        /// Show every path result, not just the aggregates
        #[arg(long)]
        detailed: bool,
    },
}

/// Static pieces every command needs
struct Market {
    base: Token,
    registry: PoolRegistry,
    paths: Vec<ArbitragePath>,
}

impl Market {
    fn load(config: &Config) -> Result<Self, AppError> {
        let base = config.base_token()?;
        let registry = config.pool_registry()?;
        let paths = PathGenerator::new(base.clone()).generate(&registry);
        Ok(Self { base, registry, paths })
    }
}

pub struct CommandExecutor;

impl CommandExecutor {
    /// Resolve configuration and execute the selected command
    pub async fn execute(cli: Cli) -> Result<()> {
        let config = Self::load_config(&cli)?;
        match cli.command {
            Commands::Run { duration } => Self::execute_run_command(config, duration.map(Duration::from_secs)).await,
            Commands::Paths { limit } => Self::execute_paths_command(config, limit),
            Commands::Scan { detailed } => Self::execute_scan_command(config, detailed).await,
        }
    }

    fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = Config::from_file(&cli.config)?;
        if let Some(profile) = &cli.profile {
            config.apply_profile(profile)?;
            info!("🎛️ Profile '{}' applied", profile);
        }
        if cli.dry_run {
            config.trade.dry_run = true;
        }
        if let Some(notional) = cli.notional {
            config.trade.notional = notional;
        }
        config.validate()?;
        Ok(config)
    }

    fn build_rpc(config: &Config) -> Result<Arc<RpcManager<RpcClient>>, AppError> {
        let policy = config.retry_policy();
        let commitment = config.commitment()?;
        let endpoints = config
            .rpc
            .endpoints
            .iter()
            .map(|ep| {
                let client = RpcClient::new_with_timeout_and_commitment(ep.url.clone(), policy.request_timeout, commitment);
                RpcEndpoint::new(&ep.name, &ep.url, ep.weight, client).with_ws_url(ep.ws_url.clone())
            })
            .collect();
        Ok(Arc::new(RpcManager::new(endpoints, policy)?))
    }

    fn execute_paths_command(config: Config, limit: Option<usize>) -> Result<()> {
        let market = Market::load(&config)?;
        let mut by_hops = BTreeMap::<usize, usize>::new();
        for path in &market.paths {
            *by_hops.entry(path.hop_count()).or_insert(0) += 1;
        }

        info!(
            "🧭 {} paths from {} over {} pools",
            market.paths.len(),
            market.base,
            market.registry.len()
        );
        for (hops, count) in &by_hops {
            info!("   {} hops: {}", hops, count);
        }
        for path in market.paths.iter().take(limit.unwrap_or(usize::MAX)) {
            info!("   {} [{}]", path.id, path.route());
        }
        Ok(())
    }

    async fn execute_scan_command(config: Config, detailed: bool) -> Result<()> {
        let market = Market::load(&config)?;
        let rpc = Self::build_rpc(&config)?;
        let feed = VaultFeed::new(Arc::clone(&rpc), &market.registry, Duration::ZERO);
        if feed.pool_count() == 0 {
            warn!("No pool has vaults configured; nothing to read");
        }

        let (tx, mut rx) = mpsc::channel(feed.pool_count().max(1));
        let mut cache = LiquidityCache::new(market.base.mint, config.trade.snapshot_max_age_ms);
        let reader = tokio::spawn(async move { feed.refresh_once(&tx).await });
        while let Some(event) = rx.recv().await {
            if let FeedEvent::Reserves(update) = event {
                if let Some(pool) = market.registry.get(&update.pool_id) {
                    cache.apply(pool, update);
                }
            }
        }
        let refreshed = reader.await.context("vault refresh task")?;
        info!("📥 Refreshed {} of {} pools", refreshed, market.registry.len());

        let simulator = PathSimulator::new(market.base.mint, config.simulation_thresholds());
        let mut selector = OpportunitySelector::new(simulator, config.execution_pricing());
        let best = selector.select_best(&market.paths, config.trade.notional, &cache);
        let stats = selector.last_stats();

        info!(
            "📊 {} paths, {} executable, best {}%, avg {}%, {}µs simulating",
            stats.total_paths,
            stats.executable,
            stats.best_net_profit_pct.map(|p| format_amount(p, 4)).unwrap_or_else(|| "-".to_string()),
            stats.average_net_profit_pct.map(|p| format_amount(p, 4)).unwrap_or_else(|| "-".to_string()),
            stats.total_simulation_us
        );
        for (hops, count) in &stats.executable_by_hops {
            info!("   {} hops executable: {}", hops, count);
        }
        for (reason, count) in &stats.failure_reasons {
            info!("   {}: {}", reason, count);
        }

        if detailed {
            for path in &market.paths {
                let result = selector.simulator().simulate(path, config.trade.notional, &cache);
                info!(
                    "   {} net {}% {}",
                    result.path_id,
                    format_amount(result.net_profit_pct, 4),
                    result.failure_reason.map(|r| r.to_string()).unwrap_or_else(|| "executable".to_string())
                );
            }
        }
        if let Some(opportunity) = best {
            info!("🎯 Best: {}", serde_json::to_string(&opportunity)?);
        }
        Ok(())
    }

    async fn execute_run_command(config: Config, duration: Option<Duration>) -> Result<()> {
        let market = Market::load(&config)?;
        let rpc = Self::build_rpc(&config)?;
        let commitment = config.commitment()?;
        let token_program = config.token_program()?;

        let keypair = read_keypair_file(&config.wallet.keypair)
            .map_err(|e| anyhow!("read keypair {}: {}", config.wallet.keypair, e))?;
        let owner = keypair.pubkey();
        info!("👛 Wallet {}", owner);

        let records: Arc<dyn RecordSink> = Arc::new(TracingRecordSink::new(config.trade.record_simulations));
        let gateway = Arc::new(SolanaGateway::new(
            Arc::clone(&rpc),
            owner,
            market.base.clone(),
            token_program,
            commitment,
        ));
        let swaps = Arc::new(ProgramSwapInstructionBuilder::new(config.swap_programs()?, token_program));
        let engine = Arc::new(
            AtomicExecutionEngine::new(
                TransactionBuilder::new(config.execution.compute_unit_limit, swaps),
                gateway.clone() as Arc<dyn LedgerGateway>,
                Arc::new(keypair),
                config.execution_config(),
            )
            .with_record_sink(Arc::clone(&records)),
        );
        let governor = Arc::new(SafetyGovernor::new(config.safety_limits(), gateway.clone() as Arc<dyn WalletProbe>));

        let preflight = governor
            .perform_safety_check(config.trade.notional, config.trade.slippage_bps)
            .await;
        for warning in &preflight.warnings {
            warn!("⚠️ {}", warning);
        }
        if !preflight.passed {
            for e in &preflight.errors {
                error!("❌ {}", e);
            }
            if !config.trade.dry_run {
                return Err(anyhow!("pre-flight safety check failed"));
            }
            warn!("Continuing in dry-run mode despite failed pre-flight check");
        }

        let selector = OpportunitySelector::new(
            PathSimulator::new(market.base.mint, config.simulation_thresholds()),
            config.execution_pricing(),
        )
        .with_record_sink(Arc::clone(&records));

        let prober = spawn_health_prober(Arc::clone(&rpc), config.health_probe_interval(), probe_endpoint);
        let (tx, rx) = mpsc::channel(1024);
        let feed = VaultFeed::new(
            Arc::clone(&rpc),
            &market.registry,
            Duration::from_millis(config.trade.vault_poll_interval_ms),
        )
        .spawn(tx);

        let monitor = ArbitrageMonitor::new(
            config.monitor_config(),
            market.registry,
            LiquidityCache::new(market.base.mint, config.trade.snapshot_max_age_ms),
            market.paths,
            selector,
            engine,
            governor,
        );
        if config.trade.dry_run {
            info!("🧪 Dry run: transactions are simulated, never submitted");
        }

        let outcome = tokio::select! {
            result = monitor.run(rx) => Some(result),
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
            _ = tokio::time::sleep(duration.unwrap_or(Duration::MAX)), if duration.is_some() => {
                info!("✅ Run duration elapsed");
                None
            }
        };

        feed.abort();
        prober.abort();
        match serde_json::to_string(&rpc.status_report().await) {
            Ok(report) => info!("🌐 Endpoints: {}", report),
            Err(e) => warn!("Endpoint report unavailable: {}", e),
        }

        match outcome {
            Some(Ok(stats)) => {
                info!("Final stats: {}", serde_json::to_string(&stats)?);
                Ok(())
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(()),
        }
    }
}
