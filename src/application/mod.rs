//! Application layer - scan loop and CLI commands

pub mod arbitrage_monitor;
pub mod commands;

pub use arbitrage_monitor::{ArbitrageMonitor, MonitorConfig, MonitorStats, SimulationThrottle};
pub use commands::{Cli, CommandExecutor, Commands};
