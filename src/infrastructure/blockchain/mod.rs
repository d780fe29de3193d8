//! Solana ledger access: gateway, swap encoding and vault polling

pub mod solana_gateway;
pub mod swap_instructions;
pub mod vault_feed;

pub use solana_gateway::{probe_endpoint, SolanaGateway, WRAPPED_SOL_MINT};
pub use swap_instructions::ProgramSwapInstructionBuilder;
pub use vault_feed::{parse_whirlpool_state, VaultFeed, WhirlpoolState};
