//! Venue swap instruction encoding: Raydium AMM V4 `SwapBaseIn` and Orca Whirlpool `swap`

use borsh::BorshSerialize;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use spl_associated_token_account::get_associated_token_address_with_program_id;
use std::collections::HashMap;

use crate::domain::execution::{SwapInstructionBuilder, SwapLeg};
use crate::domain::pool::{MarketAccounts, Pool};
use crate::shared::errors::ExecutionError;
use crate::shared::types::VenueKind;

/// Raydium AMM V4 instruction tag
const RAYDIUM_SWAP_BASE_IN: u8 = 9;
/// `sha256("global:swap")[..8]`
const WHIRLPOOL_SWAP_DISCRIMINATOR: [u8; 8] = [0xf8, 0xc6, 0x9e, 0x91, 0xe1, 0x75, 0x87, 0xc8];
const WHIRLPOOL_TICK_ARRAY_SIZE: i32 = 88;
const WHIRLPOOL_MIN_SQRT_PRICE_X64: u128 = 4_295_048_016;
const WHIRLPOOL_MAX_SQRT_PRICE_X64: u128 = 79_226_673_515_401_279_992_447_579_055;

#[derive(BorshSerialize, Debug, Clone, PartialEq)]
struct SwapBaseInArgs {
    amount_in: u64,
    minimum_amount_out: u64,
}

#[derive(BorshSerialize, Debug, Clone, PartialEq)]
struct WhirlpoolSwapArgs {
    amount: u64,
    other_amount_threshold: u64,
    sqrt_price_limit: u128,
    amount_specified_is_input: bool,
    a_to_b: bool,
}

/// Start ticks of the three arrays a Whirlpool swap may cross, in traversal order
pub fn tick_array_starts(tick_current_index: i32, tick_spacing: u16, a_to_b: bool) -> [i32; 3] {
    let ticks_per_array = WHIRLPOOL_TICK_ARRAY_SIZE * i32::from(tick_spacing);
    let (shifted, step) = if a_to_b {
        (tick_current_index, -1)
    } else {
        (tick_current_index + i32::from(tick_spacing), 1)
    };
    let first = shifted.div_euclid(ticks_per_array);
    [0, 1, 2].map(|i| (first + step * i) * ticks_per_array)
}

fn tick_array_address(program_id: &Pubkey, whirlpool: &Pubkey, start_tick: i32) -> Pubkey {
    Pubkey::find_program_address(
        &[b"tick_array", whirlpool.as_ref(), start_tick.to_string().as_bytes()],
        program_id,
    )
    .0
}

fn oracle_address(program_id: &Pubkey, whirlpool: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[b"oracle", whirlpool.as_ref()], program_id).0
}

fn build_error(pool: &Pool, problem: &str) -> ExecutionError {
    ExecutionError::InstructionBuild(format!("pool {} {}", pool.id, problem))
}

fn vaults(pool: &Pool) -> Result<(Pubkey, Pubkey), ExecutionError> {
    match (pool.vault_a, pool.vault_b) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(build_error(pool, "has no vaults configured")),
    }
}

fn market(pool: &Pool) -> Result<&MarketAccounts, ExecutionError> {
    pool.market
        .as_ref()
        .ok_or_else(|| build_error(pool, "has no order-book market accounts configured"))
}

fn tick_spacing(pool: &Pool) -> Result<u16, ExecutionError> {
    pool.tick_spacing
        .filter(|spacing| *spacing > 0)
        .ok_or_else(|| build_error(pool, "has no tick spacing configured"))
}

fn encode(args: &impl BorshSerialize, mut data: Vec<u8>) -> Result<Vec<u8>, ExecutionError> {
    let bytes = args
        .try_to_vec()
        .map_err(|e| ExecutionError::InstructionBuild(format!("swap args: {}", e)))?;
    data.extend(bytes);
    Ok(data)
}

/// Builds swaps against the program configured for each venue kind
pub struct ProgramSwapInstructionBuilder {
    programs: HashMap<VenueKind, Pubkey>,
    token_program: Pubkey,
}

impl ProgramSwapInstructionBuilder {
    pub fn new(programs: HashMap<VenueKind, Pubkey>, token_program: Pubkey) -> Self {
        Self {
            programs,
            token_program,
        }
    }

    pub fn program_for(&self, venue: VenueKind) -> Option<&Pubkey> {
        self.programs.get(&venue)
    }

    /// Ok when a swap through `pool` can be encoded from configuration alone.
    /// Whirlpool swaps additionally need the current tick at build time.
    pub fn supports(&self, pool: &Pool) -> Result<(), ExecutionError> {
        self.program(pool)?;
        vaults(pool)?;
        match pool.venue {
            VenueKind::ConstantProduct => market(pool).map(|_| ()),
            VenueKind::ConcentratedLiquidity => tick_spacing(pool).map(|_| ()),
            VenueKind::OrderBook => Err(build_error(pool, "is on a venue without a swap encoder")),
        }
    }

    fn program(&self, pool: &Pool) -> Result<Pubkey, ExecutionError> {
        self.programs
            .get(&pool.venue)
            .copied()
            .ok_or_else(|| ExecutionError::InstructionBuild(format!("no program configured for {}", pool.venue)))
    }

    fn user_account(&self, owner: &Pubkey, mint: &Pubkey) -> Pubkey {
        get_associated_token_address_with_program_id(owner, mint, &self.token_program)
    }

    fn raydium_swap(&self, program_id: Pubkey, leg: &SwapLeg, owner: &Pubkey) -> Result<Instruction, ExecutionError> {
        let pool = &leg.pool;
        let market = market(pool)?;
        let (vault_a, vault_b) = vaults(pool)?;
        let data = encode(
            &SwapBaseInArgs {
                amount_in: leg.amount_in,
                minimum_amount_out: leg.minimum_amount_out,
            },
            vec![RAYDIUM_SWAP_BASE_IN],
        )?;

        Ok(Instruction {
            program_id,
            accounts: vec![
                AccountMeta::new_readonly(self.token_program, false),
                AccountMeta::new(pool.address, false),
                AccountMeta::new_readonly(market.amm_authority, false),
                AccountMeta::new(market.open_orders, false),
                AccountMeta::new(market.target_orders, false),
                AccountMeta::new(vault_a, false),
                AccountMeta::new(vault_b, false),
                AccountMeta::new_readonly(market.program, false),
                AccountMeta::new(market.market, false),
                AccountMeta::new(market.bids, false),
                AccountMeta::new(market.asks, false),
                AccountMeta::new(market.event_queue, false),
                AccountMeta::new(market.coin_vault, false),
                AccountMeta::new(market.pc_vault, false),
                AccountMeta::new_readonly(market.vault_signer, false),
                AccountMeta::new(self.user_account(owner, &leg.token_in.mint), false),
                AccountMeta::new(self.user_account(owner, &leg.token_out.mint), false),
                AccountMeta::new_readonly(*owner, true),
            ],
            data,
        })
    }

    fn whirlpool_swap(&self, program_id: Pubkey, leg: &SwapLeg, owner: &Pubkey) -> Result<Instruction, ExecutionError> {
        let pool = &leg.pool;
        let (vault_a, vault_b) = vaults(pool)?;
        let spacing = tick_spacing(pool)?;
        let tick = leg
            .tick_current_index
            .ok_or_else(|| build_error(pool, "has no current tick in its snapshot"))?;
        let a_to_b = leg.direction.is_a_to_b();

        let data = encode(
            &WhirlpoolSwapArgs {
                amount: leg.amount_in,
                other_amount_threshold: leg.minimum_amount_out,
                sqrt_price_limit: if a_to_b {
                    WHIRLPOOL_MIN_SQRT_PRICE_X64
                } else {
                    WHIRLPOOL_MAX_SQRT_PRICE_X64
                },
                amount_specified_is_input: true,
                a_to_b,
            },
            WHIRLPOOL_SWAP_DISCRIMINATOR.to_vec(),
        )?;
        let tick_arrays =
            tick_array_starts(tick, spacing, a_to_b).map(|start| tick_array_address(&program_id, &pool.address, start));

        Ok(Instruction {
            program_id,
            accounts: vec![
                AccountMeta::new_readonly(self.token_program, false),
                AccountMeta::new_readonly(*owner, true),
                AccountMeta::new(pool.address, false),
                AccountMeta::new(self.user_account(owner, &pool.token_a.mint), false),
                AccountMeta::new(vault_a, false),
                AccountMeta::new(self.user_account(owner, &pool.token_b.mint), false),
                AccountMeta::new(vault_b, false),
                AccountMeta::new(tick_arrays[0], false),
                AccountMeta::new(tick_arrays[1], false),
                AccountMeta::new(tick_arrays[2], false),
                AccountMeta::new(oracle_address(&program_id, &pool.address), false),
            ],
            data,
        })
    }
}

impl SwapInstructionBuilder for ProgramSwapInstructionBuilder {
    fn build_swap_instruction(&self, leg: &SwapLeg, owner: &Pubkey) -> Result<Instruction, ExecutionError> {
        let program_id = self.program(&leg.pool)?;
        match leg.pool.venue {
            VenueKind::ConstantProduct => self.raydium_swap(program_id, leg, owner),
            VenueKind::ConcentratedLiquidity => self.whirlpool_swap(program_id, leg, owner),
            VenueKind::OrderBook => Err(build_error(&leg.pool, "is on a venue without a swap encoder")),
        }
    }
}
