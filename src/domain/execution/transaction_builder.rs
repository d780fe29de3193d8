//! Assembles one atomic transaction for every leg of an opportunity

use rust_decimal::Decimal;
use solana_sdk::{
    hash::Hash, instruction::Instruction, message::Message, packet::PACKET_DATA_SIZE, pubkey::Pubkey,
    signature::Signer, transaction::Transaction,
};
use std::sync::Arc;
use tracing::{debug, info};

use super::compute_budget::compute_budget_instructions;
use crate::domain::arbitrage::amm_math::calculate_min_out;
use crate::domain::arbitrage::ArbitrageOpportunity;
use crate::domain::pool::Pool;
use crate::shared::errors::ExecutionError;
use crate::shared::types::{SwapDirection, Token};

/// One swap of the transaction, in raw token units
#[derive(Debug, Clone, PartialEq)]
pub struct SwapLeg {
    pub pool: Arc<Pool>,
    pub token_in: Token,
    pub token_out: Token,
    pub direction: SwapDirection,
    pub amount_in: u64,
    pub minimum_amount_out: u64,
    /// Current tick for concentrated-liquidity venues, from the quoting snapshot
    pub tick_current_index: Option<i32>,
}

/// Venue-specific swap instruction encoding
pub trait SwapInstructionBuilder: Send + Sync {
    fn build_swap_instruction(&self, leg: &SwapLeg, owner: &Pubkey) -> Result<Instruction, ExecutionError>;
}

pub struct TransactionBuilder {
    compute_unit_limit: u32,
    swaps: Arc<dyn SwapInstructionBuilder>,
}

impl TransactionBuilder {
    pub fn new(compute_unit_limit: u32, swaps: Arc<dyn SwapInstructionBuilder>) -> Self {
        Self {
            compute_unit_limit,
            swaps,
        }
    }

    /// Raw amounts per leg. Each later leg spends the previous leg's floor, and
    /// the slippage allowance compounds per leg so every floor stays reachable.
    pub fn swap_legs(&self, opportunity: &ArbitrageOpportunity) -> Result<Vec<SwapLeg>, ExecutionError> {
        let path = &opportunity.path;
        let simulation = &opportunity.simulation;
        if path.hops.len() != simulation.legs.len() || path.hops.is_empty() {
            return Err(ExecutionError::InvalidOpportunity(format!(
                "{} has {} hops but {} simulated legs",
                path.id,
                path.hops.len(),
                simulation.legs.len()
            )));
        }

        let mut legs = Vec::with_capacity(path.hops.len());
        let mut previous_floor: Option<u64> = None;
        let mut expected_scale = Decimal::ONE;

        for (hop, simulated) in path.hops.iter().zip(&simulation.legs) {
            let direction = hop
                .direction()
                .ok_or_else(|| ExecutionError::InvalidOpportunity(format!("{} does not connect", hop.pool.id)))?;

            let amount_in = match previous_floor {
                Some(floor) => floor,
                None => to_raw(&hop.token_in, simulated.amount_in)?,
            };
            expected_scale = calculate_min_out(expected_scale, opportunity.slippage_bps);
            let floor = simulated
                .amount_out
                .checked_mul(expected_scale)
                .ok_or_else(|| ExecutionError::InvalidOpportunity("minimum output overflow".to_string()))?;
            let minimum_amount_out = to_raw(&hop.token_out, floor)?;

            legs.push(SwapLeg {
                pool: Arc::clone(&hop.pool),
                token_in: hop.token_in.clone(),
                token_out: hop.token_out.clone(),
                direction,
                amount_in,
                minimum_amount_out,
                tick_current_index: simulated.tick_current_index,
            });
            previous_floor = Some(minimum_amount_out);
        }
        Ok(legs)
    }

    /// Compute-unit limit, priority fee, then every swap in path order
    pub fn build_instructions(
        &self,
        opportunity: &ArbitrageOpportunity,
        owner: &Pubkey,
    ) -> Result<Vec<Instruction>, ExecutionError> {
        let legs = self.swap_legs(opportunity)?;
        let mut instructions =
            compute_budget_instructions(self.compute_unit_limit, opportunity.priority_fee_micro_lamports);
        for leg in &legs {
            let instruction = self.swaps.build_swap_instruction(leg, owner)?;
            debug!(
                "   + swap {} {} -> {} in={} min_out={}",
                leg.pool.id, leg.token_in.symbol, leg.token_out.symbol, leg.amount_in, leg.minimum_amount_out
            );
            instructions.push(instruction);
        }
        Ok(instructions)
    }

    /// Build and sign. Rejects transactions over the packet size limit.
    pub fn build_transaction(
        &self,
        opportunity: &ArbitrageOpportunity,
        signer: &dyn Signer,
        recent_blockhash: Hash,
    ) -> Result<Transaction, ExecutionError> {
        let payer = signer.pubkey();
        let instructions = self.build_instructions(opportunity, &payer)?;
        let message = Message::new(&instructions, Some(&payer));
        let mut transaction = Transaction::new_unsigned(message);
        let signers: Vec<&dyn Signer> = vec![signer];
        transaction
            .try_sign(&signers, recent_blockhash)
            .map_err(|e| ExecutionError::Signing(e.to_string()))?;

        let size = transaction_size(&transaction)?;
        if size > PACKET_DATA_SIZE {
            return Err(ExecutionError::TransactionTooLarge {
                size,
                limit: PACKET_DATA_SIZE,
            });
        }

        info!(
            "🔨 Built atomic transaction for {}: {} instructions, {} bytes",
            opportunity.simulation.path_id,
            instructions.len(),
            size
        );
        Ok(transaction)
    }
}

pub fn transaction_size(transaction: &Transaction) -> Result<usize, ExecutionError> {
    bincode::serialized_size(transaction)
        .map(|size| size as usize)
        .map_err(|e| ExecutionError::InstructionBuild(format!("serialize transaction: {}", e)))
}

fn to_raw(token: &Token, amount: Decimal) -> Result<u64, ExecutionError> {
    token.to_raw_amount(amount).ok_or_else(|| {
        ExecutionError::InvalidOpportunity(format!("{} {} does not fit raw units", amount, token.symbol))
    })
}
