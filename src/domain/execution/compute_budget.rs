use solana_sdk::{compute_budget::ComputeBudgetInstruction, instruction::Instruction};

/// Create ComputeBudget instruction to set priority fee
pub fn priority_fee_instruction(micro_lamports_per_cu: u64) -> Instruction {
    ComputeBudgetInstruction::set_compute_unit_price(micro_lamports_per_cu)
}

/// Create ComputeBudget instruction to set compute unit limit
pub fn compute_unit_limit_instruction(compute_units: u32) -> Instruction {
    ComputeBudgetInstruction::set_compute_unit_limit(compute_units)
}

/// Limit first, then price. Both precede every swap in the transaction.
pub fn compute_budget_instructions(compute_units: u32, micro_lamports_per_cu: u64) -> Vec<Instruction> {
    vec![
        compute_unit_limit_instruction(compute_units),
        priority_fee_instruction(micro_lamports_per_cu),
    ]
}

pub fn is_compute_budget_instruction(instruction: &Instruction) -> bool {
    instruction.program_id == solana_sdk::compute_budget::id()
}
