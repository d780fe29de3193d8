//! Swap math on exact decimals

use rust_decimal::prelude::*;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("numeric overflow")]
pub struct Overflow;

pub type MathResult<T> = Result<T, Overflow>;

const Q64: u128 = 1u128 << 64;
const BPS_DENOMINATOR: u32 = 10_000;

/// Constant-product output:
/// `reserve_out * amount_in*(1-fee) / (reserve_in + amount_in*(1-fee))`
pub fn constant_product_out(
    reserve_in: Decimal,
    reserve_out: Decimal,
    amount_in: Decimal,
    fee_rate: Decimal,
) -> MathResult<Decimal> {
    let fee_multiplier = Decimal::ONE.checked_sub(fee_rate).ok_or(Overflow)?;
    let amount_in_after_fee = amount_in.checked_mul(fee_multiplier).ok_or(Overflow)?;
    let numerator = reserve_out.checked_mul(amount_in_after_fee).ok_or(Overflow)?;
    let denominator = reserve_in.checked_add(amount_in_after_fee).ok_or(Overflow)?;
    if denominator.is_zero() {
        return Ok(Decimal::ZERO);
    }
    numerator.checked_div(denominator).ok_or(Overflow)
}

/// Price impact of a trade, as a fraction of the input reserve
pub fn price_impact(amount_in: Decimal, reserve_in: Decimal) -> MathResult<Decimal> {
    if reserve_in <= Decimal::ZERO {
        return Ok(Decimal::MAX);
    }
    amount_in.checked_div(reserve_in).ok_or(Overflow)
}

/// Calculate minimum output amount with slippage protection
pub fn calculate_min_out(amount_out: Decimal, slippage_bps: u32) -> Decimal {
    let kept = Decimal::from(BPS_DENOMINATOR.saturating_sub(slippage_bps));
    amount_out * kept / Decimal::from(BPS_DENOMINATOR)
}

/// Lamports paid for `micro_lamports_per_cu` across `compute_units`
pub fn calculate_priority_fee(micro_lamports_per_cu: u64, compute_units: u32) -> u64 {
    micro_lamports_per_cu.saturating_mul(u64::from(compute_units)) / 1_000_000
}

/// Convert a Q64.64 square-root price into a UI price of token B per token A
pub fn sqrt_price_x64_to_price(sqrt_price_x64: u128, decimals_a: u8, decimals_b: u8) -> MathResult<Decimal> {
    let sqrt_price = Decimal::from_u128(sqrt_price_x64)
        .ok_or(Overflow)?
        .checked_div(Decimal::from_u128(Q64).ok_or(Overflow)?)
        .ok_or(Overflow)?;
    let raw_price = sqrt_price.checked_mul(sqrt_price).ok_or(Overflow)?;
    scale_by_decimals(raw_price, i32::from(decimals_a) - i32::from(decimals_b))
}

/// Single-range virtual reserves (UI units) for a concentrated-liquidity pool:
/// `x = L / sqrtP`, `y = L * sqrtP`.
pub fn virtual_reserves(
    sqrt_price_x64: u128,
    liquidity: u128,
    decimals_a: u8,
    decimals_b: u8,
) -> MathResult<(Decimal, Decimal)> {
    let sqrt_price = Decimal::from_u128(sqrt_price_x64)
        .ok_or(Overflow)?
        .checked_div(Decimal::from_u128(Q64).ok_or(Overflow)?)
        .ok_or(Overflow)?;
    if sqrt_price.is_zero() {
        return Ok((Decimal::ZERO, Decimal::ZERO));
    }
    let liquidity = Decimal::from_u128(liquidity).ok_or(Overflow)?;
    let raw_a = liquidity.checked_div(sqrt_price).ok_or(Overflow)?;
    let raw_b = liquidity.checked_mul(sqrt_price).ok_or(Overflow)?;
    Ok((
        scale_by_decimals(raw_a, -i32::from(decimals_a))?,
        scale_by_decimals(raw_b, -i32::from(decimals_b))?,
    ))
}

fn scale_by_decimals(value: Decimal, exponent: i32) -> MathResult<Decimal> {
    let factor = Decimal::from(10u64.checked_pow(exponent.unsigned_abs()).ok_or(Overflow)?);
    if exponent >= 0 {
        value.checked_mul(factor).ok_or(Overflow)
    } else {
        value.checked_div(factor).ok_or(Overflow)
    }
}
