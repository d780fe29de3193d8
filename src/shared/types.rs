//! Common types used across the application

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;

/// Token representation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub mint: Pubkey,
    pub symbol: String,
    pub decimals: u8,
}

impl Token {
    pub fn new(mint: Pubkey, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            mint,
            symbol: symbol.into(),
            decimals,
        }
    }

    /// Convert a UI amount into raw base units, truncating sub-unit dust.
    pub fn to_raw_amount(&self, amount: Decimal) -> Option<u64> {
        use rust_decimal::prelude::ToPrimitive;
        let scale = Decimal::from(10u64.checked_pow(u32::from(self.decimals))?);
        amount.checked_mul(scale)?.trunc().to_u64()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

/// Pricing model of a liquidity venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueKind {
    ConstantProduct,
    ConcentratedLiquidity,
    OrderBook,
}

impl VenueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueKind::ConstantProduct => "constant_product",
            VenueKind::ConcentratedLiquidity => "concentrated_liquidity",
            VenueKind::OrderBook => "order_book",
        }
    }
}

impl FromStr for VenueKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "constant_product" | "cpmm" | "amm" | "raydium_v4" => Ok(VenueKind::ConstantProduct),
            "concentrated_liquidity" | "clmm" | "whirlpool" | "orca_whirlpool" => {
                Ok(VenueKind::ConcentratedLiquidity)
            }
            "order_book" | "orderbook" | "clob" => Ok(VenueKind::OrderBook),
            _ => Err(anyhow::anyhow!("Unknown venue kind: {}", s)),
        }
    }
}

impl fmt::Display for VenueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a swap relative to a pool's (token A, token B) ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapDirection {
    AToB,
    BToA,
}

impl SwapDirection {
    pub fn is_a_to_b(&self) -> bool {
        matches!(self, SwapDirection::AToB)
    }
}
