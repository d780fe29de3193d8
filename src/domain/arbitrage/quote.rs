//! Venue quote collaborator for pools not priced by the constant-product formula

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::pool::Pool;
use crate::shared::types::SwapDirection;

/// Precomputed venue-specific swap result
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VenueQuote {
    pub amount_out: Decimal,
    /// Fraction, comparable with the constant-product `amount_in / reserve_in`
    pub price_impact: Decimal,
}

/// Supplies exact outputs for concentrated-liquidity and order-book venues.
///
/// Called synchronously from inside a simulation pass, so implementations
/// answer from memory and never touch the network.
pub trait QuoteProvider: Send + Sync {
    fn quote(&self, pool: &Pool, amount_in: Decimal, direction: SwapDirection) -> Option<VenueQuote>;
}

impl<F> QuoteProvider for F
where
    F: Fn(&Pool, Decimal, SwapDirection) -> Option<VenueQuote> + Send + Sync,
{
    fn quote(&self, pool: &Pool, amount_in: Decimal, direction: SwapDirection) -> Option<VenueQuote> {
        self(pool, amount_in, direction)
    }
}
