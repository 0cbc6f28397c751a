//! Collaborator interfaces for the venues the strategy trades on.
//!
//! The strategy never reaches for ambient chain state. Price, perpetual margin
//! and spot liquidity are injected through these traits so the engine can run
//! against a live adapter or the deterministic [`SimulatedMarket`].
//!
//! [`SimulatedMarket`]: super::SimulatedMarket

use crate::access::Address;
use crate::error::VenueResult;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Point-in-time view of one margin account on the pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarginAccount {
    /// Collateral cash balance (realised PnL and funding included)
    pub cash: Decimal,
    /// Signed perpetual contracts; negative = short
    pub position: Decimal,
    /// Equity: cash + position * mark price
    pub margin: Decimal,
    /// Margin that can be withdrawn or used to open more exposure
    pub available_margin: Decimal,
    /// Above maintenance requirement
    pub is_safe: bool,
}

impl MarginAccount {
    pub fn empty() -> Self {
        Self {
            cash: Decimal::ZERO,
            position: Decimal::ZERO,
            margin: Decimal::ZERO,
            available_margin: Decimal::ZERO,
            is_safe: true,
        }
    }

    /// Short (or long) notional divided by equity.
    pub fn leverage(&self, mark_price: Decimal) -> Decimal {
        if self.margin <= Decimal::ZERO {
            return if self.position == Decimal::ZERO {
                Decimal::ZERO
            } else {
                Decimal::MAX
            };
        }
        self.position.abs() * mark_price / self.margin
    }
}

/// A perpetual trade submitted to the margin pool.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRequest {
    pub perpetual_index: u32,
    pub account: Address,
    /// Signed contracts; negative sells
    pub amount: Decimal,
    /// Worst acceptable execution price; `None` trades at any price
    pub limit_price: Option<Decimal>,
    pub deadline: DateTime<Utc>,
    pub referrer: Address,
    pub mode: u32,
}

/// Direction of a spot swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapSide {
    /// Spend want, receive the long asset
    WantToLong,
    /// Spend the long asset, receive want
    LongToWant,
}

impl fmt::Display for SwapSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapSide::WantToLong => write!(f, "want->long"),
            SwapSide::LongToWant => write!(f, "long->want"),
        }
    }
}

/// Time-weighted price feed for the long asset.
pub trait PriceOracle {
    /// TWAP of the long asset in want units.
    fn price_twap_long(&self) -> VenueResult<Decimal>;
}

/// Perpetual-futures liquidity pool holding the strategy's margin account.
pub trait MarginPool {
    fn margin_account(&self, perpetual_index: u32, account: &Address) -> VenueResult<MarginAccount>;

    /// Current mark price of the perpetual.
    fn mark_price(&self, perpetual_index: u32) -> VenueResult<Decimal>;

    /// Current funding rate (per 8h); positive means shorts receive.
    fn funding_rate(&self, perpetual_index: u32) -> VenueResult<Decimal>;

    fn deposit(&mut self, perpetual_index: u32, account: &Address, amount: Decimal) -> VenueResult<()>;

    fn withdraw(&mut self, perpetual_index: u32, account: &Address, amount: Decimal) -> VenueResult<()>;

    /// Execute a trade; returns the signed amount filled.
    fn trade(&mut self, request: &TradeRequest) -> VenueResult<Decimal>;

    fn set_target_leverage(
        &mut self,
        perpetual_index: u32,
        account: &Address,
        leverage: Decimal,
    ) -> VenueResult<()>;

    /// Settle accrued funding into account cash.
    fn force_to_sync_state(&mut self) -> VenueResult<()>;
}

/// Uniswap-style spot router between want and the long asset.
pub trait SpotRouter {
    /// Swap `amount_in`; fails if the output is below `min_amount_out`.
    fn swap(&mut self, side: SwapSide, amount_in: Decimal, min_amount_out: Decimal) -> VenueResult<Decimal>;
}

/// Everything the strategy trades against.
pub trait Venue: PriceOracle + MarginPool + SpotRouter {}

impl<T: PriceOracle + MarginPool + SpotRouter> Venue for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_margin_account_leverage() {
        let account = MarginAccount {
            cash: dec!(10000),
            position: dec!(-2),
            margin: dec!(6000),
            available_margin: dec!(5600),
            is_safe: true,
        };
        // 2 * 2000 / 6000
        assert_eq!(account.leverage(dec!(2000)).round_dp(4), dec!(0.6667));
        assert_eq!(MarginAccount::empty().leverage(dec!(2000)), Decimal::ZERO);
    }

    #[test]
    fn test_swap_side_display() {
        assert_eq!(SwapSide::WantToLong.to_string(), "want->long");
        assert_eq!(SwapSide::LongToWant.to_string(), "long->want");
    }
}
