//! Position tracking for the hedged long/short pair.
//!
//! The spot long is held by the strategy itself and booked here; the
//! perpetual short and its margin live on the pool and are read from it on
//! every call, never cached.

use crate::access::Address;
use crate::error::StrategyResult;
use crate::utils::safe_div;
use crate::venue::{MarginAccount, MarginPool};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

/// Snapshot of the strategy's exposure.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Position {
    /// Spot long-asset balance
    pub long_balance: Decimal,
    /// Signed perpetual contracts (negative = short)
    pub perp_contracts: Decimal,
    /// Margin account equity at mark
    pub margin: Decimal,
}

impl Position {
    /// Net long-asset exposure: spot plus perpetual.
    pub fn net_delta(&self) -> Decimal {
        self.perp_contracts + self.long_balance
    }

    /// Whether both legs cancel within `tolerance` long units.
    pub fn is_hedged(&self, tolerance: Decimal) -> bool {
        self.net_delta().abs() <= tolerance
    }

    pub fn is_flat(&self) -> bool {
        self.long_balance == Decimal::ZERO
            && self.perp_contracts == Decimal::ZERO
            && self.margin == Decimal::ZERO
    }

    /// Want value of the deployed capital: long at `price` plus margin.
    pub fn value(&self, price: Decimal) -> Decimal {
        self.long_balance * price + self.margin
    }

    /// Share of deployed value held as spare margin:
    /// `(margin + perp * price) / (long * price + margin)`.
    pub fn buffer_ratio(&self, price: Decimal) -> Decimal {
        safe_div(self.margin + self.perp_contracts * price, self.value(price))
    }
}

/// Books the spot leg and mirrors the pool leg of the strategy.
#[derive(Debug, Clone)]
pub struct PositionLedger {
    perpetual_index: u32,
    account: Address,
    long_balance: Decimal,
}

impl PositionLedger {
    pub fn new(perpetual_index: u32, account: Address) -> Self {
        Self {
            perpetual_index,
            account,
            long_balance: Decimal::ZERO,
        }
    }

    pub fn perpetual_index(&self) -> u32 {
        self.perpetual_index
    }

    pub(crate) fn set_perpetual_index(&mut self, perpetual_index: u32) {
        self.perpetual_index = perpetual_index;
    }

    pub fn long_balance(&self) -> Decimal {
        self.long_balance
    }

    pub(crate) fn credit_long(&mut self, amount: Decimal) {
        self.long_balance += amount;
    }

    /// Remove long from the book; never goes below zero.
    pub(crate) fn debit_long(&mut self, amount: Decimal) {
        self.long_balance = (self.long_balance - amount).max(Decimal::ZERO);
    }

    /// Live perpetual position on the pool.
    pub fn get_margin_positions<P: MarginPool + ?Sized>(&self, pool: &P) -> StrategyResult<Decimal> {
        Ok(self.get_margin_account(pool)?.position)
    }

    /// Live margin equity on the pool.
    pub fn get_margin<P: MarginPool + ?Sized>(&self, pool: &P) -> StrategyResult<Decimal> {
        Ok(self.get_margin_account(pool)?.margin)
    }

    pub fn get_margin_account<P: MarginPool + ?Sized>(&self, pool: &P) -> StrategyResult<MarginAccount> {
        Ok(pool.margin_account(self.perpetual_index, &self.account)?)
    }

    /// Booked long plus the pool leg as it stands right now.
    pub fn live_position<P: MarginPool + ?Sized>(&self, pool: &P) -> StrategyResult<Position> {
        let account = self.get_margin_account(pool)?;
        Ok(Position {
            long_balance: self.long_balance,
            perp_contracts: account.position,
            margin: account.margin,
        })
    }

    /// Read the position back after a mutation and log it.
    pub fn refresh<P: MarginPool + ?Sized>(&self, pool: &P) -> StrategyResult<Position> {
        let position = self.live_position(pool)?;
        debug!(
            long = %position.long_balance,
            perp = %position.perp_contracts,
            margin = %position.margin,
            net_delta = %position.net_delta(),
            "Positions refreshed"
        );
        Ok(position)
    }

    /// Buffer ratio of the live position at `price`.
    pub fn buffer_ratio<P: MarginPool + ?Sized>(&self, pool: &P, price: Decimal) -> StrategyResult<Decimal> {
        Ok(self.live_position(pool)?.buffer_ratio(price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::{SimulatedMarket, TradeRequest};
    use chrono::{DateTime, Duration};
    use rust_decimal_macros::dec;

    #[test]
    fn test_position_math() {
        let position = Position {
            long_balance: dec!(2),
            perp_contracts: dec!(-2),
            margin: dec!(6000),
        };
        assert_eq!(position.net_delta(), Decimal::ZERO);
        assert!(position.is_hedged(dec!(0.1)));
        assert_eq!(position.value(dec!(1000)), dec!(8000));
        // (6000 - 2000) / (2000 + 6000)
        assert_eq!(position.buffer_ratio(dec!(1000)), dec!(0.5));
        assert!(Position::default().is_flat());
    }

    #[test]
    fn test_refresh_reads_pool_leg() {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut market = SimulatedMarket::new(dec!(1000), start).with_fees(Decimal::ZERO, Decimal::ZERO);
        let strategy = Address::from("strategy");
        let mut ledger = PositionLedger::new(0, strategy.clone());

        market.deposit(0, &strategy, dec!(600)).unwrap();
        market
            .trade(&TradeRequest {
                perpetual_index: 0,
                account: strategy.clone(),
                amount: dec!(-0.4),
                limit_price: None,
                deadline: start + Duration::seconds(60),
                referrer: Address::zero(),
                mode: 0,
            })
            .unwrap();
        ledger.credit_long(dec!(0.4));

        let position = ledger.refresh(&market).unwrap();
        assert_eq!(position.perp_contracts, dec!(-0.4));
        assert_eq!(position.margin, dec!(600));
        assert_eq!(ledger.get_margin_positions(&market).unwrap(), dec!(-0.4));
        assert_eq!(ledger.buffer_ratio(&market, dec!(1000)).unwrap(), dec!(0.2));

        ledger.debit_long(dec!(1));
        assert_eq!(ledger.long_balance(), Decimal::ZERO);
    }

    #[test]
    fn test_live_position_follows_mark() {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut market = SimulatedMarket::new(dec!(1000), start).with_fees(Decimal::ZERO, Decimal::ZERO);
        let strategy = Address::from("strategy");
        let mut ledger = PositionLedger::new(0, strategy.clone());

        market.deposit(0, &strategy, dec!(600)).unwrap();
        market
            .trade(&TradeRequest {
                perpetual_index: 0,
                account: strategy.clone(),
                amount: dec!(-0.4),
                limit_price: None,
                deadline: start + Duration::seconds(60),
                referrer: Address::zero(),
                mode: 0,
            })
            .unwrap();
        ledger.credit_long(dec!(0.4));
        let opened = ledger.refresh(&market).unwrap();
        assert_eq!(opened.margin, dec!(600));

        // Short loses 0.4 * 200 when the mark rises
        market.set_price(dec!(1200));
        let live = ledger.live_position(&market).unwrap();
        assert_eq!(live.margin, dec!(520));
        assert_eq!(live.margin, ledger.get_margin(&market).unwrap());
        assert_eq!(live.perp_contracts, opened.perp_contracts);
    }
}
