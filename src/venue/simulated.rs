//! Deterministic in-memory venue for simulation and tests.
//!
//! Plays the oracle, the perpetual margin pool and the spot router at once.
//! Funding accrues lazily and is settled into account cash on
//! [`MarginPool::force_to_sync_state`], as the on-chain pool does.

use super::traits::{MarginAccount, MarginPool, PriceOracle, SpotRouter, SwapSide, TradeRequest};
use crate::access::Address;
use crate::config::MarketConfig;
use crate::error::{VenueError, VenueResult};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::{debug, info};

/// Seconds in one funding period; rates are quoted per period.
const FUNDING_PERIOD_SECS: i64 = 8 * 3600;

/// Simulated margin account.
#[derive(Debug, Clone, Default)]
pub struct SimulatedAccount {
    pub cash: Decimal,
    pub position: Decimal,
    pub target_leverage: Decimal,
    /// Funding settled into this account over its lifetime
    pub total_funding_received: Decimal,
    /// Trading fees charged to this account
    pub total_fees_paid: Decimal,
}

/// Simulated oracle + perpetual pool + spot router.
#[derive(Debug, Clone)]
pub struct SimulatedMarket {
    now: DateTime<Utc>,
    last_funding_sync: DateTime<Utc>,
    oracle_price: Decimal,
    mark_price: Decimal,
    spot_price: Decimal,
    /// Funding rate per 8h period
    funding_rate: Decimal,
    perp_fee_rate: Decimal,
    spot_fee_rate: Decimal,
    initial_margin_rate: Decimal,
    maintenance_margin_rate: Decimal,
    accounts: HashMap<(u32, Address), SimulatedAccount>,
    trade_count: u64,
    swap_count: u64,
}

impl SimulatedMarket {
    /// Create a market with all three prices at `price`.
    pub fn new(price: Decimal, start: DateTime<Utc>) -> Self {
        Self {
            now: start,
            last_funding_sync: start,
            oracle_price: price,
            mark_price: price,
            spot_price: price,
            funding_rate: Decimal::ZERO,
            perp_fee_rate: dec!(0.0005),
            spot_fee_rate: dec!(0.0005),
            initial_margin_rate: dec!(0.1),
            maintenance_margin_rate: dec!(0.05),
            accounts: HashMap::new(),
            trade_count: 0,
            swap_count: 0,
        }
    }

    pub fn from_config(config: &MarketConfig, start: DateTime<Utc>) -> Self {
        Self::new(config.initial_price, start)
            .with_funding_rate(config.funding_rate)
            .with_fees(config.perp_fee_rate, config.spot_fee_rate)
            .with_margin_rates(config.initial_margin_rate, config.maintenance_margin_rate)
    }

    pub fn with_funding_rate(mut self, rate: Decimal) -> Self {
        self.funding_rate = rate;
        self
    }

    pub fn with_fees(mut self, perp_fee_rate: Decimal, spot_fee_rate: Decimal) -> Self {
        self.perp_fee_rate = perp_fee_rate;
        self.spot_fee_rate = spot_fee_rate;
        self
    }

    pub fn with_margin_rates(mut self, initial: Decimal, maintenance: Decimal) -> Self {
        self.initial_margin_rate = initial;
        self.maintenance_margin_rate = maintenance;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Move the clock forward. Funding accrues but is not settled until sync.
    pub fn advance(&mut self, elapsed: Duration) {
        self.now += elapsed;
    }

    /// Move oracle, mark and spot prices together.
    pub fn set_price(&mut self, price: Decimal) {
        self.oracle_price = price;
        self.mark_price = price;
        self.spot_price = price;
    }

    /// Move only the perpetual mark (e.g. a large taker on the pool).
    pub fn set_mark_price(&mut self, price: Decimal) {
        self.mark_price = price;
    }

    pub fn set_funding_rate(&mut self, rate: Decimal) {
        self.funding_rate = rate;
    }

    pub fn account(&self, perpetual_index: u32, account: &Address) -> Option<&SimulatedAccount> {
        self.accounts.get(&(perpetual_index, account.clone()))
    }

    pub fn trade_count(&self) -> u64 {
        self.trade_count
    }

    pub fn swap_count(&self) -> u64 {
        self.swap_count
    }

    fn snapshot(&self, account: &SimulatedAccount) -> MarginAccount {
        let notional = account.position.abs() * self.mark_price;
        let margin = account.cash + account.position * self.mark_price;
        MarginAccount {
            cash: account.cash,
            position: account.position,
            margin,
            available_margin: (margin - notional * self.initial_margin_rate).max(Decimal::ZERO),
            is_safe: margin >= notional * self.maintenance_margin_rate,
        }
    }

    fn account_mut(&mut self, perpetual_index: u32, account: &Address) -> &mut SimulatedAccount {
        self.accounts
            .entry((perpetual_index, account.clone()))
            .or_default()
    }
}

impl PriceOracle for SimulatedMarket {
    fn price_twap_long(&self) -> VenueResult<Decimal> {
        if self.oracle_price <= Decimal::ZERO {
            return Err(VenueError::Unavailable("oracle price not set".to_string()));
        }
        Ok(self.oracle_price)
    }
}

impl MarginPool for SimulatedMarket {
    fn margin_account(&self, perpetual_index: u32, account: &Address) -> VenueResult<MarginAccount> {
        Ok(self
            .accounts
            .get(&(perpetual_index, account.clone()))
            .map(|acc| self.snapshot(acc))
            .unwrap_or_else(MarginAccount::empty))
    }

    fn mark_price(&self, _perpetual_index: u32) -> VenueResult<Decimal> {
        Ok(self.mark_price)
    }

    fn funding_rate(&self, _perpetual_index: u32) -> VenueResult<Decimal> {
        Ok(self.funding_rate)
    }

    fn deposit(&mut self, perpetual_index: u32, account: &Address, amount: Decimal) -> VenueResult<()> {
        if amount <= Decimal::ZERO {
            return Err(VenueError::InvalidAmount(amount));
        }
        self.account_mut(perpetual_index, account).cash += amount;
        debug!(%account, %amount, "Margin deposited");
        Ok(())
    }

    fn withdraw(&mut self, perpetual_index: u32, account: &Address, amount: Decimal) -> VenueResult<()> {
        if amount <= Decimal::ZERO {
            return Err(VenueError::InvalidAmount(amount));
        }
        let available = self.margin_account(perpetual_index, account)?.available_margin;
        if amount > available {
            return Err(VenueError::InsufficientMargin {
                required: amount,
                available,
            });
        }
        self.account_mut(perpetual_index, account).cash -= amount;
        debug!(%account, %amount, "Margin withdrawn");
        Ok(())
    }

    fn trade(&mut self, request: &TradeRequest) -> VenueResult<Decimal> {
        if request.deadline < self.now {
            return Err(VenueError::DeadlineExceeded);
        }
        if request.amount == Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }

        let price = self.mark_price;
        if let Some(limit) = request.limit_price {
            let breached = if request.amount > Decimal::ZERO {
                price > limit
            } else {
                price < limit
            };
            if breached {
                return Err(VenueError::PriceLimit { price, limit });
            }
        }

        let key = (request.perpetual_index, request.account.clone());
        let mut account = self.accounts.get(&key).cloned().unwrap_or_default();
        let previous_exposure = account.position.abs();
        let fee = request.amount.abs() * price * self.perp_fee_rate;

        account.cash -= request.amount * price + fee;
        account.position += request.amount;
        account.total_fees_paid += fee;

        // Reductions are always allowed; new exposure must meet initial margin.
        if account.position.abs() > previous_exposure {
            let snapshot = self.snapshot(&account);
            let required = account.position.abs() * price * self.initial_margin_rate;
            if snapshot.margin < required {
                return Err(VenueError::InsufficientMargin {
                    required,
                    available: snapshot.margin,
                });
            }
        }

        self.accounts.insert(key, account);
        self.trade_count += 1;

        info!(
            account = %request.account,
            amount = %request.amount,
            price = %price,
            fee = %fee,
            mode = request.mode,
            "Simulated perpetual trade executed"
        );

        Ok(request.amount)
    }

    fn set_target_leverage(
        &mut self,
        perpetual_index: u32,
        account: &Address,
        leverage: Decimal,
    ) -> VenueResult<()> {
        self.account_mut(perpetual_index, account).target_leverage = leverage;
        debug!(%account, %leverage, "Simulated target leverage set");
        Ok(())
    }

    fn force_to_sync_state(&mut self) -> VenueResult<()> {
        let elapsed = (self.now - self.last_funding_sync).num_seconds();
        if elapsed <= 0 {
            return Ok(());
        }

        let period_share = Decimal::from(elapsed) / Decimal::from(FUNDING_PERIOD_SECS);
        let mark = self.mark_price;
        let rate = self.funding_rate;
        let mut total_funding = Decimal::ZERO;

        for account in self.accounts.values_mut() {
            // Short position (negative) with positive rate receives funding.
            let funding = -account.position * mark * rate * period_share;
            account.cash += funding;
            account.total_funding_received += funding;
            total_funding += funding;
        }

        self.last_funding_sync = self.now;

        debug!(
            elapsed_secs = elapsed,
            funding_rate = %rate,
            funding_settled = %total_funding,
            "Simulated funding settled"
        );
        Ok(())
    }
}

impl SpotRouter for SimulatedMarket {
    fn swap(&mut self, side: SwapSide, amount_in: Decimal, min_amount_out: Decimal) -> VenueResult<Decimal> {
        if amount_in <= Decimal::ZERO {
            return Err(VenueError::InvalidAmount(amount_in));
        }

        let after_fee = amount_in * (Decimal::ONE - self.spot_fee_rate);
        let amount_out = match side {
            SwapSide::WantToLong => after_fee / self.spot_price,
            SwapSide::LongToWant => after_fee * self.spot_price,
        };

        if amount_out < min_amount_out {
            return Err(VenueError::Slippage {
                amount_out,
                min_amount_out,
            });
        }

        self.swap_count += 1;
        debug!(%side, %amount_in, %amount_out, price = %self.spot_price, "Simulated swap executed");
        Ok(amount_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn strategy() -> Address {
        Address::from("strategy")
    }

    fn sell(market: &SimulatedMarket, amount: Decimal) -> TradeRequest {
        TradeRequest {
            perpetual_index: 0,
            account: strategy(),
            amount: -amount,
            limit_price: None,
            deadline: market.now() + Duration::seconds(60),
            referrer: Address::zero(),
            mode: 0x4000_0000,
        }
    }

    #[test]
    fn test_short_trade_keeps_margin_less_fee() {
        let mut market = SimulatedMarket::new(dec!(2000), start()).with_fees(dec!(0.001), Decimal::ZERO);
        market.deposit(0, &strategy(), dec!(3000)).unwrap();

        let filled = market.trade(&sell(&market, dec!(1))).unwrap();
        assert_eq!(filled, dec!(-1));

        let account = market.margin_account(0, &strategy()).unwrap();
        assert_eq!(account.position, dec!(-1));
        // 3000 - fee(2000 * 0.001)
        assert_eq!(account.margin, dec!(2998));
        assert_eq!(account.available_margin, dec!(2798));
    }

    #[test]
    fn test_trade_rejected_without_initial_margin() {
        let mut market = SimulatedMarket::new(dec!(2000), start());
        market.deposit(0, &strategy(), dec!(100)).unwrap();

        let err = market.trade(&sell(&market, dec!(1))).unwrap_err();
        assert!(matches!(err, VenueError::InsufficientMargin { .. }));
        assert_eq!(market.margin_account(0, &strategy()).unwrap().position, Decimal::ZERO);
    }

    #[test]
    fn test_trade_deadline_and_limit() {
        let mut market = SimulatedMarket::new(dec!(2000), start());
        market.deposit(0, &strategy(), dec!(5000)).unwrap();

        let mut expired = sell(&market, dec!(1));
        expired.deadline = market.now() - Duration::seconds(1);
        assert_eq!(market.trade(&expired).unwrap_err(), VenueError::DeadlineExceeded);

        let mut limited = sell(&market, dec!(1));
        limited.limit_price = Some(dec!(2100));
        assert!(matches!(market.trade(&limited).unwrap_err(), VenueError::PriceLimit { .. }));
    }

    #[test]
    fn test_funding_settles_on_sync() {
        let mut market = SimulatedMarket::new(dec!(2000), start())
            .with_fees(Decimal::ZERO, Decimal::ZERO)
            .with_funding_rate(dec!(0.001));
        market.deposit(0, &strategy(), dec!(3000)).unwrap();
        market.trade(&sell(&market, dec!(1))).unwrap();

        market.advance(Duration::hours(8));
        assert_eq!(market.margin_account(0, &strategy()).unwrap().margin, dec!(3000));

        market.force_to_sync_state().unwrap();
        // Short 1 @ 2000 receives 0.1% for one full period.
        assert_eq!(market.margin_account(0, &strategy()).unwrap().margin, dec!(3002));
        assert_eq!(market.account(0, &strategy()).unwrap().total_funding_received, dec!(2));
    }

    #[test]
    fn test_negative_funding_charges_shorts() {
        let mut market = SimulatedMarket::new(dec!(2000), start())
            .with_fees(Decimal::ZERO, Decimal::ZERO)
            .with_funding_rate(dec!(-0.001));
        market.deposit(0, &strategy(), dec!(3000)).unwrap();
        market.trade(&sell(&market, dec!(1))).unwrap();

        market.advance(Duration::hours(4));
        market.force_to_sync_state().unwrap();
        assert_eq!(market.margin_account(0, &strategy()).unwrap().margin, dec!(2999));
    }

    #[test]
    fn test_swap_applies_fee_and_min_out() {
        let mut market = SimulatedMarket::new(dec!(2000), start()).with_fees(Decimal::ZERO, dec!(0.003));

        let long = market.swap(SwapSide::WantToLong, dec!(2000), Decimal::ZERO).unwrap();
        assert_eq!(long, dec!(0.997));

        let err = market.swap(SwapSide::LongToWant, dec!(1), dec!(2000)).unwrap_err();
        assert!(matches!(err, VenueError::Slippage { .. }));
        assert_eq!(market.swap_count(), 1);
    }

    #[test]
    fn test_withdraw_limited_to_available_margin() {
        let mut market = SimulatedMarket::new(dec!(2000), start()).with_fees(Decimal::ZERO, Decimal::ZERO);
        market.deposit(0, &strategy(), dec!(1000)).unwrap();
        market.trade(&sell(&market, dec!(0.25))).unwrap();

        // 1000 - 0.25 * 2000 * 0.1 = 950 available
        assert!(market.withdraw(0, &strategy(), dec!(951)).is_err());
        market.withdraw(0, &strategy(), dec!(950)).unwrap();
        assert_eq!(market.margin_account(0, &strategy()).unwrap().available_margin, Decimal::ZERO);
    }
}
