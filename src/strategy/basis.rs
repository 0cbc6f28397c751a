//! The basis strategy: spot long hedged by a perpetual short.
//!
//! Capital lent by the vault is split by the buffer into perpetual margin
//! and a spot long; the short is kept at `-long` so price moves cancel and
//! the strategy earns the funding paid to shorts.

use super::ledger::{Position, PositionLedger};
use super::rebalance::{leverage, RebalanceEngine, RemarginAction};
use crate::access::{AccessControl, Address, Role};
use crate::config::StrategyConfig;
use crate::error::{StrategyError, StrategyResult};
use crate::events::{EmergencyExit, Harvest, Remargined, StrategyEvent, StrategyUnwind};
use crate::utils::MAX_BPS;
use crate::vault::{LiquiditySource, VaultAccounting};
use crate::venue::{SwapSide, TradeRequest, Venue};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Lifecycle of the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StrategyState {
    /// Deploys capital and keeps the hedge
    Active,
    /// Positions closed; harvest only reports idle want
    Unwound,
}

/// Owner-settable strategy parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategySettings {
    pub liquidity_pool: Address,
    pub uniswap_pool: Address,
    pub basis_vault: Address,
    pub buffer: u64,
    pub perpetual_index: u32,
    pub referrer: Address,
    pub slippage_tolerance: Decimal,
    pub dust: Decimal,
    pub trade_mode: u32,
    pub trade_deadline: Duration,
}

impl StrategySettings {
    pub fn from_config(config: &StrategyConfig, basis_vault: Address) -> Self {
        Self {
            liquidity_pool: Address::new(config.liquidity_pool.clone()),
            uniswap_pool: Address::new(config.uniswap_pool.clone()),
            basis_vault,
            buffer: config.buffer,
            perpetual_index: config.perpetual_index,
            referrer: Address::new(config.referrer.clone()),
            slippage_tolerance: config.slippage_tolerance,
            dust: config.dust,
            trade_mode: config.trade_mode,
            trade_deadline: Duration::seconds(config.trade_deadline_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BasisStrategy {
    address: Address,
    access: AccessControl,
    settings: StrategySettings,
    state: StrategyState,
    /// Want held by the strategy outside the pool
    idle_want: Decimal,
    ledger: PositionLedger,
}

impl BasisStrategy {
    pub fn new(address: Address, access: AccessControl, settings: StrategySettings) -> Self {
        let ledger = PositionLedger::new(settings.perpetual_index, address.clone());
        Self {
            address,
            access,
            settings,
            state: StrategyState::Active,
            idle_want: Decimal::ZERO,
            ledger,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    pub fn state(&self) -> StrategyState {
        self.state
    }

    pub fn is_unwind(&self) -> bool {
        self.state == StrategyState::Unwound
    }

    pub fn idle_want(&self) -> Decimal {
        self.idle_want
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    /// Booked long with the pool leg as it stands on `venue` now.
    pub fn positions<M: Venue>(&self, venue: &M) -> StrategyResult<Position> {
        self.ledger.live_position(venue)
    }

    pub fn engine(&self) -> RebalanceEngine {
        RebalanceEngine::new(
            self.settings.buffer,
            self.settings.slippage_tolerance,
            self.settings.dust,
        )
    }

    pub fn get_funding_rate<M: Venue>(&self, venue: &M) -> StrategyResult<Decimal> {
        Ok(venue.funding_rate(self.settings.perpetual_index)?)
    }

    /// Idle want plus the live value of both legs at the oracle price.
    pub fn total_assets<M: Venue>(&self, venue: &M) -> StrategyResult<Decimal> {
        let price = venue.price_twap_long()?;
        let margin = self.ledger.get_margin(&*venue)?;
        Ok(self.idle_want + self.ledger.long_balance() * price + margin)
    }

    /// Report to the vault, take its idle want and deploy it hedged.
    pub fn harvest<M: Venue>(
        &mut self,
        caller: &Address,
        venue: &mut M,
        vault: &mut VaultAccounting,
        now: DateTime<Utc>,
    ) -> StrategyResult<Vec<StrategyEvent>> {
        self.access.require(caller, Role::Authorised)?;
        if vault.address() != &self.settings.basis_vault {
            return Err(StrategyError::invalid("!vault"));
        }

        venue.force_to_sync_state()?;
        let assets = self.total_assets(venue)?;
        let fees = vault.report(&self.address, assets, now)?;

        if self.state == StrategyState::Active {
            let lent = vault.lend_idle(&self.address)?;
            self.idle_want += lent;

            let engine = self.engine();
            venue.set_target_leverage(
                self.settings.perpetual_index,
                &self.address,
                engine.target_leverage(),
            )?;
            self.deploy_idle(venue, &engine)?;
            self.rehedge(venue, &engine, now)?;
        } else {
            debug!(idle_want = %self.idle_want, "Strategy unwound, harvest reports idle want only");
        }

        let position = self.ledger.refresh(&*venue)?;
        info!(
            state = ?self.state,
            assets = %assets,
            long = %position.long_balance,
            perp = %position.perp_contracts,
            margin = %position.margin,
            "Harvested"
        );

        let mut events = Vec::new();
        if let Some(fees) = fees {
            events.push(StrategyEvent::FeesCollected(fees));
        }
        events.push(StrategyEvent::Harvest(Harvest {
            long_position: position.long_balance,
            perp_contracts: position.perp_contracts,
            margin: position.margin,
        }));
        Ok(events)
    }

    /// Move value between the long and the margin until the buffer is back
    /// on target.
    pub fn remargin<M: Venue>(
        &mut self,
        caller: &Address,
        venue: &mut M,
        now: DateTime<Utc>,
    ) -> StrategyResult<StrategyEvent> {
        self.access.require(caller, Role::Authorised)?;
        self.require_active()?;

        venue.force_to_sync_state()?;
        let price = venue.price_twap_long()?;
        let mark = venue.mark_price(self.settings.perpetual_index)?;
        let position = self.ledger.refresh(&*venue)?;

        let engine = self.engine();
        let plan = engine.plan_remargin(&position, price, mark);
        engine.check_leverage(plan.pre_leverage, plan.post_leverage)?;

        let unwind_amount = match plan.action {
            RemarginAction::None => Decimal::ZERO,
            RemarginAction::Deleverage { sell_long } => {
                let proceeds = self.sell_long(venue, &engine, sell_long, price)?;
                self.deposit_margin(venue, proceeds)?;
                self.rehedge(venue, &engine, now)?;
                sell_long
            }
            RemarginAction::Releverage { surplus_margin } => {
                self.withdraw_margin(venue, surplus_margin)?;
                let bought = self.buy_long(venue, &engine, surplus_margin, price)?;
                self.rehedge(venue, &engine, now)?;
                -bought
            }
        };

        let after = self.ledger.refresh(&*venue)?;
        let executed = leverage(after.perp_contracts, mark, after.margin);
        engine.check_leverage(plan.pre_leverage, executed)?;

        info!(
            unwind_amount = %unwind_amount,
            buffer_ratio = %after.buffer_ratio(price),
            leverage = %executed,
            "Remargined"
        );
        Ok(StrategyEvent::Remargined(Remargined { unwind_amount }))
    }

    /// Close both legs and keep the want in the strategy.
    pub fn unwind<M: Venue>(
        &mut self,
        caller: &Address,
        venue: &mut M,
        now: DateTime<Utc>,
    ) -> StrategyResult<StrategyEvent> {
        self.access.require(caller, Role::Authorised)?;
        if self.is_unwind() {
            return Err(StrategyError::invalid("strategy is already unwound"));
        }

        venue.force_to_sync_state()?;
        let engine = self.engine();
        self.close_all(venue, Some(&engine), now)?;
        self.state = StrategyState::Unwound;
        self.ledger.refresh(&*venue)?;

        info!(position_size = %self.idle_want, "Strategy unwound");
        Ok(StrategyEvent::StrategyUnwind(StrategyUnwind {
            position_size: self.idle_want,
        }))
    }

    /// Leave the unwound state; the next harvest redeploys.
    pub fn resume(&mut self, caller: &Address) -> StrategyResult<()> {
        self.access.require(caller, Role::Authorised)?;
        if !self.is_unwind() {
            return Err(StrategyError::invalid("strategy is not unwound"));
        }
        self.state = StrategyState::Active;
        info!("Strategy resumed");
        Ok(())
    }

    /// Close everything at any price. Returns the want to hand to governance.
    pub fn emergency_exit<M: Venue>(
        &mut self,
        caller: &Address,
        venue: &mut M,
        now: DateTime<Utc>,
    ) -> StrategyResult<(Decimal, StrategyEvent)> {
        self.access.require(caller, Role::Governance)?;

        venue.force_to_sync_state()?;
        self.close_all(venue, None, now)?;
        self.state = StrategyState::Unwound;
        self.ledger.refresh(&*venue)?;

        let position_size = std::mem::take(&mut self.idle_want);
        warn!(%position_size, governance = %self.access.governance(), "Emergency exit");
        Ok((
            position_size,
            StrategyEvent::EmergencyExit(EmergencyExit { position_size }),
        ))
    }

    /// Free up to `amount` want for the vault, unwinding both legs
    /// proportionally when idle want is short.
    pub fn release<M: Venue>(
        &mut self,
        venue: &mut M,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> StrategyResult<Decimal> {
        if amount <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }

        let shortfall = amount - self.idle_want;
        if shortfall > Decimal::ZERO {
            let price = venue.price_twap_long()?;
            let position = self.ledger.refresh(&*venue)?;
            let deployed = position.value(price);
            if shortfall > deployed {
                return Err(StrategyError::InsufficientLiquidity {
                    requested: amount,
                    available: self.idle_want + deployed,
                });
            }

            let engine = self.engine();
            let fraction = shortfall / deployed;
            if fraction >= Decimal::ONE {
                self.close_all(venue, Some(&engine), now)?;
            } else {
                self.reduce(venue, &engine, &position, fraction, price, now)?;
            }
        }

        let released = amount.min(self.idle_want);
        self.idle_want -= released;
        self.ledger.refresh(&*venue)?;
        debug!(requested = %amount, %released, "Want released to vault");
        Ok(released)
    }

    /// Close everything and hand all want to the vault.
    pub fn release_all<M: Venue>(&mut self, venue: &mut M, now: DateTime<Utc>) -> StrategyResult<Decimal> {
        let engine = self.engine();
        self.close_all(venue, Some(&engine), now)?;
        self.ledger.refresh(&*venue)?;
        let released = std::mem::take(&mut self.idle_want);
        debug!(%released, "All want released to vault");
        Ok(released)
    }

    // Setters

    pub fn set_liquidity_pool(&mut self, caller: &Address, pool: Address) -> StrategyResult<()> {
        self.access.require(caller, Role::Owner)?;
        self.settings.liquidity_pool = pool;
        Ok(())
    }

    pub fn set_uniswap_pool(&mut self, caller: &Address, pool: Address) -> StrategyResult<()> {
        self.access.require(caller, Role::Owner)?;
        self.settings.uniswap_pool = pool;
        Ok(())
    }

    pub fn set_basis_vault(&mut self, caller: &Address, vault: Address) -> StrategyResult<()> {
        self.access.require(caller, Role::Owner)?;
        self.settings.basis_vault = vault;
        Ok(())
    }

    pub fn set_buffer(&mut self, caller: &Address, buffer: u64) -> StrategyResult<()> {
        self.access.require(caller, Role::Owner)?;
        if buffer > MAX_BPS {
            return Err(StrategyError::invalid("!_buffer"));
        }
        info!(old = self.settings.buffer, new = buffer, "Buffer updated");
        self.settings.buffer = buffer;
        Ok(())
    }

    pub fn set_perpetual_index(&mut self, caller: &Address, perpetual_index: u32) -> StrategyResult<()> {
        self.access.require(caller, Role::Owner)?;
        self.settings.perpetual_index = perpetual_index;
        self.ledger.set_perpetual_index(perpetual_index);
        Ok(())
    }

    pub fn set_referrer(&mut self, caller: &Address, referrer: Address) -> StrategyResult<()> {
        self.access.require(caller, Role::Owner)?;
        self.settings.referrer = referrer;
        Ok(())
    }

    pub fn set_slippage_tolerance(&mut self, caller: &Address, tolerance: Decimal) -> StrategyResult<()> {
        self.access.require(caller, Role::Owner)?;
        if tolerance < Decimal::ZERO || tolerance >= Decimal::ONE {
            return Err(StrategyError::invalid("!_slippageTolerance"));
        }
        self.settings.slippage_tolerance = tolerance;
        Ok(())
    }

    pub fn set_dust(&mut self, caller: &Address, dust: Decimal) -> StrategyResult<()> {
        self.access.require(caller, Role::Owner)?;
        if dust < Decimal::ZERO {
            return Err(StrategyError::invalid("!_dust"));
        }
        self.settings.dust = dust;
        Ok(())
    }

    pub fn set_trade_mode(&mut self, caller: &Address, trade_mode: u32) -> StrategyResult<()> {
        self.access.require(caller, Role::Owner)?;
        self.settings.trade_mode = trade_mode;
        Ok(())
    }

    pub fn set_governance(&mut self, caller: &Address, governance: Address) -> StrategyResult<()> {
        self.access.set_governance(caller, governance)
    }

    pub fn add_keeper(&mut self, caller: &Address, keeper: Address) -> StrategyResult<()> {
        self.access.add_keeper(caller, keeper)
    }

    pub fn remove_keeper(&mut self, caller: &Address, keeper: &Address) -> StrategyResult<()> {
        self.access.remove_keeper(caller, keeper)
    }

    // Execution helpers

    fn require_active(&self) -> StrategyResult<()> {
        if self.is_unwind() {
            return Err(StrategyError::invalid("strategy is unwound"));
        }
        Ok(())
    }

    /// Split idle want into margin and long.
    fn deploy_idle<M: Venue>(&mut self, venue: &mut M, engine: &RebalanceEngine) -> StrategyResult<()> {
        if self.idle_want <= Decimal::ZERO {
            return Ok(());
        }

        let price = venue.price_twap_long()?;
        let split = engine.split(self.idle_want);
        debug!(
            amount = %self.idle_want,
            margin = %split.margin,
            long_want = %split.long_want,
            "Deploying idle want"
        );

        if split.long_want > Decimal::ZERO {
            self.buy_long(venue, engine, split.long_want, price)?;
        }
        if split.margin > Decimal::ZERO {
            self.deposit_margin(venue, split.margin)?;
        }
        Ok(())
    }

    /// Bring the short back to `-long`.
    fn rehedge<M: Venue>(
        &mut self,
        venue: &mut M,
        engine: &RebalanceEngine,
        now: DateTime<Utc>,
    ) -> StrategyResult<()> {
        let position = self.ledger.refresh(&*venue)?;
        if let Some(amount) = engine.hedge_adjustment(&position) {
            self.trade_perp(venue, Some(engine), amount, now)?;
        }
        Ok(())
    }

    /// Shrink both legs and the margin by `fraction`.
    fn reduce<M: Venue>(
        &mut self,
        venue: &mut M,
        engine: &RebalanceEngine,
        position: &Position,
        fraction: Decimal,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> StrategyResult<()> {
        let sell = position.long_balance * fraction;
        if sell > Decimal::ZERO {
            self.sell_long(venue, engine, sell, price)?;
        }
        self.rehedge(venue, engine, now)?;

        let margin = self.ledger.get_margin(&*venue)?;
        let withdraw = margin * fraction;
        if withdraw > Decimal::ZERO {
            self.withdraw_margin(venue, withdraw)?;
        }
        Ok(())
    }

    /// Close the short, sell the long and pull all margin. `None` for the
    /// engine trades without price limits.
    fn close_all<M: Venue>(
        &mut self,
        venue: &mut M,
        engine: Option<&RebalanceEngine>,
        now: DateTime<Utc>,
    ) -> StrategyResult<()> {
        let account = self.ledger.get_margin_account(&*venue)?;
        if account.position != Decimal::ZERO {
            self.trade_perp(venue, engine, -account.position, now)?;
        }

        let long = self.ledger.long_balance();
        if long > Decimal::ZERO {
            let price = venue.price_twap_long()?;
            let min_out = engine.map_or(Decimal::ZERO, |e| e.min_amount_out(long * price));
            let proceeds = venue.swap(SwapSide::LongToWant, long, min_out)?;
            self.ledger.debit_long(long);
            self.idle_want += proceeds;
        }

        let margin = self.ledger.get_margin(&*venue)?;
        if margin > Decimal::ZERO {
            self.withdraw_margin(venue, margin)?;
        }
        Ok(())
    }

    fn buy_long<M: Venue>(
        &mut self,
        venue: &mut M,
        engine: &RebalanceEngine,
        want: Decimal,
        price: Decimal,
    ) -> StrategyResult<Decimal> {
        let min_out = engine.min_amount_out(want / price);
        let bought = venue.swap(SwapSide::WantToLong, want, min_out)?;
        self.idle_want -= want;
        self.ledger.credit_long(bought);
        Ok(bought)
    }

    fn sell_long<M: Venue>(
        &mut self,
        venue: &mut M,
        engine: &RebalanceEngine,
        long: Decimal,
        price: Decimal,
    ) -> StrategyResult<Decimal> {
        let min_out = engine.min_amount_out(long * price);
        let proceeds = venue.swap(SwapSide::LongToWant, long, min_out)?;
        self.ledger.debit_long(long);
        self.idle_want += proceeds;
        Ok(proceeds)
    }

    fn deposit_margin<M: Venue>(&mut self, venue: &mut M, amount: Decimal) -> StrategyResult<()> {
        venue.deposit(self.settings.perpetual_index, &self.address, amount)?;
        self.idle_want -= amount;
        Ok(())
    }

    fn withdraw_margin<M: Venue>(&mut self, venue: &mut M, amount: Decimal) -> StrategyResult<()> {
        venue.withdraw(self.settings.perpetual_index, &self.address, amount)?;
        self.idle_want += amount;
        Ok(())
    }

    fn trade_perp<M: Venue>(
        &mut self,
        venue: &mut M,
        engine: Option<&RebalanceEngine>,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> StrategyResult<Decimal> {
        let limit_price = match engine {
            Some(engine) => {
                let mark = venue.mark_price(self.settings.perpetual_index)?;
                Some(engine.limit_price(mark, amount))
            }
            None => None,
        };

        let request = TradeRequest {
            perpetual_index: self.settings.perpetual_index,
            account: self.address.clone(),
            amount,
            limit_price,
            deadline: now + self.settings.trade_deadline,
            referrer: self.settings.referrer.clone(),
            mode: self.settings.trade_mode,
        };
        let filled = venue.trade(&request)?;
        debug!(%amount, %filled, limit_price = ?limit_price, "Perpetual trade");
        Ok(filled)
    }
}

/// A strategy paired with its venue, lent to the vault for withdrawals.
pub struct StrategyLiquidity<'a, M> {
    pub strategy: &'a mut BasisStrategy,
    pub venue: &'a mut M,
    pub now: DateTime<Utc>,
}

impl<M: Venue> LiquiditySource for StrategyLiquidity<'_, M> {
    fn release(&mut self, amount: Decimal) -> StrategyResult<Decimal> {
        self.strategy.release(self.venue, amount, self.now)
    }

    fn release_all(&mut self) -> StrategyResult<Decimal> {
        self.strategy.release_all(self.venue, self.now)
    }
}
