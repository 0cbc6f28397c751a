//! Share accounting for the basis vault.
//!
//! Tracks share balances, capital lent to the strategy, idle want, the
//! deposit cap and protocol fees. Want moving in or out of user wallets is
//! handled by the caller; this type only keeps the books.

use crate::access::{AccessControl, Address, Role};
use crate::config::VaultConfig;
use crate::error::{StrategyError, StrategyResult};
use crate::events::{Deposit, FeesCollected, Withdraw};
use crate::utils::decimal::{clamp_non_negative, SECONDS_PER_YEAR};
use crate::utils::{fee_fraction, safe_div, FEE_BPS};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Where the vault pulls capital back from when idle want runs short.
pub trait LiquiditySource {
    /// Recover up to `amount` want; returns what was actually recovered.
    fn release(&mut self, amount: Decimal) -> StrategyResult<Decimal>;

    /// Close everything and hand back all want.
    fn release_all(&mut self) -> StrategyResult<Decimal>;
}

/// Vault books: shares, lent capital and fees.
#[derive(Debug, Clone)]
pub struct VaultAccounting {
    address: Address,
    access: AccessControl,
    strategy: Option<Address>,
    shares: BTreeMap<Address, Decimal>,
    total_supply: Decimal,
    /// Want held by the vault itself
    idle: Decimal,
    /// Book value of capital with the strategy
    total_lent: Decimal,
    deposit_limit: Decimal,
    performance_fee_bps: u32,
    management_fee_bps: u32,
    protocol_fee_recipient: Address,
    last_report: DateTime<Utc>,
}

impl VaultAccounting {
    pub fn new(address: Address, access: AccessControl, config: &VaultConfig, now: DateTime<Utc>) -> Self {
        let protocol_fee_recipient = access.owner().clone();
        Self {
            address,
            access,
            strategy: None,
            shares: BTreeMap::new(),
            total_supply: Decimal::ZERO,
            idle: Decimal::ZERO,
            total_lent: Decimal::ZERO,
            deposit_limit: config.deposit_limit,
            performance_fee_bps: config.performance_fee_bps,
            management_fee_bps: config.management_fee_bps,
            protocol_fee_recipient,
            last_report: now,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn strategy(&self) -> Option<&Address> {
        self.strategy.as_ref()
    }

    pub fn share_balance(&self, account: &Address) -> Decimal {
        self.shares.get(account).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn total_supply(&self) -> Decimal {
        self.total_supply
    }

    pub fn idle(&self) -> Decimal {
        self.idle
    }

    pub fn total_lent(&self) -> Decimal {
        self.total_lent
    }

    /// Idle want plus book value lent out.
    pub fn total_assets(&self) -> Decimal {
        self.idle + self.total_lent
    }

    /// Want per share; 1 before the first deposit.
    pub fn price_per_share(&self) -> Decimal {
        if self.total_supply == Decimal::ZERO {
            return Decimal::ONE;
        }
        self.total_assets() / self.total_supply
    }

    pub fn deposit_limit(&self) -> Decimal {
        self.deposit_limit
    }

    pub fn protocol_fees(&self) -> (u32, u32) {
        (self.performance_fee_bps, self.management_fee_bps)
    }

    pub fn protocol_fee_recipient(&self) -> &Address {
        &self.protocol_fee_recipient
    }

    pub fn set_strategy(&mut self, caller: &Address, strategy: Address) -> StrategyResult<()> {
        self.access.require(caller, Role::Owner)?;
        info!(%strategy, "Vault strategy set");
        self.strategy = Some(strategy);
        Ok(())
    }

    pub fn set_deposit_limit(&mut self, caller: &Address, limit: Decimal) -> StrategyResult<()> {
        self.access.require(caller, Role::Owner)?;
        if limit < Decimal::ZERO {
            return Err(StrategyError::invalid("!_depositLimit"));
        }
        self.deposit_limit = limit;
        Ok(())
    }

    pub fn set_protocol_fees(
        &mut self,
        caller: &Address,
        performance_fee_bps: u32,
        management_fee_bps: u32,
    ) -> StrategyResult<()> {
        self.access.require(caller, Role::Owner)?;
        if performance_fee_bps > FEE_BPS || management_fee_bps > FEE_BPS {
            return Err(StrategyError::invalid("!_fees"));
        }
        self.performance_fee_bps = performance_fee_bps;
        self.management_fee_bps = management_fee_bps;
        Ok(())
    }

    pub fn set_protocol_fee_recipient(&mut self, caller: &Address, recipient: Address) -> StrategyResult<()> {
        self.access.require(caller, Role::Owner)?;
        self.protocol_fee_recipient = recipient;
        Ok(())
    }

    /// Book `amount` of want (already received) and mint shares to `recipient`.
    pub fn deposit(&mut self, amount: Decimal, recipient: &Address) -> StrategyResult<Deposit> {
        if amount <= Decimal::ZERO {
            return Err(StrategyError::invalid("!_amount"));
        }

        let total = self.total_assets() + amount;
        if total > self.deposit_limit {
            return Err(StrategyError::DepositLimitExceeded {
                total,
                limit: self.deposit_limit,
            });
        }

        let shares = if self.total_supply == Decimal::ZERO {
            amount
        } else {
            amount * self.total_supply / self.total_assets()
        };

        self.mint(recipient, shares);
        self.idle += amount;

        info!(user = %recipient, deposit = %amount, shares = %shares, "Vault deposit");
        Ok(Deposit {
            user: recipient.clone(),
            deposit: amount,
            shares,
        })
    }

    /// Burn `shares` of `owner` and pay out their value, pulling from
    /// `source` when idle want is not enough. `withdrawal` in the returned
    /// event is what the recipient actually receives.
    pub fn withdraw(
        &mut self,
        shares: Decimal,
        owner: &Address,
        recipient: &Address,
        source: &mut dyn LiquiditySource,
    ) -> StrategyResult<Withdraw> {
        if shares <= Decimal::ZERO {
            return Err(StrategyError::invalid("!_shares"));
        }
        let balance = self.share_balance(owner);
        if shares > balance {
            return Err(StrategyError::InsufficientShares {
                requested: shares,
                balance,
            });
        }

        let withdrawal = if shares == self.total_supply {
            // Last holder takes everything, strategy included.
            let released = source.release_all()?;
            let paid = self.idle + released;
            self.idle = Decimal::ZERO;
            self.total_lent = Decimal::ZERO;
            paid
        } else {
            let owed = shares * self.total_assets() / self.total_supply;
            if owed <= self.idle {
                self.idle -= owed;
                owed
            } else {
                let need = owed - self.idle;
                let released = source.release(need)?;
                if released < need {
                    debug!(%need, %released, "Strategy released less than requested");
                }
                let paid = self.idle + released;
                self.idle = Decimal::ZERO;
                self.total_lent = clamp_non_negative(self.total_lent - need);
                paid
            }
        };

        self.burn(owner, shares);

        info!(
            user = %owner,
            recipient = %recipient,
            shares = %shares,
            withdrawal = %withdrawal,
            "Vault withdrawal"
        );
        Ok(Withdraw {
            user: owner.clone(),
            withdrawal,
            shares,
        })
    }

    /// Mark the strategy's capital to `strategy_assets`. A gain pays protocol
    /// fees as newly minted shares; a loss writes `total_lent` down.
    pub fn report(
        &mut self,
        strategy: &Address,
        strategy_assets: Decimal,
        now: DateTime<Utc>,
    ) -> StrategyResult<Option<FeesCollected>> {
        self.require_strategy(strategy)?;

        let previous = self.total_lent;
        let elapsed = (now - self.last_report).num_seconds().max(0);
        self.last_report = now;
        self.total_lent = clamp_non_negative(strategy_assets);

        let gain = self.total_lent - previous;
        if gain <= Decimal::ZERO {
            if gain < Decimal::ZERO {
                warn!(loss = %(-gain), total_lent = %self.total_lent, "Strategy reported a loss");
            }
            return Ok(None);
        }

        let performance_fee = gain * fee_fraction(self.performance_fee_bps);
        let management_fee = (previous * fee_fraction(self.management_fee_bps) * Decimal::from(elapsed)
            / Decimal::from(SECONDS_PER_YEAR))
        .min(gain - performance_fee);
        let fees = performance_fee + management_fee;

        info!(gain = %gain, total_lent = %self.total_lent, "Strategy reported a gain");

        if fees <= Decimal::ZERO || self.total_supply == Decimal::ZERO {
            return Ok(None);
        }

        // Mint so the recipient's new shares are worth exactly `fees`.
        let shares = safe_div(fees * self.total_supply, self.total_assets() - fees);
        let recipient = self.protocol_fee_recipient.clone();
        self.mint(&recipient, shares);

        info!(
            %performance_fee,
            %management_fee,
            %shares,
            recipient = %recipient,
            "Protocol fees collected"
        );
        Ok(Some(FeesCollected {
            performance_fee,
            management_fee,
            shares,
        }))
    }

    /// Hand all idle want to the strategy.
    pub fn lend_idle(&mut self, strategy: &Address) -> StrategyResult<Decimal> {
        self.require_strategy(strategy)?;
        let amount = self.idle;
        self.idle = Decimal::ZERO;
        self.total_lent += amount;
        if amount > Decimal::ZERO {
            debug!(%amount, total_lent = %self.total_lent, "Idle want lent to strategy");
        }
        Ok(amount)
    }

    fn require_strategy(&self, strategy: &Address) -> StrategyResult<()> {
        match &self.strategy {
            Some(current) if current == strategy => Ok(()),
            _ => Err(StrategyError::invalid("!strategy")),
        }
    }

    fn mint(&mut self, account: &Address, shares: Decimal) {
        *self.shares.entry(account.clone()).or_insert(Decimal::ZERO) += shares;
        self.total_supply += shares;
    }

    fn burn(&mut self, account: &Address, shares: Decimal) {
        let balance = self.share_balance(account) - shares;
        if balance == Decimal::ZERO {
            self.shares.remove(account);
        } else {
            self.shares.insert(account.clone(), balance);
        }
        self.total_supply -= shares;
    }
}
