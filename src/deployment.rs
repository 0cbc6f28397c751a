//! A vault, its strategy and the venue they trade on, driven as one unit.
//!
//! Every operation runs through [`Deployment::transact`]: the whole state is
//! snapshotted first and restored if the operation fails, so a rejected
//! trade halfway through a harvest leaves no partial position behind.

use crate::access::{AccessControl, Address};
use crate::config::Config;
use crate::error::{StrategyError, StrategyResult};
use crate::events::{Receipt, StrategyEvent};
use crate::strategy::{BasisStrategy, Position, StrategyLiquidity, StrategySettings, StrategyState};
use crate::token::TokenLedger;
use crate::vault::{VaultAccounting, VaultRegistry};
use crate::venue::{SimulatedMarket, Venue};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Point-in-time view of vault and strategy, as stored by the keeper.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VaultSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_assets: Decimal,
    pub total_supply: Decimal,
    pub total_lent: Decimal,
    pub idle: Decimal,
    pub price_per_share: Decimal,
    pub state: StrategyState,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct Deployment<M> {
    venue: M,
    vault: VaultAccounting,
    strategy: BasisStrategy,
    registry: VaultRegistry,
    balances: TokenLedger,
    now: DateTime<Utc>,
}

impl<M: Venue + Clone> Deployment<M> {
    /// Wire up vault, strategy and registry from config. The configured
    /// keeper is registered on the strategy and the vault in the registry.
    pub fn new(config: &Config, venue: M, now: DateTime<Utc>) -> StrategyResult<Self> {
        let accounts = &config.accounts;
        let owner = Address::new(accounts.owner.clone());
        let vault_address = Address::new(accounts.vault.clone());
        let strategy_address = Address::new(accounts.strategy.clone());

        let access = AccessControl::new(owner.clone(), Address::new(accounts.governance.clone()));

        let mut strategy = BasisStrategy::new(
            strategy_address.clone(),
            access.clone(),
            StrategySettings::from_config(&config.strategy, vault_address.clone()),
        );
        strategy.add_keeper(&owner, Address::new(accounts.keeper.clone()))?;

        let mut vault = VaultAccounting::new(vault_address.clone(), access.clone(), &config.vault, now);
        vault.set_strategy(&owner, strategy_address)?;

        let mut registry = VaultRegistry::new(access);
        registry.register_vault(&owner, vault_address)?;

        info!(
            vault = %vault.address(),
            strategy = %strategy.address(),
            buffer = config.strategy.buffer,
            deposit_limit = %config.vault.deposit_limit,
            "Deployment initialized"
        );

        Ok(Self {
            venue,
            vault,
            strategy,
            registry,
            balances: TokenLedger::new(),
            now,
        })
    }

    /// Run `operation` atomically: on error every piece of state is rolled
    /// back to what it was before the call.
    pub fn transact<T>(
        &mut self,
        name: &'static str,
        operation: impl FnOnce(&mut Self) -> StrategyResult<T>,
    ) -> StrategyResult<T> {
        let checkpoint = self.clone();
        match operation(self) {
            Ok(value) => {
                debug!(operation = name, "Transaction committed");
                Ok(value)
            }
            Err(e) => {
                *self = checkpoint;
                warn!(operation = name, error = %e, "Transaction reverted");
                Err(e)
            }
        }
    }

    // Reads

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn venue(&self) -> &M {
        &self.venue
    }

    pub fn vault(&self) -> &VaultAccounting {
        &self.vault
    }

    pub fn strategy(&self) -> &BasisStrategy {
        &self.strategy
    }

    pub fn registry(&self) -> &VaultRegistry {
        &self.registry
    }

    /// Want held in `account`'s wallet.
    pub fn balance_of(&self, account: &Address) -> Decimal {
        self.balances.balance_of(account)
    }

    pub fn price_per_share(&self) -> Decimal {
        self.vault.price_per_share()
    }

    /// Position read from the pool at the current block.
    pub fn positions(&self) -> StrategyResult<Position> {
        self.strategy.positions(&self.venue)
    }

    pub fn funding_rate(&self) -> StrategyResult<Decimal> {
        self.strategy.get_funding_rate(&self.venue)
    }

    pub fn snapshot(&self) -> StrategyResult<VaultSnapshot> {
        Ok(VaultSnapshot {
            timestamp: self.now,
            total_assets: self.vault.total_assets(),
            total_supply: self.vault.total_supply(),
            total_lent: self.vault.total_lent(),
            idle: self.vault.idle(),
            price_per_share: self.vault.price_per_share(),
            state: self.strategy.state(),
            position: self.positions()?,
        })
    }

    // Parameter access; setters check roles and change a single value.

    pub fn strategy_mut(&mut self) -> &mut BasisStrategy {
        &mut self.strategy
    }

    pub fn vault_mut(&mut self) -> &mut VaultAccounting {
        &mut self.vault
    }

    pub fn venue_mut(&mut self) -> &mut M {
        &mut self.venue
    }

    /// Move the block clock without touching the venue.
    pub fn set_time(&mut self, now: DateTime<Utc>) {
        self.now = now;
    }

    /// Credit want to a wallet (test and simulation faucet).
    pub fn mint_want(&mut self, account: &Address, amount: Decimal) {
        self.balances.credit(account, amount);
    }

    // Operations

    pub fn deposit(&mut self, caller: &Address, amount: Decimal) -> StrategyResult<Receipt> {
        self.transact("deposit", |d| {
            if !d.registry.is_vault(d.vault.address()) {
                return Err(StrategyError::invalid("vault not active"));
            }
            d.balances.debit(caller, amount)?;
            let event = d.vault.deposit(amount, caller)?;
            Ok(Receipt::new(vec![StrategyEvent::Deposit(event)]))
        })
    }

    pub fn withdraw(&mut self, caller: &Address, shares: Decimal) -> StrategyResult<Receipt> {
        self.transact("withdraw", |d| {
            let Self {
                venue,
                vault,
                strategy,
                balances,
                now,
                ..
            } = d;
            let mut source = StrategyLiquidity {
                strategy,
                venue,
                now: *now,
            };
            let event = vault.withdraw(shares, caller, caller, &mut source)?;
            balances.credit(caller, event.withdrawal);
            Ok(Receipt::new(vec![StrategyEvent::Withdraw(event)]))
        })
    }

    pub fn harvest(&mut self, caller: &Address) -> StrategyResult<Receipt> {
        self.transact("harvest", |d| {
            let now = d.now;
            let events = d.strategy.harvest(caller, &mut d.venue, &mut d.vault, now)?;
            Ok(Receipt::new(events))
        })
    }

    pub fn remargin(&mut self, caller: &Address) -> StrategyResult<Receipt> {
        self.transact("remargin", |d| {
            let now = d.now;
            let event = d.strategy.remargin(caller, &mut d.venue, now)?;
            Ok(Receipt::new(vec![event]))
        })
    }

    pub fn unwind(&mut self, caller: &Address) -> StrategyResult<Receipt> {
        self.transact("unwind", |d| {
            let now = d.now;
            let event = d.strategy.unwind(caller, &mut d.venue, now)?;
            Ok(Receipt::new(vec![event]))
        })
    }

    pub fn resume(&mut self, caller: &Address) -> StrategyResult<Receipt> {
        self.transact("resume", |d| {
            d.strategy.resume(caller)?;
            Ok(Receipt::default())
        })
    }

    /// Governance pulls everything out; the recovered want lands in the
    /// governance wallet.
    pub fn emergency_exit(&mut self, caller: &Address) -> StrategyResult<Receipt> {
        self.transact("emergency_exit", |d| {
            let now = d.now;
            let (amount, event) = d.strategy.emergency_exit(caller, &mut d.venue, now)?;
            let governance = d.strategy.access().governance().clone();
            d.balances.credit(&governance, amount);
            Ok(Receipt::new(vec![event]))
        })
    }

    pub fn deactivate_vault(&mut self, caller: &Address, vault: &Address) -> StrategyResult<Receipt> {
        self.transact("deactivate_vault", |d| {
            let event = d.registry.deactivate_vault(caller, vault)?;
            Ok(Receipt::new(vec![StrategyEvent::VaultDeactivated(event)]))
        })
    }

    pub fn register_vault(&mut self, caller: &Address, vault: Address) -> StrategyResult<Receipt> {
        self.transact("register_vault", |d| {
            d.registry.register_vault(caller, vault)?;
            Ok(Receipt::default())
        })
    }
}

impl Deployment<SimulatedMarket> {
    /// Advance the block clock and the simulated venue together.
    pub fn advance_time(&mut self, elapsed: Duration) {
        self.venue.advance(elapsed);
        self.now = self.venue.now();
    }
}
