//! Configuration management for the basis vault.
//!
//! Loads settings from environment variables and config files.

use crate::utils::{FEE_BPS, MAX_BPS};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Account roles of the deployment
    #[serde(default)]
    pub accounts: AccountsConfig,
    /// Strategy parameters (owner-settable at runtime)
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Vault limits and protocol fees
    #[serde(default)]
    pub vault: VaultConfig,
    /// Harvest keeper schedule
    #[serde(default)]
    pub keeper: KeeperConfig,
    /// Simulated venue parameters
    #[serde(default)]
    pub market: MarketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// Deployer / owner account
    #[serde(default = "default_owner")]
    pub owner: String,
    /// Governance account (emergency exit authority)
    #[serde(default = "default_governance")]
    pub governance: String,
    /// Keeper account allowed to harvest
    #[serde(default = "default_keeper")]
    pub keeper: String,
    /// Strategy's own address (margin account holder)
    #[serde(default = "default_strategy_address")]
    pub strategy: String,
    /// Vault address
    #[serde(default = "default_vault_address")]
    pub vault: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Perpetual liquidity pool address
    #[serde(default = "default_liquidity_pool")]
    pub liquidity_pool: String,
    /// Uniswap-style spot pool address
    #[serde(default = "default_uniswap_pool")]
    pub uniswap_pool: String,
    /// Target buffer in parts of 1_000_000
    #[serde(default = "default_buffer")]
    pub buffer: u64,
    /// Perpetual index on the liquidity pool
    #[serde(default)]
    pub perpetual_index: u32,
    /// Referrer passed with every trade
    #[serde(default = "default_referrer")]
    pub referrer: String,
    /// Maximum slippage tolerance (0.0-1.0)
    #[serde(default = "default_slippage_tolerance")]
    pub slippage_tolerance: Decimal,
    /// Smallest long-asset amount worth trading
    #[serde(default = "default_dust")]
    pub dust: Decimal,
    /// Trade mode flag forwarded to the pool
    #[serde(default = "default_trade_mode")]
    pub trade_mode: u32,
    /// Seconds a trade may wait before the pool rejects it
    #[serde(default = "default_trade_deadline")]
    pub trade_deadline_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Maximum total assets the vault accepts
    #[serde(default = "default_deposit_limit")]
    pub deposit_limit: Decimal,
    /// Performance fee on harvested profit, in parts of 10_000
    #[serde(default)]
    pub performance_fee_bps: u32,
    /// Annual management fee on lent capital, in parts of 10_000
    #[serde(default)]
    pub management_fee_bps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Seconds between keeper ticks
    #[serde(default = "default_keeper_interval")]
    pub interval_secs: u64,
    /// SQLite database for events and snapshots
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Starting long-asset price in want
    #[serde(default = "default_initial_price")]
    pub initial_price: Decimal,
    /// Funding rate per 8h period
    #[serde(default = "default_funding_rate")]
    pub funding_rate: Decimal,
    /// Perpetual taker fee
    #[serde(default = "default_perp_fee_rate")]
    pub perp_fee_rate: Decimal,
    /// Spot swap fee
    #[serde(default = "default_spot_fee_rate")]
    pub spot_fee_rate: Decimal,
    /// Initial margin requirement
    #[serde(default = "default_initial_margin_rate")]
    pub initial_margin_rate: Decimal,
    /// Maintenance margin requirement
    #[serde(default = "default_maintenance_margin_rate")]
    pub maintenance_margin_rate: Decimal,
}

// Default value functions
fn default_owner() -> String {
    "0xdeployer".to_string()
}

fn default_governance() -> String {
    "0xgovernance".to_string()
}

fn default_keeper() -> String {
    "0xkeeper".to_string()
}

fn default_strategy_address() -> String {
    "0xstrategy".to_string()
}

fn default_vault_address() -> String {
    "0xvault".to_string()
}

fn default_liquidity_pool() -> String {
    "0xaB324146C49B23658E5b3930E641BDBDf089CbAc".to_string()
}

fn default_uniswap_pool() -> String {
    "0x17c14D2c404D167802b16C450d3c99F88F2c4F4d".to_string()
}

fn default_buffer() -> u64 {
    200_000 // 20%
}

fn default_referrer() -> String {
    "0x0000000000000000000000000000000000000000".to_string()
}

fn default_slippage_tolerance() -> Decimal {
    Decimal::new(5, 3) // 0.005 (0.5%)
}

fn default_dust() -> Decimal {
    Decimal::new(1000, 18) // 1000 wei of an 18-decimal asset
}

fn default_trade_mode() -> u32 {
    0x4000_0000
}

fn default_trade_deadline() -> i64 {
    300
}

fn default_deposit_limit() -> Decimal {
    Decimal::new(10_000_000, 0)
}

fn default_keeper_interval() -> u64 {
    6 * 3600 // try again every 6 hours
}

fn default_db_path() -> String {
    "data/keeper.db".to_string()
}

fn default_initial_price() -> Decimal {
    Decimal::new(2000, 0)
}

fn default_funding_rate() -> Decimal {
    Decimal::new(1, 4) // 0.01% per 8h
}

fn default_perp_fee_rate() -> Decimal {
    Decimal::new(5, 4) // 0.05%
}

fn default_spot_fee_rate() -> Decimal {
    Decimal::new(5, 4) // 0.05% pool tier
}

fn default_initial_margin_rate() -> Decimal {
    Decimal::new(1, 1) // 10%
}

fn default_maintenance_margin_rate() -> Decimal {
    Decimal::new(5, 2) // 5%
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("BASIS"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.strategy.buffer <= MAX_BPS,
            "buffer must be at most {}",
            MAX_BPS
        );

        anyhow::ensure!(
            self.strategy.slippage_tolerance >= Decimal::ZERO
                && self.strategy.slippage_tolerance < Decimal::ONE,
            "slippage_tolerance must be in [0, 1)"
        );

        anyhow::ensure!(
            self.strategy.dust >= Decimal::ZERO,
            "dust must not be negative"
        );

        anyhow::ensure!(
            self.strategy.trade_deadline_secs > 0,
            "trade_deadline_secs must be positive"
        );

        anyhow::ensure!(
            self.vault.performance_fee_bps <= FEE_BPS && self.vault.management_fee_bps <= FEE_BPS,
            "protocol fees must be at most {} bps",
            FEE_BPS
        );

        anyhow::ensure!(
            self.vault.deposit_limit > Decimal::ZERO,
            "deposit_limit must be positive"
        );

        anyhow::ensure!(
            self.market.initial_price > Decimal::ZERO,
            "initial_price must be positive"
        );

        anyhow::ensure!(
            self.keeper.interval_secs > 0,
            "keeper interval must be positive"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accounts: AccountsConfig::default(),
            strategy: StrategyConfig::default(),
            vault: VaultConfig::default(),
            keeper: KeeperConfig::default(),
            market: MarketConfig::default(),
        }
    }
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            governance: default_governance(),
            keeper: default_keeper(),
            strategy: default_strategy_address(),
            vault: default_vault_address(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            liquidity_pool: default_liquidity_pool(),
            uniswap_pool: default_uniswap_pool(),
            buffer: default_buffer(),
            perpetual_index: 0,
            referrer: default_referrer(),
            slippage_tolerance: default_slippage_tolerance(),
            dust: default_dust(),
            trade_mode: default_trade_mode(),
            trade_deadline_secs: default_trade_deadline(),
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            deposit_limit: default_deposit_limit(),
            performance_fee_bps: 0,
            management_fee_bps: 0,
        }
    }
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_keeper_interval(),
            db_path: default_db_path(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            initial_price: default_initial_price(),
            funding_rate: default_funding_rate(),
            perp_fee_rate: default_perp_fee_rate(),
            spot_fee_rate: default_spot_fee_rate(),
            initial_margin_rate: default_initial_margin_rate(),
            maintenance_margin_rate: default_maintenance_margin_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.strategy.trade_mode, 0x4000_0000);
        assert_eq!(config.strategy.dust, Decimal::new(1, 15));
    }

    #[test]
    fn test_buffer_above_max_is_rejected() {
        let mut config = Config::default();
        config.strategy.buffer = MAX_BPS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fee_above_max_is_rejected() {
        let mut config = Config::default();
        config.vault.performance_fee_bps = FEE_BPS + 1;
        assert!(config.validate().is_err());
    }
}
