//! # Basis Vault
//!
//! A delta-neutral basis strategy behind a share-accounting vault: deposits
//! are split between a spot long and margin backing an equal perpetual short,
//! and the funding paid to the short accrues to shareholders.
//!
//! ## Architecture
//!
//! - `access`: Addresses and owner/governance/keeper roles
//! - `config`: Configuration management and validation
//! - `error` / `events`: Failure taxonomy and emitted events
//! - `token`: Want balances held outside the vault
//! - `venue`: Oracle, margin pool and spot router traits plus a simulated venue
//! - `strategy`: Position ledger, buffer math and the basis strategy operations
//! - `vault`: Share accounting, protocol fees and the vault registry
//! - `deployment`: Atomic transactions over vault, strategy and venue
//! - `scheduler`: Harvest keeper policy and loop
//! - `persistence`: SQLite store for keeper events and snapshots
//! - `simulation`: Scripted scenarios and price-per-share metrics
//! - `utils`: Shared utilities and decimal arithmetic

pub mod access;
pub mod config;
pub mod deployment;
pub mod error;
pub mod events;
pub mod persistence;
pub mod scheduler;
pub mod simulation;
pub mod strategy;
pub mod token;
pub mod utils;
pub mod vault;
pub mod venue;

pub use config::Config;
pub use deployment::Deployment;
pub use error::{StrategyError, StrategyResult};
