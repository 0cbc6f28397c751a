//! Basis strategy implementation.
//!
//! Contains the core logic for:
//! - Position tracking across the spot long and the perpetual short
//! - Buffer-driven capital split and remargin planning
//! - Harvest, remargin, unwind and emergency exit execution

mod basis;
mod ledger;
mod rebalance;

pub use basis::{BasisStrategy, StrategyLiquidity, StrategySettings, StrategyState};
pub use ledger::{Position, PositionLedger};
pub use rebalance::{leverage, CapitalSplit, RebalanceEngine, RemarginAction, RemarginPlan};
