//! Venues the strategy trades against.
//!
//! ## Interfaces
//! - `PriceOracle`: TWAP of the long asset
//! - `MarginPool`: perpetual margin account, trades, funding
//! - `SpotRouter`: want <-> long swaps
//!
//! ## Simulation
//! `SimulatedMarket` implements all three deterministically for tests,
//! scenario runs and the keeper in paper mode.

pub mod simulated;
mod traits;

pub use simulated::{SimulatedAccount, SimulatedMarket};
pub use traits::*;
