//! Scenario simulation on the in-memory venue.
//!
//! This module provides:
//! - Market paths (price and funding per step), built in code or loaded from CSV
//! - Scripted multi-user runs with the keeper policy in the loop
//! - Price-per-share metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use basis_vault::simulation::{MarketPath, Scenario, ScenarioRunner};
//!
//! let path = MarketPath::constant(dec!(2000), dec!(0.0001), 90);
//! let scenario = Scenario::demo(9, dec!(10000), path);
//! let result = ScenarioRunner::new(Config::default(), Utc::now()).run(&scenario)?;
//! println!("PPS: {}", result.metrics.end_price_per_share);
//! ```

mod engine;
mod metrics;
mod path;

pub use engine::{Scenario, ScenarioAction, ScenarioResult, ScenarioRunner, ScheduledAction, UserAction};
pub use metrics::{ActivityCounts, PpsPoint, ScenarioMetrics};
pub use path::{MarketPath, MarketStep};
