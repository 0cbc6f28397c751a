//! Shared utilities.

pub mod decimal;

pub use decimal::{
    as_percent, buffer_fraction, fee_fraction, round_to_precision, safe_div, within, FEE_BPS, MAX_BPS,
};
