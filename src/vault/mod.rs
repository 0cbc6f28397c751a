//! Vault share accounting and the vault registry.

mod accounting;
mod registry;

pub use accounting::{LiquiditySource, VaultAccounting};
pub use registry::VaultRegistry;
