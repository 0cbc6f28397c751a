//! Events emitted by vault and strategy operations.
//!
//! Field names serialise in the same camelCase form the on-chain events use,
//! so logs and stored receipts stay comparable with the deployed contracts.

use crate::access::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Harvest {
    pub long_position: Decimal,
    pub perp_contracts: Decimal,
    pub margin: Decimal,
}

/// Signed long-asset amount moved by a remargin: positive when long was sold
/// into margin, negative when margin was redeployed into long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Remargined {
    pub unwind_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyUnwind {
    pub position_size: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyExit {
    pub position_size: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    pub user: Address,
    pub deposit: Decimal,
    pub shares: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdraw {
    pub user: Address,
    pub withdrawal: Decimal,
    pub shares: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeesCollected {
    pub performance_fee: Decimal,
    pub management_fee: Decimal,
    pub shares: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultDeactivated {
    pub vault: Address,
}

/// Every event kind, tagged by name when serialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum StrategyEvent {
    Harvest(Harvest),
    Remargined(Remargined),
    StrategyUnwind(StrategyUnwind),
    EmergencyExit(EmergencyExit),
    Deposit(Deposit),
    Withdraw(Withdraw),
    FeesCollected(FeesCollected),
    VaultDeactivated(VaultDeactivated),
}

impl StrategyEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyEvent::Harvest(_) => "Harvest",
            StrategyEvent::Remargined(_) => "Remargined",
            StrategyEvent::StrategyUnwind(_) => "StrategyUnwind",
            StrategyEvent::EmergencyExit(_) => "EmergencyExit",
            StrategyEvent::Deposit(_) => "Deposit",
            StrategyEvent::Withdraw(_) => "Withdraw",
            StrategyEvent::FeesCollected(_) => "FeesCollected",
            StrategyEvent::VaultDeactivated(_) => "VaultDeactivated",
        }
    }
}

/// Events emitted by one committed transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Receipt {
    pub events: Vec<StrategyEvent>,
}

macro_rules! receipt_accessor {
    ($fn_name:ident, $variant:ident) => {
        pub fn $fn_name(&self) -> Option<&$variant> {
            self.events.iter().find_map(|event| match event {
                StrategyEvent::$variant(inner) => Some(inner),
                _ => None,
            })
        }
    };
}

impl Receipt {
    pub fn new(events: Vec<StrategyEvent>) -> Self {
        Self { events }
    }

    /// Whether an event with this name was emitted.
    pub fn contains(&self, name: &str) -> bool {
        self.events.iter().any(|event| event.name() == name)
    }

    receipt_accessor!(harvest, Harvest);
    receipt_accessor!(remargined, Remargined);
    receipt_accessor!(strategy_unwind, StrategyUnwind);
    receipt_accessor!(emergency_exit, EmergencyExit);
    receipt_accessor!(deposit, Deposit);
    receipt_accessor!(withdraw, Withdraw);
    receipt_accessor!(fees_collected, FeesCollected);
    receipt_accessor!(vault_deactivated, VaultDeactivated);
}
