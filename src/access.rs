//! Account identifiers and role-based access control.
//!
//! Every privileged entry point checks the caller against an explicit
//! [`AccessControl`] value instead of relying on ambient sender state.

use crate::error::{StrategyError, StrategyResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Opaque account identifier (an address on the settlement chain).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The zero address, used as "no referrer".
    pub fn zero() -> Self {
        Self("0x0000000000000000000000000000000000000000".to_string())
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Privilege levels checked at operation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    /// Deployer; configures parameters and may run keeper operations.
    Owner,
    /// Crisis authority; may force an emergency exit.
    Governance,
    /// Owner or a registered keeper.
    Authorised,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Owner => write!(f, "owner"),
            Role::Governance => write!(f, "governance"),
            Role::Authorised => write!(f, "authorised"),
        }
    }
}

/// Role assignments for one contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessControl {
    owner: Address,
    governance: Address,
    keepers: BTreeSet<Address>,
}

impl AccessControl {
    pub fn new(owner: Address, governance: Address) -> Self {
        Self {
            owner,
            governance,
            keepers: BTreeSet::new(),
        }
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    pub fn governance(&self) -> &Address {
        &self.governance
    }

    pub fn is_keeper(&self, account: &Address) -> bool {
        self.keepers.contains(account)
    }

    /// Check that `caller` holds `role`.
    pub fn require(&self, caller: &Address, role: Role) -> StrategyResult<()> {
        let allowed = match role {
            Role::Owner => *caller == self.owner,
            Role::Governance => *caller == self.governance,
            Role::Authorised => *caller == self.owner || self.keepers.contains(caller),
        };

        if allowed {
            Ok(())
        } else {
            Err(StrategyError::AccessDenied {
                caller: caller.clone(),
                required: role,
            })
        }
    }

    /// Hand governance to a new account. Only the current governance may do this.
    pub fn set_governance(&mut self, caller: &Address, governance: Address) -> StrategyResult<()> {
        self.require(caller, Role::Governance)?;
        self.governance = governance;
        Ok(())
    }

    pub fn add_keeper(&mut self, caller: &Address, keeper: Address) -> StrategyResult<()> {
        self.require(caller, Role::Owner)?;
        self.keepers.insert(keeper);
        Ok(())
    }

    pub fn remove_keeper(&mut self, caller: &Address, keeper: &Address) -> StrategyResult<()> {
        self.require(caller, Role::Owner)?;
        self.keepers.remove(keeper);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles() -> AccessControl {
        AccessControl::new(Address::from("owner"), Address::from("gov"))
    }

    #[test]
    fn test_owner_and_keeper_are_authorised() {
        let mut acl = roles();
        let keeper = Address::from("keeper");

        assert!(acl.require(&Address::from("owner"), Role::Authorised).is_ok());
        assert!(acl.require(&keeper, Role::Authorised).is_err());

        acl.add_keeper(&Address::from("owner"), keeper.clone()).unwrap();
        assert!(acl.require(&keeper, Role::Authorised).is_ok());
        assert!(acl.require(&keeper, Role::Owner).is_err());

        acl.remove_keeper(&Address::from("owner"), &keeper).unwrap();
        assert!(!acl.is_keeper(&keeper));
    }

    #[test]
    fn test_only_governance_moves_governance() {
        let mut acl = roles();

        let err = acl
            .set_governance(&Address::from("owner"), Address::from("new-gov"))
            .unwrap_err();
        assert!(matches!(err, StrategyError::AccessDenied { required: Role::Governance, .. }));

        acl.set_governance(&Address::from("gov"), Address::from("new-gov"))
            .unwrap();
        assert_eq!(acl.governance(), &Address::from("new-gov"));
    }

    #[test]
    fn test_zero_address() {
        assert!(Address::zero().is_zero());
        assert!(!Address::from("0xabc").is_zero());
    }
}
