//! Owner-managed set of active vaults.

use crate::access::{AccessControl, Address, Role};
use crate::error::{StrategyError, StrategyResult};
use crate::events::VaultDeactivated;
use std::collections::BTreeSet;
use tracing::info;

#[derive(Debug, Clone)]
pub struct VaultRegistry {
    access: AccessControl,
    vaults: BTreeSet<Address>,
}

impl VaultRegistry {
    pub fn new(access: AccessControl) -> Self {
        Self {
            access,
            vaults: BTreeSet::new(),
        }
    }

    pub fn register_vault(&mut self, caller: &Address, vault: Address) -> StrategyResult<()> {
        self.access.require(caller, Role::Owner)?;
        if vault.is_zero() {
            return Err(StrategyError::invalid("!_vault"));
        }
        if !self.vaults.insert(vault.clone()) {
            return Err(StrategyError::invalid("vault already registered"));
        }
        info!(%vault, "Vault registered");
        Ok(())
    }

    pub fn deactivate_vault(&mut self, caller: &Address, vault: &Address) -> StrategyResult<VaultDeactivated> {
        self.access.require(caller, Role::Owner)?;
        if !self.vaults.remove(vault) {
            return Err(StrategyError::invalid("vault not active"));
        }
        info!(%vault, "Vault deactivated");
        Ok(VaultDeactivated { vault: vault.clone() })
    }

    pub fn is_vault(&self, vault: &Address) -> bool {
        self.vaults.contains(vault)
    }

    pub fn vaults(&self) -> impl Iterator<Item = &Address> {
        self.vaults.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> VaultRegistry {
        VaultRegistry::new(AccessControl::new(Address::from("owner"), Address::from("gov")))
    }

    #[test]
    fn test_register_and_deactivate() {
        let mut registry = registry();
        let owner = Address::from("owner");
        let vault = Address::from("vault");

        registry.register_vault(&owner, vault.clone()).unwrap();
        assert!(registry.is_vault(&vault));
        assert!(registry.register_vault(&owner, vault.clone()).is_err());

        let event = registry.deactivate_vault(&owner, &vault).unwrap();
        assert_eq!(event.vault, vault);
        assert!(!registry.is_vault(&vault));
        assert!(registry.deactivate_vault(&owner, &vault).is_err());
    }

    #[test]
    fn test_registry_is_owner_only() {
        let mut registry = registry();
        let stranger = Address::from("stranger");

        let err = registry
            .register_vault(&stranger, Address::from("vault"))
            .unwrap_err();
        assert!(matches!(err, StrategyError::AccessDenied { .. }));
        assert!(registry.register_vault(&Address::from("owner"), Address::zero()).is_err());
        assert_eq!(registry.vaults().count(), 0);
    }
}
