//! Balances of the want token held by accounts outside the vault/strategy pair.

use crate::access::Address;
use crate::error::{StrategyError, StrategyResult};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// ERC20-style balance book.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenLedger {
    balances: BTreeMap<Address, Decimal>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: &Address) -> Decimal {
        self.balances.get(account).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn credit(&mut self, account: &Address, amount: Decimal) {
        *self.balances.entry(account.clone()).or_insert(Decimal::ZERO) += amount;
    }

    pub fn debit(&mut self, account: &Address, amount: Decimal) -> StrategyResult<()> {
        let balance = self.balance_of(account);
        if amount > balance {
            return Err(StrategyError::InsufficientBalance {
                account: account.clone(),
                balance,
                required: amount,
            });
        }
        self.balances.insert(account.clone(), balance - amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_credit_and_debit() {
        let mut ledger = TokenLedger::new();
        let alice = Address::from("alice");

        ledger.credit(&alice, dec!(100));
        ledger.debit(&alice, dec!(40)).unwrap();
        assert_eq!(ledger.balance_of(&alice), dec!(60));

        let err = ledger.debit(&alice, dec!(61)).unwrap_err();
        assert!(matches!(err, StrategyError::InsufficientBalance { .. }));
        assert_eq!(ledger.balance_of(&alice), dec!(60));
    }
}
