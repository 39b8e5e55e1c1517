use alloy_primitives::{Address, B256, U256};
use std::collections::HashSet;

use crate::error::{BenchError, Result};
use crate::merkle::leaf_digest;

/// Default first payee index. Low addresses are precompiles on EVM ledgers
/// and make value transfers fail, so payees start well above them.
pub const DEFAULT_PAYEE_BASE: u64 = 10_000;

/// One unit of intended transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepositRecord {
    pub payee: Address,
    pub amount: U256,
}

impl DepositRecord {
    pub fn new(payee: Address, amount: U256) -> Self {
        Self { payee, amount }
    }

    /// Merkle leaf committing to this deposit.
    pub fn leaf(&self) -> B256 {
        leaf_digest(self.payee, self.amount)
    }
}

/// Returns true for identities the ledger handles specially: the zero
/// address and the precompile range `0x01..=0xff`.
pub fn is_reserved_identity(address: Address) -> bool {
    address.as_slice()[..19].iter().all(|b| *b == 0)
}

/// Big-endian address for a payee index (`10000` -> `0x…2710`).
pub fn payee_address(index: u64) -> Address {
    let mut bytes = [0u8; 20];
    bytes[12..].copy_from_slice(&index.to_be_bytes());
    Address::from(bytes)
}

/// Generates deterministic payee sets that never include the operator.
#[derive(Debug, Clone)]
pub struct PayeeGenerator {
    operator: Address,
    amount_unit: U256,
}

impl PayeeGenerator {
    pub fn new(operator: Address, amount_unit: U256) -> Self {
        Self { operator, amount_unit }
    }

    pub fn operator(&self) -> Address {
        self.operator
    }

    /// Returns `n` distinct payees counting up from `base`, skipping the
    /// operator and reserved identities.
    pub fn payees(&self, base: u64, n: usize) -> Result<Vec<Address>> {
        let mut payees = Vec::with_capacity(n);
        let mut index = base;
        while payees.len() < n {
            let payee = payee_address(index);
            if payee != self.operator && !is_reserved_identity(payee) {
                payees.push(payee);
            }
            index = index.checked_add(1).ok_or_else(|| {
                BenchError::MalformedInput(format!("payee index overflow from base {base}"))
            })?;
        }

        ensure_distinct(&payees, self.operator)?;
        Ok(payees)
    }

    /// Amount `i` is `(10 + i) * amount_unit`.
    pub fn amounts(&self, n: usize) -> Vec<U256> {
        (0..n)
            .map(|i| U256::from(10 + i as u64) * self.amount_unit)
            .collect()
    }

    /// Payees and amounts for one trial of size `n`.
    pub fn deposits(&self, base: u64, n: usize) -> Result<Vec<DepositRecord>> {
        let payees = self.payees(base, n)?;
        let amounts = self.amounts(n);
        Ok(payees
            .into_iter()
            .zip(amounts)
            .map(|(payee, amount)| DepositRecord::new(payee, amount))
            .collect())
    }
}

/// Checks the uniqueness guard: no duplicates and never the operator.
pub fn ensure_distinct(payees: &[Address], operator: Address) -> Result<()> {
    let mut seen = HashSet::with_capacity(payees.len());
    for payee in payees {
        if *payee == operator {
            return Err(BenchError::MalformedInput(format!(
                "payee set contains the operator {operator}"
            )));
        }
        if !seen.insert(*payee) {
            return Err(BenchError::MalformedInput(format!("duplicate payee {payee}")));
        }
    }
    Ok(())
}

/// Sum of all amounts, sent as the bulk deposit's value.
pub fn total_value(amounts: &[U256]) -> U256 {
    amounts.iter().fold(U256::ZERO, |acc, amount| acc + *amount)
}
