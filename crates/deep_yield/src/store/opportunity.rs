//! Opportunity record and its embedded per-account deposit map.

use crate::error::{LedgerError, Operation};
use crate::store::types::{AccountId, Amount, OpportunityId, RiskLevel};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: OpportunityId,
    pub protocol: String,
    /// Annual percentage yield, in percent.
    pub apy: Decimal,
    pub tvl: Amount,
    pub risk: u8,
    pub(crate) deposits: BTreeMap<AccountId, Amount>,
    pub(crate) total_deposits: Amount,
}

impl Opportunity {
    pub(crate) fn new(
        id: OpportunityId,
        protocol: String,
        apy: Decimal,
        tvl: Amount,
        risk: u8,
    ) -> Self {
        Self {
            id,
            protocol,
            apy,
            tvl,
            risk,
            deposits: BTreeMap::new(),
            total_deposits: Amount::ZERO,
        }
    }

    pub fn deposits(&self) -> &BTreeMap<AccountId, Amount> {
        &self.deposits
    }

    pub fn total_deposits(&self) -> Amount {
        self.total_deposits
    }

    /// Balance for `account`; zero when the account never deposited.
    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.deposits.get(account).copied().unwrap_or(Amount::ZERO)
    }

    pub fn risk_level(&self, max_risk: u8) -> RiskLevel {
        RiskLevel::classify(self.risk, max_risk)
    }

    /// Re-derive the balance sum and compare it with the cached total.
    /// Balances are unsigned, so non-negativity holds by construction.
    pub fn verify_invariants(&self, op: Operation) -> Result<(), LedgerError> {
        let mut derived = Amount::ZERO;
        for balance in self.deposits.values() {
            derived = derived.checked_add(*balance).ok_or_else(|| {
                LedgerError::invariant(
                    op,
                    format!("balances of opportunity {} overflow", self.id),
                )
            })?;
        }
        if derived != self.total_deposits {
            return Err(LedgerError::invariant(
                op,
                format!(
                    "opportunity {}: total_deposits {} != sum of balances {}",
                    self.id, self.total_deposits, derived
                ),
            ));
        }
        Ok(())
    }
}

/// Largest TVL, single or summed over the store, that snapshots can divide
/// exactly: the `Decimal` mantissa limit, `2^96 - 1`.
pub const MAX_TVL: Amount = Amount(79_228_162_514_264_337_593_543_950_335);

/// Check the market parameters shared by add, update, and load.
pub(crate) fn validate_market_params(
    op: Operation,
    protocol: &str,
    apy: Decimal,
    tvl: Amount,
    risk: u8,
    max_risk: u8,
) -> Result<(), LedgerError> {
    if protocol.trim().is_empty() {
        return Err(LedgerError::invalid(op, "protocol name is empty"));
    }
    if apy < Decimal::ZERO {
        return Err(LedgerError::invalid(
            op,
            format!("apy must be >= 0, got {}", apy),
        ));
    }
    if tvl > MAX_TVL {
        return Err(LedgerError::invalid(
            op,
            format!("tvl {} exceeds {}", tvl, MAX_TVL),
        ));
    }
    if risk > max_risk {
        return Err(LedgerError::invalid(
            op,
            format!("risk {} exceeds bound {}", risk, max_risk),
        ));
    }
    Ok(())
}
