//! Deposits and withdrawals against a single opportunity.
//!
//! Each call verifies the whole store, works on a copy of the target record,
//! and commits the copy together with the updated capital counters only after
//! the proposed state verifies again. A failed call leaves the store exactly as
//! it was.

use crate::error::{LedgerError, Operation};
use crate::store::{AccountId, Amount, Opportunity, OpportunityId, OpportunityStore};
use tracing::{debug, info};

/// Credit `amount` to `account` in opportunity `id`.
pub fn deposit(
    store: &mut OpportunityStore,
    id: OpportunityId,
    account: &AccountId,
    amount: Amount,
) -> Result<Opportunity, LedgerError> {
    let op = Operation::Deposit;
    if amount.is_zero() {
        return Err(LedgerError::invalid(op, "amount must be > 0"));
    }
    store.verify(op)?;
    let current = store.lookup(op, id)?;

    let balance = current.balance_of(account);
    let new_balance = balance
        .checked_add(amount)
        .ok_or_else(|| LedgerError::invalid(op, format!("balance overflow adding {}", amount)))?;
    let new_total = current
        .total_deposits
        .checked_add(amount)
        .ok_or_else(|| LedgerError::invalid(op, format!("total overflow adding {}", amount)))?;
    let capital_in = store
        .capital_in()
        .checked_add(amount)
        .ok_or_else(|| LedgerError::invalid(op, format!("capital overflow adding {}", amount)))?;
    let capital_out = store.capital_out();

    let mut next = current.clone();
    next.deposits.insert(account.clone(), new_balance);
    next.total_deposits = new_total;
    store.commit(op, next.clone(), capital_in, capital_out)?;

    info!(opportunity_id = %id, %account, %amount, balance = %new_balance, "deposit");
    Ok(next)
}

/// Debit `amount` from `account` in opportunity `id`. The full amount must be
/// available; there is no partial withdrawal.
pub fn withdraw(
    store: &mut OpportunityStore,
    id: OpportunityId,
    account: &AccountId,
    amount: Amount,
) -> Result<Opportunity, LedgerError> {
    let op = Operation::Withdraw;
    if amount.is_zero() {
        return Err(LedgerError::invalid(op, "amount must be > 0"));
    }
    store.verify(op)?;
    let current = store.lookup(op, id)?;

    let balance = current.balance_of(account);
    let Some(new_balance) = balance.checked_sub(amount) else {
        debug!(opportunity_id = %id, %account, %amount, %balance, "withdraw rejected");
        return Err(LedgerError::InsufficientFunds {
            op,
            id,
            account: account.clone(),
            requested: amount,
            available: balance,
        });
    };
    let new_total = current.total_deposits.checked_sub(amount).ok_or_else(|| {
        LedgerError::invariant(
            op,
            format!("opportunity {} total below account balance", id),
        )
    })?;
    let capital_out = store
        .capital_out()
        .checked_add(amount)
        .ok_or_else(|| LedgerError::invalid(op, format!("capital overflow adding {}", amount)))?;
    let capital_in = store.capital_in();

    let mut next = current.clone();
    // Zeroed entries stay in the map.
    next.deposits.insert(account.clone(), new_balance);
    next.total_deposits = new_total;
    store.commit(op, next.clone(), capital_in, capital_out)?;

    info!(opportunity_id = %id, %account, %amount, balance = %new_balance, "withdraw");
    Ok(next)
}

/// Balance of `account` in opportunity `id`.
pub fn balance_of(
    store: &OpportunityStore,
    id: OpportunityId,
    account: &AccountId,
) -> Result<Amount, LedgerError> {
    Ok(store.lookup(Operation::BalanceOf, id)?.balance_of(account))
}
