//! Error taxonomy shared by the store, ledger, analyzer, and planner.

use crate::store::{AccountId, Amount, OpportunityId};
use std::fmt;
use thiserror::Error;

/// Public operation that produced an error. Rendered in messages so callers can
/// tell the user what was attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    AddOpportunity,
    UpdateOpportunity,
    GetOpportunity,
    Deposit,
    Withdraw,
    BalanceOf,
    Snapshot,
    Plan,
    Load,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::AddOpportunity => "add_opportunity",
            Operation::UpdateOpportunity => "update_opportunity",
            Operation::GetOpportunity => "get_opportunity",
            Operation::Deposit => "deposit",
            Operation::Withdraw => "withdraw",
            Operation::BalanceOf => "balance_of",
            Operation::Snapshot => "snapshot",
            Operation::Plan => "plan",
            Operation::Load => "load",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{op}: invalid parameter: {reason}")]
    InvalidParameter { op: Operation, reason: String },

    #[error("{op}: opportunity {id} not found")]
    NotFound { op: Operation, id: OpportunityId },

    #[error("{op}: insufficient funds in opportunity {id} for {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        op: Operation,
        id: OpportunityId,
        account: AccountId,
        requested: Amount,
        available: Amount,
    },

    #[error("{op}: no opportunities tracked")]
    EmptyState { op: Operation },

    #[error("{op}: division undefined: {reason}")]
    DivisionUndefined { op: Operation, reason: String },

    #[error("{op}: ledger invariant violated: {detail}")]
    InvariantViolation { op: Operation, detail: String },

    #[error("ledger lock poisoned")]
    Poisoned,
}

impl LedgerError {
    pub(crate) fn invalid(op: Operation, reason: impl Into<String>) -> Self {
        LedgerError::InvalidParameter {
            op,
            reason: reason.into(),
        }
    }

    pub(crate) fn invariant(op: Operation, detail: impl Into<String>) -> Self {
        LedgerError::InvariantViolation {
            op,
            detail: detail.into(),
        }
    }

    /// Operation that failed, if the error is tied to one.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            LedgerError::InvalidParameter { op, .. }
            | LedgerError::NotFound { op, .. }
            | LedgerError::InsufficientFunds { op, .. }
            | LedgerError::EmptyState { op }
            | LedgerError::DivisionUndefined { op, .. }
            | LedgerError::InvariantViolation { op, .. } => Some(*op),
            LedgerError::Poisoned => None,
        }
    }
}
