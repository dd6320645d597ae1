//! Serialized entry point for external callers.
//!
//! Every operation takes the store lock for its whole duration, so mutations
//! never interleave and snapshots and plans always see a consistent state.

use crate::analyze::{self, AllocationSnapshot};
use crate::audit::PlanAudit;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Operation};
use crate::ledger;
use crate::plan::{self, RebalancePlan};
use crate::store::{AccountId, Amount, Opportunity, OpportunityId, OpportunityStore};
use rust_decimal::Decimal;
use std::sync::Mutex;

pub struct YieldEngine {
    store: Mutex<OpportunityStore>,
    config: LedgerConfig,
}

impl YieldEngine {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            store: Mutex::new(OpportunityStore::new(config.max_risk)),
            config,
        }
    }

    /// Wrap a loaded store. Its risk bound must be the configured one.
    pub fn from_store(store: OpportunityStore, config: LedgerConfig) -> Result<Self, LedgerError> {
        if store.max_risk() != config.max_risk {
            return Err(LedgerError::invalid(
                Operation::Load,
                format!(
                    "store risk bound {} differs from configured {}",
                    store.max_risk(),
                    config.max_risk
                ),
            ));
        }
        Ok(Self {
            store: Mutex::new(store),
            config,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn with_store<T>(
        &self,
        f: impl FnOnce(&mut OpportunityStore) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut guard = self.store.lock().map_err(|_| LedgerError::Poisoned)?;
        f(&mut guard)
    }

    pub fn add_opportunity(
        &self,
        protocol: &str,
        apy: Decimal,
        tvl: Amount,
        risk: u8,
    ) -> Result<Opportunity, LedgerError> {
        self.with_store(|s| s.add_opportunity(protocol, apy, tvl, risk))
    }

    pub fn update_opportunity(
        &self,
        id: OpportunityId,
        apy: Decimal,
        tvl: Amount,
        risk: u8,
    ) -> Result<Opportunity, LedgerError> {
        self.with_store(|s| s.update_opportunity(id, apy, tvl, risk))
    }

    pub fn get_opportunities(&self) -> Result<Vec<Opportunity>, LedgerError> {
        self.with_store(|s| Ok(s.opportunities().to_vec()))
    }

    pub fn get_opportunity(&self, id: OpportunityId) -> Result<Opportunity, LedgerError> {
        self.with_store(|s| s.opportunity(id).cloned())
    }

    pub fn deposit(
        &self,
        id: OpportunityId,
        account: &AccountId,
        amount: Amount,
    ) -> Result<Opportunity, LedgerError> {
        self.with_store(|s| ledger::deposit(s, id, account, amount))
    }

    pub fn withdraw(
        &self,
        id: OpportunityId,
        account: &AccountId,
        amount: Amount,
    ) -> Result<Opportunity, LedgerError> {
        self.with_store(|s| ledger::withdraw(s, id, account, amount))
    }

    pub fn balance_of(&self, id: OpportunityId, account: &AccountId) -> Result<Amount, LedgerError> {
        self.with_store(|s| ledger::balance_of(s, id, account))
    }

    pub fn total_deposits(&self) -> Result<Amount, LedgerError> {
        self.with_store(|s| s.total_deposits())
    }

    pub fn account_positions(
        &self,
        account: &AccountId,
    ) -> Result<Vec<(OpportunityId, Amount)>, LedgerError> {
        self.with_store(|s| Ok(s.account_positions(account)))
    }

    pub fn check_rebalance(&self) -> Result<AllocationSnapshot, LedgerError> {
        self.with_store(|s| analyze::snapshot(s))
    }

    pub fn trigger_rebalance(&self) -> Result<RebalancePlan, LedgerError> {
        let planner = self.config.planner;
        self.with_store(|s| plan::plan(s, &planner))
    }

    /// Plan plus the exact state it was derived from, taken under one lock.
    pub fn audit_rebalance(&self) -> Result<PlanAudit, LedgerError> {
        let planner = self.config.planner;
        self.with_store(|s| PlanAudit::capture(s, &planner))
    }

    /// Best opportunity above the configured `min_apy`, or above `min_apy`
    /// when given.
    pub fn best_opportunity(&self, min_apy: Option<Decimal>) -> Result<Option<Opportunity>, LedgerError> {
        let threshold = min_apy.unwrap_or(self.config.min_apy);
        self.with_store(|s| Ok(plan::best_opportunity(s, threshold).cloned()))
    }

    /// Consistent copy of the whole store, e.g. for persistence or audit.
    pub fn store(&self) -> Result<OpportunityStore, LedgerError> {
        self.with_store(|s| Ok(s.clone()))
    }

    pub fn into_store(self) -> Result<OpportunityStore, LedgerError> {
        self.store.into_inner().map_err(|_| LedgerError::Poisoned)
    }
}
