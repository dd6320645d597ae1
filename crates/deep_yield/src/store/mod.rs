//! Opportunity store: the single owned collection of opportunity records.
//!
//! Opportunities live in a `Vec` indexed by their identifier. Identifiers are
//! assigned from the current length and nothing is ever removed, so id and
//! index always agree.

mod opportunity;
mod types;

pub use opportunity::{Opportunity, MAX_TVL};
pub use types::{AccountId, Amount, OpportunityId, RiskLevel};

pub(crate) use opportunity::validate_market_params;

use crate::config::DEFAULT_MAX_RISK;
use crate::error::{LedgerError, Operation};
use rust_decimal::Decimal;
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpportunityStore {
    opportunities: Vec<Opportunity>,
    /// Capital ever deposited across all opportunities.
    capital_in: Amount,
    /// Capital ever withdrawn across all opportunities.
    capital_out: Amount,
    max_risk: u8,
}

impl Default for OpportunityStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RISK)
    }
}

impl OpportunityStore {
    pub fn new(max_risk: u8) -> Self {
        Self {
            opportunities: Vec::new(),
            capital_in: Amount::ZERO,
            capital_out: Amount::ZERO,
            max_risk,
        }
    }

    /// Rebuild a store from persisted parts. Ids must be sequential from zero
    /// and every invariant must hold.
    pub fn from_parts(
        opportunities: Vec<Opportunity>,
        capital_in: Amount,
        capital_out: Amount,
        max_risk: u8,
    ) -> Result<Self, LedgerError> {
        let op = Operation::Load;
        for (idx, opp) in opportunities.iter().enumerate() {
            if opp.id.0 != idx as u64 {
                return Err(LedgerError::invariant(
                    op,
                    format!("opportunity at position {} has id {}", idx, opp.id),
                ));
            }
            validate_market_params(op, &opp.protocol, opp.apy, opp.tvl, opp.risk, max_risk)?;
        }
        sum_tvl(op, opportunities.iter().map(|o| o.tvl))?;
        let store = Self {
            opportunities,
            capital_in,
            capital_out,
            max_risk,
        };
        store.verify(op)?;
        Ok(store)
    }

    pub fn max_risk(&self) -> u8 {
        self.max_risk
    }

    pub fn len(&self) -> usize {
        self.opportunities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opportunities.is_empty()
    }

    pub fn capital_in(&self) -> Amount {
        self.capital_in
    }

    pub fn capital_out(&self) -> Amount {
        self.capital_out
    }

    /// Create a new opportunity with an empty deposit map.
    pub fn add_opportunity(
        &mut self,
        protocol: impl Into<String>,
        apy: Decimal,
        tvl: Amount,
        risk: u8,
    ) -> Result<Opportunity, LedgerError> {
        let op = Operation::AddOpportunity;
        let protocol = protocol.into();
        validate_market_params(op, &protocol, apy, tvl, risk, self.max_risk)?;
        sum_tvl(op, self.opportunities.iter().map(|o| o.tvl).chain(std::iter::once(tvl)))?;
        let id = OpportunityId(self.opportunities.len() as u64);
        let opportunity = Opportunity::new(id, protocol, apy, tvl, risk);
        self.opportunities.push(opportunity.clone());
        info!(opportunity_id = %id, protocol = %opportunity.protocol, %apy, %tvl, risk, "opportunity added");
        Ok(opportunity)
    }

    /// Refresh market metrics of an existing opportunity. Deposits are untouched.
    pub fn update_opportunity(
        &mut self,
        id: OpportunityId,
        apy: Decimal,
        tvl: Amount,
        risk: u8,
    ) -> Result<Opportunity, LedgerError> {
        let op = Operation::UpdateOpportunity;
        let current = self.lookup(op, id)?;
        validate_market_params(op, &current.protocol, apy, tvl, risk, self.max_risk)?;
        let others = self.opportunities.iter().filter(|o| o.id != id).map(|o| o.tvl);
        sum_tvl(op, others.chain(std::iter::once(tvl)))?;

        let current = self.lookup_mut(op, id)?;
        current.apy = apy;
        current.tvl = tvl;
        current.risk = risk;
        info!(opportunity_id = %id, %apy, %tvl, risk, "opportunity updated");
        Ok(current.clone())
    }

    /// All opportunities in creation order.
    pub fn opportunities(&self) -> &[Opportunity] {
        &self.opportunities
    }

    pub fn opportunity(&self, id: OpportunityId) -> Result<&Opportunity, LedgerError> {
        self.lookup(Operation::GetOpportunity, id)
    }

    pub(crate) fn lookup(&self, op: Operation, id: OpportunityId) -> Result<&Opportunity, LedgerError> {
        usize::try_from(id.0)
            .ok()
            .and_then(|idx| self.opportunities.get(idx))
            .ok_or(LedgerError::NotFound { op, id })
    }

    fn lookup_mut(&mut self, op: Operation, id: OpportunityId) -> Result<&mut Opportunity, LedgerError> {
        usize::try_from(id.0)
            .ok()
            .and_then(|idx| self.opportunities.get_mut(idx))
            .ok_or(LedgerError::NotFound { op, id })
    }

    /// Sum of `total_deposits` over every opportunity.
    pub fn total_deposits(&self) -> Result<Amount, LedgerError> {
        sum_totals(Operation::BalanceOf, self.opportunities.iter())
    }

    /// Every non-zero position held by `account`, in id order.
    pub fn account_positions(&self, account: &AccountId) -> Vec<(OpportunityId, Amount)> {
        self.opportunities
            .iter()
            .map(|o| (o.id, o.balance_of(account)))
            .filter(|(_, bal)| !bal.is_zero())
            .collect()
    }

    /// Re-verify every per-opportunity invariant and the global capital bound.
    pub fn verify(&self, op: Operation) -> Result<(), LedgerError> {
        for opp in &self.opportunities {
            opp.verify_invariants(op)?;
        }
        let total = sum_totals(op, self.opportunities.iter())?;
        check_capital_bound(op, total, self.capital_in, self.capital_out)
    }

    /// Replace one opportunity and the capital counters in a single step. Every
    /// record of the proposed state is re-derived and the global bound checked
    /// first; nothing is written on error.
    pub(crate) fn commit(
        &mut self,
        op: Operation,
        updated: Opportunity,
        capital_in: Amount,
        capital_out: Amount,
    ) -> Result<(), LedgerError> {
        let idx = usize::try_from(updated.id.0)
            .ok()
            .filter(|idx| *idx < self.opportunities.len())
            .ok_or(LedgerError::NotFound { op, id: updated.id })?;
        let mut total = Amount::ZERO;
        for (i, current) in self.opportunities.iter().enumerate() {
            let opp = if i == idx { &updated } else { current };
            opp.verify_invariants(op)?;
            total = total
                .checked_add(opp.total_deposits)
                .ok_or_else(|| LedgerError::invariant(op, "ledger total overflows"))?;
        }
        check_capital_bound(op, total, capital_in, capital_out)?;
        self.opportunities[idx] = updated;
        self.capital_in = capital_in;
        self.capital_out = capital_out;
        Ok(())
    }
}

fn sum_totals<'a>(
    op: Operation,
    opportunities: impl Iterator<Item = &'a Opportunity>,
) -> Result<Amount, LedgerError> {
    let mut total = Amount::ZERO;
    for opp in opportunities {
        total = total
            .checked_add(opp.total_deposits)
            .ok_or_else(|| LedgerError::invariant(op, "ledger total overflows"))?;
    }
    Ok(total)
}

/// Sum reported TVL, rejecting totals a snapshot could not represent.
fn sum_tvl(op: Operation, tvls: impl Iterator<Item = Amount>) -> Result<Amount, LedgerError> {
    let mut total = Amount::ZERO;
    for tvl in tvls {
        total = total
            .checked_add(tvl)
            .filter(|t| *t <= MAX_TVL)
            .ok_or_else(|| {
                LedgerError::invalid(op, format!("total tvl would exceed {}", MAX_TVL))
            })?;
    }
    Ok(total)
}

fn check_capital_bound(
    op: Operation,
    total: Amount,
    capital_in: Amount,
    capital_out: Amount,
) -> Result<(), LedgerError> {
    let net = capital_in.checked_sub(capital_out).ok_or_else(|| {
        LedgerError::invariant(
            op,
            format!("capital out {} exceeds capital in {}", capital_out, capital_in),
        )
    })?;
    if total > net {
        return Err(LedgerError::invariant(
            op,
            format!("deposits {} exceed net capital {}", total, net),
        ));
    }
    Ok(())
}
