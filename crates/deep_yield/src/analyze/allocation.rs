//! Point-in-time allocation snapshot derived from the store.

use crate::error::{LedgerError, Operation};
use crate::store::{Amount, Opportunity, OpportunityStore};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub opportunity: Opportunity,
    /// Share of total TVL, in percent.
    pub allocation: Decimal,
    /// `apy - average_apy`, in percentage points.
    pub apy_diff: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSnapshot {
    pub total_tvl: Amount,
    pub average_apy: Decimal,
    /// One entry per opportunity, in creation order.
    pub entries: Vec<AllocationEntry>,
}

/// Compute the allocation snapshot. Read-only.
pub fn snapshot(store: &OpportunityStore) -> Result<AllocationSnapshot, LedgerError> {
    snapshot_for(Operation::Snapshot, store)
}

pub(crate) fn snapshot_for(
    op: Operation,
    store: &OpportunityStore,
) -> Result<AllocationSnapshot, LedgerError> {
    let opportunities = store.opportunities();
    if opportunities.is_empty() {
        return Err(LedgerError::EmptyState { op });
    }

    let mut total_tvl = Amount::ZERO;
    let mut apy_sum = Decimal::ZERO;
    for opp in opportunities {
        total_tvl = total_tvl
            .checked_add(opp.tvl)
            .ok_or_else(|| LedgerError::invalid(op, "total tvl overflows"))?;
        apy_sum = apy_sum
            .checked_add(opp.apy)
            .ok_or_else(|| LedgerError::invalid(op, "apy sum overflows"))?;
    }
    if total_tvl.is_zero() {
        return Err(LedgerError::DivisionUndefined {
            op,
            reason: format!("total tvl is 0 across {} opportunities", opportunities.len()),
        });
    }

    let count = Decimal::from(opportunities.len() as u64);
    let average_apy = apy_sum
        .checked_div(count)
        .ok_or_else(|| LedgerError::invalid(op, "average apy not representable"))?;
    let total_dec = to_decimal(op, total_tvl)?;

    let entries = opportunities
        .iter()
        .map(|opp| {
            let share = to_decimal(op, opp.tvl)?
                .checked_div(total_dec)
                .and_then(|s| s.checked_mul(Decimal::ONE_HUNDRED))
                .ok_or_else(|| {
                    LedgerError::invalid(op, format!("allocation of {} not representable", opp.id))
                })?;
            Ok(AllocationEntry {
                opportunity: opp.clone(),
                allocation: share.normalize(),
                apy_diff: (opp.apy - average_apy).normalize(),
            })
        })
        .collect::<Result<Vec<_>, LedgerError>>()?;

    debug!(opportunities = entries.len(), %total_tvl, %average_apy, "snapshot");
    Ok(AllocationSnapshot {
        total_tvl,
        average_apy: average_apy.normalize(),
        entries,
    })
}

fn to_decimal(op: Operation, amount: Amount) -> Result<Decimal, LedgerError> {
    i128::try_from(amount.0)
        .ok()
        .and_then(|v| Decimal::try_from_i128_with_scale(v, 0).ok())
        .ok_or_else(|| LedgerError::invalid(op, format!("amount {} exceeds decimal range", amount)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn empty_store_is_an_error() {
        let store = OpportunityStore::default();
        assert_eq!(
            snapshot(&store).unwrap_err(),
            LedgerError::EmptyState {
                op: Operation::Snapshot
            }
        );
    }

    #[test]
    fn zero_tvl_only_opportunity_is_undefined() {
        let mut store = OpportunityStore::default();
        store.add_opportunity("Z", dec!(0), Amount(0), 0).unwrap();
        assert!(matches!(
            snapshot(&store),
            Err(LedgerError::DivisionUndefined { op: Operation::Snapshot, .. })
        ));
    }

    #[test]
    fn zero_tvl_alongside_others_is_fine() {
        let mut store = OpportunityStore::default();
        store.add_opportunity("Z", dec!(0), Amount(0), 0).unwrap();
        store.add_opportunity("A", dec!(6), Amount(500), 0).unwrap();
        let snap = snapshot(&store).unwrap();
        assert_eq!(snap.average_apy, dec!(3));
        assert_eq!(snap.entries[0].allocation, dec!(0));
        assert_eq!(snap.entries[0].apy_diff, dec!(-3));
        assert_eq!(snap.entries[1].allocation, dec!(100));
    }

    #[test]
    fn fractional_shares_are_deterministic() {
        let mut store = OpportunityStore::default();
        for name in ["a", "b", "c"] {
            store.add_opportunity(name, dec!(1), Amount(1), 0).unwrap();
        }
        let s1 = snapshot(&store).unwrap();
        let s2 = snapshot(&store).unwrap();
        assert_eq!(s1, s2);
        assert!(s1.entries[0].allocation > dec!(33.33));
        assert!(s1.entries[0].allocation < dec!(33.34));
    }

    #[test]
    fn largest_accepted_tvl_still_divides() {
        let mut store = OpportunityStore::default();
        store
            .add_opportunity("huge", dec!(1), crate::store::MAX_TVL, 0)
            .unwrap();
        let snap = snapshot(&store).unwrap();
        assert_eq!(snap.entries[0].allocation, dec!(100));
    }
}
