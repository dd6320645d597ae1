//! Rank opportunities by APY deviation and assign target allocations.

use crate::analyze::allocation::snapshot_for;
use crate::analyze::{AllocationEntry, AllocationSnapshot};
use crate::config::PlannerConfig;
use crate::error::{LedgerError, Operation};
use crate::store::{Amount, Opportunity, OpportunityStore};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAllocation {
    /// Zero-based position after sorting.
    pub rank: usize,
    #[serde(flatten)]
    pub entry: AllocationEntry,
    /// Target share, in percent.
    pub target_allocation: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub total_tvl: Amount,
    pub average_apy: Decimal,
    /// Sorted by `apy_diff` descending, ties by ascending id.
    pub allocations: Vec<PlannedAllocation>,
}

/// `max(floor_pct, top_pct - rank * step_pct)`, saturating at the floor.
pub fn target_allocation(rank: usize, config: &PlannerConfig) -> u32 {
    let rank = u32::try_from(rank).unwrap_or(u32::MAX);
    let drop = rank.saturating_mul(config.step_pct);
    config
        .top_pct
        .saturating_sub(drop)
        .max(config.floor_pct)
}

/// Snapshot the store and rank it. Read-only.
pub fn plan(store: &OpportunityStore, config: &PlannerConfig) -> Result<RebalancePlan, LedgerError> {
    let snapshot = snapshot_for(Operation::Plan, store)?;
    Ok(plan_snapshot(snapshot, config))
}

/// Rank an existing snapshot. Same snapshot, same plan.
pub fn plan_snapshot(snapshot: AllocationSnapshot, config: &PlannerConfig) -> RebalancePlan {
    let AllocationSnapshot {
        total_tvl,
        average_apy,
        mut entries,
    } = snapshot;
    entries.sort_by(|a, b| {
        b.apy_diff
            .cmp(&a.apy_diff)
            .then_with(|| a.opportunity.id.cmp(&b.opportunity.id))
    });
    let allocations: Vec<PlannedAllocation> = entries
        .into_iter()
        .enumerate()
        .map(|(rank, entry)| PlannedAllocation {
            rank,
            entry,
            target_allocation: target_allocation(rank, config),
        })
        .collect();
    info!(opportunities = allocations.len(), %total_tvl, %average_apy, "rebalance plan");
    RebalancePlan {
        total_tvl,
        average_apy,
        allocations,
    }
}

/// Highest-APY opportunity strictly above `min_apy`; ties go to the lowest id.
pub fn best_opportunity(store: &OpportunityStore, min_apy: Decimal) -> Option<&Opportunity> {
    store
        .opportunities()
        .iter()
        .filter(|o| o.apy > min_apy)
        .fold(None, |best: Option<&Opportunity>, o| match best {
            Some(b) if b.apy >= o.apy => Some(b),
            _ => Some(o),
        })
}
