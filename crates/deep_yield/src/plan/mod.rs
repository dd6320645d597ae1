//! Rebalance planning over an allocation snapshot.

mod rebalance;

pub use rebalance::{
    best_opportunity, plan, plan_snapshot, target_allocation, PlannedAllocation, RebalancePlan,
};
