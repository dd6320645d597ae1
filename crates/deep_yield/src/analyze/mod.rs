//! Allocation analysis: share of TVL and APY deviation per opportunity.

pub(crate) mod allocation;

pub use allocation::{snapshot, AllocationEntry, AllocationSnapshot};
