//! deep_yield: yield-allocation ledger.
//!
//! Tracks per-account deposits into yield opportunities and derives a
//! deterministic rebalance recommendation from the current state. Applying a
//! plan (moving capital) is left to the caller.

pub mod analyze;
pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod persist;
pub mod plan;
pub mod store;

pub use analyze::{snapshot, AllocationEntry, AllocationSnapshot};
pub use audit::{reproducibility_hash, PlanAudit, VerificationResult};
pub use config::{LedgerConfig, PlannerConfig};
pub use engine::YieldEngine;
pub use error::{LedgerError, Operation};
pub use persist::{LedgerDb, PersistError};
pub use plan::{plan, PlannedAllocation, RebalancePlan};
pub use store::{
    AccountId, Amount, Opportunity, OpportunityId, OpportunityStore, RiskLevel, MAX_TVL,
};
