//! Reproducible record of a rebalance plan and the state it came from.

mod bundle;

pub use bundle::{
    normalize_for_hash, reproducibility_hash, verify_audit_hash, AuditError, PlanAudit,
    VerificationResult,
};
