//! Plan audit bundle and SHA-256 reproducibility hash.

use crate::analyze::allocation::snapshot_for;
use crate::analyze::AllocationSnapshot;
use crate::config::PlannerConfig;
use crate::error::{LedgerError, Operation};
use crate::plan::{plan_snapshot, RebalancePlan};
use crate::store::{Amount, Opportunity, OpportunityStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Ledger state plus the snapshot and plan derived from it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanAudit {
    pub version: u32,
    /// Not covered by the reproducibility hash.
    pub created_utc_rfc3339: String,
    pub planner: PlannerConfig,
    pub opportunities: Vec<Opportunity>,
    pub capital_in: Amount,
    pub capital_out: Amount,
    pub snapshot: AllocationSnapshot,
    pub plan: RebalancePlan,
}

const AUDIT_VERSION: u32 = 1;
const UNHASHED_FIELD: &str = "created_utc_rfc3339";

impl PlanAudit {
    /// Snapshot and plan `store` in one pass.
    pub fn capture(store: &OpportunityStore, planner: &PlannerConfig) -> Result<Self, LedgerError> {
        let snapshot = snapshot_for(Operation::Plan, store)?;
        let plan = plan_snapshot(snapshot.clone(), planner);
        let created_utc_rfc3339 = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        Ok(Self {
            version: AUDIT_VERSION,
            created_utc_rfc3339,
            planner: *planner,
            opportunities: store.opportunities().to_vec(),
            capital_in: store.capital_in(),
            capital_out: store.capital_out(),
            snapshot,
            plan,
        })
    }
}

/// Normalize JSON for hashing: sort keys and no whitespace.
pub fn normalize_for_hash(value: &serde_json::Value) -> Result<String, AuditError> {
    Ok(serde_json::to_string(&sort_json_keys(value))?)
}

fn sort_json_keys(v: &serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(m) => {
            let sorted: std::collections::BTreeMap<&String, serde_json::Value> =
                m.iter().map(|(k, v)| (k, sort_json_keys(v))).collect();
            serde_json::Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), v))
                    .collect(),
            )
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(sort_json_keys).collect())
        }
        other => other.clone(),
    }
}

/// SHA-256 over the normalized bundle JSON, creation time excluded.
pub fn reproducibility_hash(audit: &PlanAudit) -> Result<String, AuditError> {
    let mut json = serde_json::to_value(audit)?;
    if let serde_json::Value::Object(m) = &mut json {
        m.remove(UNHASHED_FIELD);
    }
    let normalized = normalize_for_hash(&json)?;
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerificationResult {
    pub audit_hash: String,
    pub expected_hash: Option<String>,
    pub matches: bool,
}

/// Compare an audit's hash with an expected hex digest (case-insensitive).
pub fn verify_audit_hash(
    audit: &PlanAudit,
    expected_hex: &str,
) -> Result<VerificationResult, AuditError> {
    let audit_hash = reproducibility_hash(audit)?;
    let expected = expected_hex.trim().to_lowercase();
    let matches = audit_hash == expected;
    Ok(VerificationResult {
        audit_hash,
        expected_hash: Some(expected),
        matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger;
    use crate::store::AccountId;
    use rust_decimal_macros::dec;

    fn store() -> OpportunityStore {
        let mut store = OpportunityStore::default();
        let a = store.add_opportunity("A", dec!(5), Amount(1000), 10).unwrap();
        store.add_opportunity("B", dec!(10), Amount(3000), 60).unwrap();
        ledger::deposit(&mut store, a.id, &AccountId::from("alice"), Amount(25)).unwrap();
        store
    }

    #[test]
    fn normalize_deterministic() {
        let a = serde_json::json!({"z":1,"a":{"y":2,"b":3}});
        let b = serde_json::json!({"a":{"b":3,"y":2},"z":1});
        assert_eq!(normalize_for_hash(&a).unwrap(), normalize_for_hash(&b).unwrap());
    }

    #[test]
    fn hash_ignores_creation_time() {
        let mut first = PlanAudit::capture(&store(), &PlannerConfig::default()).unwrap();
        let second = PlanAudit::capture(&store(), &PlannerConfig::default()).unwrap();
        first.created_utc_rfc3339 = "1970-01-01T00:00:00Z".into();
        let h1 = reproducibility_hash(&first).unwrap();
        let h2 = reproducibility_hash(&second).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn hash_changes_with_state() {
        let base = PlanAudit::capture(&store(), &PlannerConfig::default()).unwrap();
        let mut s = store();
        ledger::deposit(&mut s, crate::store::OpportunityId(1), &AccountId::from("bob"), Amount(1))
            .unwrap();
        let changed = PlanAudit::capture(&s, &PlannerConfig::default()).unwrap();
        assert_ne!(
            reproducibility_hash(&base).unwrap(),
            reproducibility_hash(&changed).unwrap()
        );
    }

    #[test]
    fn verify_is_case_insensitive() {
        let audit = PlanAudit::capture(&store(), &PlannerConfig::default()).unwrap();
        let hash = reproducibility_hash(&audit).unwrap();
        let r = verify_audit_hash(&audit, &format!(" {}\n", hash.to_uppercase())).unwrap();
        assert!(r.matches);
        let r = verify_audit_hash(&audit, "00").unwrap();
        assert!(!r.matches);
    }

    #[test]
    fn json_roundtrip_keeps_hash() {
        let audit = PlanAudit::capture(&store(), &PlannerConfig::default()).unwrap();
        let json = serde_json::to_string_pretty(&audit).unwrap();
        let back: PlanAudit = serde_json::from_str(&json).unwrap();
        assert_eq!(
            reproducibility_hash(&audit).unwrap(),
            reproducibility_hash(&back).unwrap()
        );
    }
}
