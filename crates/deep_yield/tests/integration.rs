//! Integration tests driving the engine through its public operations.

use deep_yield::{
    reproducibility_hash, AccountId, Amount, LedgerConfig, LedgerDb, LedgerError, Operation,
    OpportunityId, YieldEngine,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize)]
struct OpportunitySeed {
    protocol: String,
    apy: Decimal,
    tvl: Amount,
    risk: u8,
}

fn load_fixture<T: serde::de::DeserializeOwned>(path: &str) -> T {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../testdata");
    let full = root.join(path);
    let s =
        std::fs::read_to_string(&full).unwrap_or_else(|e| panic!("read {}: {}", full.display(), e));
    serde_json::from_str(&s).unwrap_or_else(|e| panic!("parse {}: {}", path, e))
}

fn engine() -> YieldEngine {
    YieldEngine::new(LedgerConfig::default())
}

/// A(apy=5, tvl=1000), B(apy=10, tvl=3000).
fn two_opportunity_engine() -> (YieldEngine, OpportunityId, OpportunityId) {
    let engine = engine();
    let a = engine.add_opportunity("A", dec!(5), Amount(1000), 10).unwrap();
    let b = engine.add_opportunity("B", dec!(10), Amount(3000), 10).unwrap();
    (engine, a.id, b.id)
}

#[test]
fn snapshot_shares_and_deviation() {
    let (engine, a, b) = two_opportunity_engine();
    let snap = engine.check_rebalance().unwrap();
    assert_eq!(snap.total_tvl, Amount(4000));
    assert_eq!(snap.average_apy, dec!(7.5));
    let ea = &snap.entries[0];
    let eb = &snap.entries[1];
    assert_eq!(ea.opportunity.id, a);
    assert_eq!(ea.allocation, dec!(25));
    assert_eq!(ea.apy_diff, dec!(-2.5));
    assert_eq!(eb.opportunity.id, b);
    assert_eq!(eb.allocation, dec!(75));
    assert_eq!(eb.apy_diff, dec!(2.5));
}

#[test]
fn plan_orders_by_deviation() {
    let (engine, a, b) = two_opportunity_engine();
    let plan = engine.trigger_rebalance().unwrap();
    let order: Vec<_> = plan
        .allocations
        .iter()
        .map(|p| (p.entry.opportunity.id, p.target_allocation))
        .collect();
    assert_eq!(order, vec![(b, 100), (a, 80)]);
}

#[test]
fn deposit_then_full_withdraw_keeps_zero_entry() {
    let (engine, a, _) = two_opportunity_engine();
    let alice = AccountId::from("alice");
    engine.deposit(a, &alice, Amount(50)).unwrap();
    let opp = engine.withdraw(a, &alice, Amount(50)).unwrap();
    assert_eq!(opp.total_deposits(), Amount::ZERO);
    assert_eq!(opp.deposits().get(&alice), Some(&Amount::ZERO));
    assert_eq!(engine.balance_of(a, &alice).unwrap(), Amount::ZERO);
}

#[test]
fn withdraw_without_deposit_is_insufficient() {
    let (engine, a, _) = two_opportunity_engine();
    let before = engine.store().unwrap();
    let err = engine
        .withdraw(a, &AccountId::from("alice"), Amount(10))
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    assert_eq!(engine.store().unwrap(), before);
}

#[test]
fn deposit_to_unknown_opportunity_is_not_found() {
    let (engine, _, _) = two_opportunity_engine();
    let err = engine
        .deposit(OpportunityId(99), &AccountId::from("bob"), Amount(10))
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::NotFound {
            op: Operation::Deposit,
            id: OpportunityId(99)
        }
    );
}

#[test]
fn plan_is_repeatable() {
    let engine = engine();
    let seeds: Vec<OpportunitySeed> = load_fixture("opportunities.json");
    for s in &seeds {
        engine
            .add_opportunity(&s.protocol, s.apy, s.tvl, s.risk)
            .unwrap();
    }
    let p1 = engine.trigger_rebalance().unwrap();
    let p2 = engine.trigger_rebalance().unwrap();
    assert_eq!(p1, p2);
    // burrow (id 2) and meta-pool (id 3) tie on apy; lower id first
    let ids: Vec<u64> = p1
        .allocations
        .iter()
        .map(|p| p.entry.opportunity.id.0)
        .collect();
    assert_eq!(ids, [1, 2, 3, 0]);
    let targets: Vec<u32> = p1.allocations.iter().map(|p| p.target_allocation).collect();
    assert_eq!(targets, [100, 80, 60, 40]);
}

#[test]
fn zero_tvl_opportunity_alone_is_undefined() {
    let engine = engine();
    engine.add_opportunity("Z", dec!(0), Amount(0), 0).unwrap();
    assert!(matches!(
        engine.check_rebalance(),
        Err(LedgerError::DivisionUndefined { .. })
    ));
    assert!(matches!(
        engine.trigger_rebalance(),
        Err(LedgerError::DivisionUndefined { op: Operation::Plan, .. })
    ));
    engine.add_opportunity("A", dec!(4), Amount(10), 0).unwrap();
    let plan = engine.trigger_rebalance().unwrap();
    assert_eq!(plan.allocations.len(), 2);
}

#[test]
fn empty_ledger_reports_empty_state() {
    let engine = engine();
    assert!(matches!(
        engine.check_rebalance(),
        Err(LedgerError::EmptyState { .. })
    ));
    assert!(engine.get_opportunities().unwrap().is_empty());
}

#[test]
fn persisted_state_reproduces_audit_hash() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = LedgerDb::open(dir.path().join("ledger.sqlite")).unwrap();
    let (engine, a, b) = two_opportunity_engine();
    engine.deposit(a, &AccountId::from("alice"), Amount(120)).unwrap();
    engine.deposit(b, &AccountId::from("bob"), Amount(80)).unwrap();
    engine.withdraw(b, &AccountId::from("bob"), Amount(30)).unwrap();
    db.save(&engine.store().unwrap()).unwrap();
    let before = reproducibility_hash(&engine.audit_rebalance().unwrap()).unwrap();

    let reloaded =
        YieldEngine::from_store(db.load(100).unwrap(), LedgerConfig::default()).unwrap();
    let after = reproducibility_hash(&reloaded.audit_rebalance().unwrap()).unwrap();
    assert_eq!(before, after);
    assert_eq!(reloaded.total_deposits().unwrap(), Amount(170));
    assert_eq!(
        reloaded.account_positions(&AccountId::from("bob")).unwrap(),
        vec![(b, Amount(50))]
    );
}
