//! SQLite state file holding opportunities, balances, and capital counters.

use crate::error::LedgerError;
use crate::store::{AccountId, Amount, Opportunity, OpportunityId, OpportunityStore};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt state: {0}")]
    Corrupt(String),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

const META_CAPITAL_IN: &str = "capital_in";
const META_CAPITAL_OUT: &str = "capital_out";
/// How long a writer waits for another handle's transaction to finish.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Durable copy of an [`OpportunityStore`].
pub struct LedgerDb {
    conn: Mutex<Connection>,
}

impl LedgerDb {
    /// Open or create the state file at `path`. Creates parent dirs if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS opportunities (
                id INTEGER PRIMARY KEY,
                protocol TEXT NOT NULL,
                apy TEXT NOT NULL,
                tvl TEXT NOT NULL,
                risk INTEGER NOT NULL,
                total_deposits TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS deposits (
                opportunity_id INTEGER NOT NULL,
                account_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                PRIMARY KEY (opportunity_id, account_id)
            );
            CREATE TABLE IF NOT EXISTS ledger_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, PersistError> {
        self.conn
            .lock()
            .map_err(|e| PersistError::Io(std::io::Error::other(e.to_string())))
    }

    /// Replace the stored state with `store` in one transaction.
    pub fn save(&self, store: &OpportunityStore) -> Result<(), PersistError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        write_store(&tx, store)?;
        tx.commit()?;
        debug!(opportunities = store.len(), "state saved");
        Ok(())
    }

    /// Load the stored state. An empty file yields an empty store. Every
    /// invariant is re-verified before the store is returned.
    pub fn load(&self, max_risk: u8) -> Result<OpportunityStore, PersistError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let store = read_store(&tx, max_risk)?;
        tx.commit()?;
        debug!(opportunities = store.len(), "state loaded");
        Ok(store)
    }

    /// Load, apply `f`, and save under one write transaction, so no other
    /// handle on the same file can write in between. Nothing is written when
    /// `f` fails.
    pub fn update<T, E, F>(&self, max_risk: u8, f: F) -> Result<T, E>
    where
        E: From<PersistError>,
        F: FnOnce(&mut OpportunityStore) -> Result<T, E>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(PersistError::from)?;
        let mut store = read_store(&tx, max_risk)?;
        let out = f(&mut store)?;
        write_store(&tx, &store)?;
        tx.commit().map_err(PersistError::from)?;
        debug!(opportunities = store.len(), "state updated");
        Ok(out)
    }
}

fn write_store(conn: &Connection, store: &OpportunityStore) -> Result<(), PersistError> {
    conn.execute("DELETE FROM deposits", [])?;
    conn.execute("DELETE FROM opportunities", [])?;
    let mut insert_opp = conn.prepare(
        "INSERT INTO opportunities (id, protocol, apy, tvl, risk, total_deposits) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    let mut insert_dep = conn.prepare(
        "INSERT INTO deposits (opportunity_id, account_id, amount) VALUES (?1, ?2, ?3)",
    )?;
    for opp in store.opportunities() {
        let id = i64::try_from(opp.id.0)
            .map_err(|_| PersistError::Corrupt(format!("id {} out of range", opp.id)))?;
        insert_opp.execute(rusqlite::params![
            id,
            opp.protocol,
            opp.apy.to_string(),
            opp.tvl.to_string(),
            opp.risk,
            opp.total_deposits().to_string(),
        ])?;
        for (account, amount) in opp.deposits() {
            insert_dep.execute(rusqlite::params![id, account.as_str(), amount.to_string()])?;
        }
    }
    for (key, value) in [
        (META_CAPITAL_IN, store.capital_in()),
        (META_CAPITAL_OUT, store.capital_out()),
    ] {
        conn.execute(
            "INSERT OR REPLACE INTO ledger_meta (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value.to_string()],
        )?;
    }
    Ok(())
}

fn read_store(conn: &Connection, max_risk: u8) -> Result<OpportunityStore, PersistError> {
    let mut deposits: BTreeMap<i64, BTreeMap<AccountId, Amount>> = BTreeMap::new();
    {
        let mut stmt = conn.prepare("SELECT opportunity_id, account_id, amount FROM deposits")?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
        })?;
        for row in rows {
            let (opp_id, account, amount) = row?;
            deposits
                .entry(opp_id)
                .or_default()
                .insert(AccountId::from(account), parse_amount(&amount)?);
        }
    }

    let mut opportunities = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT id, protocol, apy, tvl, risk, total_deposits FROM opportunities ORDER BY id",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, u8>(4)?,
                r.get::<_, String>(5)?,
            ))
        })?;
        for row in rows {
            let (id, protocol, apy, tvl, risk, total) = row?;
            let opp_id = u64::try_from(id)
                .map_err(|_| PersistError::Corrupt(format!("negative id {}", id)))?;
            let apy = Decimal::from_str(&apy)
                .map_err(|e| PersistError::Corrupt(format!("apy {:?}: {}", apy, e)))?;
            let mut opp =
                Opportunity::new(OpportunityId(opp_id), protocol, apy, parse_amount(&tvl)?, risk);
            opp.deposits = deposits.remove(&id).unwrap_or_default();
            opp.total_deposits = parse_amount(&total)?;
            opportunities.push(opp);
        }
    }
    if let Some(orphan) = deposits.keys().next() {
        return Err(PersistError::Corrupt(format!(
            "deposits reference missing opportunity {}",
            orphan
        )));
    }

    let capital_in = read_meta(conn, META_CAPITAL_IN)?;
    let capital_out = read_meta(conn, META_CAPITAL_OUT)?;
    Ok(OpportunityStore::from_parts(opportunities, capital_in, capital_out, max_risk)?)
}

fn read_meta(conn: &Connection, key: &str) -> Result<Amount, PersistError> {
    let value = conn
        .query_row(
            "SELECT value FROM ledger_meta WHERE key = ?1",
            [key],
            |r| r.get::<_, String>(0),
        )
        .optional()?;
    match value {
        Some(v) => parse_amount(&v),
        None => Ok(Amount::ZERO),
    }
}

fn parse_amount(s: &str) -> Result<Amount, PersistError> {
    s.parse::<Amount>()
        .map_err(|e| PersistError::Corrupt(format!("amount {:?}: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger;
    use crate::store::MAX_TVL;
    use rust_decimal_macros::dec;
    use std::thread;
    use tempfile::TempDir;

    fn populated() -> OpportunityStore {
        let mut store = OpportunityStore::default();
        let a = store.add_opportunity("A", dec!(5.5), Amount(1000), 10).unwrap();
        let b = store
            .add_opportunity("B", dec!(10), Amount(MAX_TVL.0 - 1000), 70)
            .unwrap();
        let alice = AccountId::from("alice");
        ledger::deposit(&mut store, a.id, &alice, Amount(50)).unwrap();
        ledger::withdraw(&mut store, a.id, &alice, Amount(50)).unwrap();
        ledger::deposit(&mut store, b.id, &AccountId::from("bob"), Amount(7)).unwrap();
        store
    }

    #[test]
    fn save_then_load_preserves_state() {
        let dir = TempDir::new().unwrap();
        let db = LedgerDb::open(dir.path().join("nested/ledger.sqlite")).unwrap();
        let store = populated();
        db.save(&store).unwrap();
        let loaded = db.load(100).unwrap();
        assert_eq!(loaded, store);
        // zeroed entry survives
        assert_eq!(
            loaded.opportunities()[0].deposits().get(&AccountId::from("alice")),
            Some(&Amount::ZERO)
        );
    }

    #[test]
    fn fresh_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let db = LedgerDb::open(dir.path().join("ledger.sqlite")).unwrap();
        let store = db.load(100).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.capital_in(), Amount::ZERO);
    }

    #[test]
    fn tampered_total_is_rejected() {
        let dir = TempDir::new().unwrap();
        let db = LedgerDb::open(dir.path().join("ledger.sqlite")).unwrap();
        db.save(&populated()).unwrap();
        db.lock()
            .unwrap()
            .execute("UPDATE opportunities SET total_deposits = '999' WHERE id = 1", [])
            .unwrap();
        assert!(matches!(
            db.load(100),
            Err(PersistError::Ledger(LedgerError::InvariantViolation { .. }))
        ));
    }

    #[test]
    fn orphan_deposit_is_rejected() {
        let dir = TempDir::new().unwrap();
        let db = LedgerDb::open(dir.path().join("ledger.sqlite")).unwrap();
        db.save(&populated()).unwrap();
        db.lock()
            .unwrap()
            .execute(
                "INSERT INTO deposits (opportunity_id, account_id, amount) VALUES (9, 'eve', '1')",
                [],
            )
            .unwrap();
        assert!(matches!(db.load(100), Err(PersistError::Corrupt(_))));
    }

    #[test]
    fn update_writes_nothing_when_the_change_fails() {
        let dir = TempDir::new().unwrap();
        let db = LedgerDb::open(dir.path().join("ledger.sqlite")).unwrap();
        db.save(&populated()).unwrap();
        let result = db.update(100, |store: &mut OpportunityStore| -> Result<(), PersistError> {
            ledger::deposit(store, OpportunityId(0), &AccountId::from("carol"), Amount(5))?;
            ledger::withdraw(store, OpportunityId(0), &AccountId::from("carol"), Amount(6))?;
            Ok(())
        });
        assert!(matches!(
            result,
            Err(PersistError::Ledger(LedgerError::InsufficientFunds { .. }))
        ));
        assert_eq!(db.load(100).unwrap(), populated());
    }

    #[test]
    fn concurrent_handles_keep_every_update() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.sqlite");
        let first = LedgerDb::open(&path).unwrap();
        let second = LedgerDb::open(&path).unwrap();
        let mut store = OpportunityStore::default();
        let id = store.add_opportunity("A", dec!(5), Amount(1000), 10).unwrap().id;
        first.save(&store).unwrap();

        thread::scope(|scope| {
            for (db, name, amount) in [(&first, "alice", 10u128), (&second, "bob", 20u128)] {
                scope.spawn(move || {
                    let account = AccountId::from(name);
                    for _ in 0..25 {
                        db.update(100, |store: &mut OpportunityStore| -> Result<(), PersistError> {
                            ledger::deposit(store, id, &account, Amount(amount))?;
                            Ok(())
                        })
                        .unwrap();
                    }
                });
            }
        });

        let loaded = LedgerDb::open(&path).unwrap().load(100).unwrap();
        assert_eq!(loaded.total_deposits().unwrap(), Amount(25 * 30));
        assert_eq!(loaded.capital_in(), Amount(25 * 30));
        let opp = loaded.opportunity(id).unwrap();
        assert_eq!(opp.balance_of(&AccountId::from("alice")), Amount(250));
        assert_eq!(opp.balance_of(&AccountId::from("bob")), Amount(500));
    }
}
