//! Durable ledger state for callers that outlive a single process.

mod db;

pub use db::{LedgerDb, PersistError};
