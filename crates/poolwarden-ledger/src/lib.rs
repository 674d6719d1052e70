//! Poolwarden Ledger
//!
//! SQLite persistence for balance snapshots, contribution records, the
//! batch log, and daily usage counters. The ledger is the single source
//! of truth; batch status and usage mutations are compare-and-set so the
//! single-flight guarantee survives restarts and extra workers.

mod database;
mod error;
mod repositories;

pub use database::Database;
pub use error::{LedgerError, Result};
pub use repositories::*;
