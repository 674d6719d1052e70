//! Balance monitor
//!
//! Reads the collection account's balances of both tokens each tick and
//! appends a snapshot to the ledger. A failed read skips the tick; the
//! previous snapshot stays authoritative and the next scheduled tick is
//! the retry.

use chrono::Utc;
use poolwarden_core::{BalanceSnapshot, ChainConfig, ChainGateway, GatewayError};
use poolwarden_ledger::{Database, LedgerError, SnapshotRepository};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Polls the collection account and records snapshots
pub struct BalanceMonitor {
    gateway: Arc<dyn ChainGateway>,
    db: Database,
    collection_account: String,
    token_a: String,
    token_b: String,
}

impl BalanceMonitor {
    pub fn new(gateway: Arc<dyn ChainGateway>, db: Database, chain: &ChainConfig) -> Self {
        Self {
            gateway,
            db,
            collection_account: chain.collection_account.clone(),
            token_a: chain.token_a.clone(),
            token_b: chain.token_b.clone(),
        }
    }

    /// Take one snapshot. Both balance reads are pure and independent,
    /// so they are issued concurrently.
    pub async fn tick(&self) -> Result<BalanceSnapshot, MonitorError> {
        let (balance_a, balance_b) = tokio::join!(
            self.gateway
                .token_balance(&self.token_a, &self.collection_account),
            self.gateway
                .token_balance(&self.token_b, &self.collection_account),
        );
        let balance_a = balance_a?;
        let balance_b = balance_b?;

        let taken_at = Utc::now();
        let id = SnapshotRepository::new(&self.db)
            .insert(taken_at, balance_a, balance_b)
            .await?;

        debug!(
            snapshot_id = id,
            balance_a = %balance_a,
            balance_b = %balance_b,
            "Balance snapshot recorded"
        );

        Ok(BalanceSnapshot {
            id,
            taken_at,
            balance_a,
            balance_b,
        })
    }
}
