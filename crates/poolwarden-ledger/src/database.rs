//! Database connection and schema management

use crate::error::Result;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let connection_string = format!("sqlite:{}?mode=rwc", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await?;

        let db = Self { pool };
        db.initialize_schema().await?;

        info!(db_path = %db_path, "Ledger initialized");
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Get the connection pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Initialize database schema
    async fn initialize_schema(&self) -> Result<()> {
        // Balance snapshot history; only the latest row is decision-relevant
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS balance_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                taken_at TEXT NOT NULL,
                balance_a TEXT NOT NULL,
                balance_b TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Contribution log; insertion order is the attribution order
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contributions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                depositor TEXT NOT NULL,
                amount_a TEXT NOT NULL,
                amount_b TEXT NOT NULL,
                observed_at TEXT NOT NULL,
                batch_id TEXT,
                lp_allocation TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Batch audit log
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batches (
                id TEXT PRIMARY KEY,
                amount_a TEXT NOT NULL,
                amount_b TEXT NOT NULL,
                matched_a TEXT NOT NULL DEFAULT '0',
                matched_b TEXT NOT NULL DEFAULT '0',
                expected_lp TEXT NOT NULL DEFAULT '0',
                actual_lp TEXT,
                status TEXT NOT NULL,
                reason TEXT,
                tx_ref TEXT,
                created_at TEXT NOT NULL,
                confirmed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Per-UTC-day usage counters; old days retained for audit
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_usage (
                day TEXT PRIMARY KEY,
                used_a TEXT NOT NULL DEFAULT '0',
                used_b TEXT NOT NULL DEFAULT '0',
                reserved_a TEXT NOT NULL DEFAULT '0',
                reserved_b TEXT NOT NULL DEFAULT '0'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Create indexes for common queries
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_snapshots_taken_at ON balance_snapshots(taken_at);
            CREATE INDEX IF NOT EXISTS idx_contributions_batch ON contributions(batch_id);
            CREATE INDEX IF NOT EXISTS idx_contributions_depositor ON contributions(depositor);
            CREATE INDEX IF NOT EXISTS idx_batches_status ON batches(status);
            CREATE INDEX IF NOT EXISTS idx_batches_created ON batches(created_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
