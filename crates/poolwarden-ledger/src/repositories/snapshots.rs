//! Balance snapshot repository

use crate::{error::Result, Database};
use chrono::{DateTime, Utc};
use poolwarden_core::BalanceSnapshot;
use rust_decimal::Decimal;
use sqlx::Row;
use std::str::FromStr;

/// Repository for the balance snapshot history
pub struct SnapshotRepository<'a> {
    db: &'a Database,
}

impl<'a> SnapshotRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Append a snapshot; returns the assigned row id
    pub async fn insert(
        &self,
        taken_at: DateTime<Utc>,
        balance_a: Decimal,
        balance_b: Decimal,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO balance_snapshots (taken_at, balance_a, balance_b) VALUES (?, ?, ?)",
        )
        .bind(taken_at.to_rfc3339())
        .bind(balance_a.to_string())
        .bind(balance_b.to_string())
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Latest snapshot, the only decision-relevant one
    pub async fn latest(&self) -> Result<Option<BalanceSnapshot>> {
        let row = sqlx::query("SELECT * FROM balance_snapshots ORDER BY id DESC LIMIT 1")
            .fetch_optional(self.db.pool())
            .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_snapshot(&r)?)),
            None => Ok(None),
        }
    }

    /// Most recent snapshots, newest first
    pub async fn recent(&self, limit: i64) -> Result<Vec<BalanceSnapshot>> {
        let rows = sqlx::query("SELECT * FROM balance_snapshots ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(Self::row_to_snapshot).collect()
    }

    fn row_to_snapshot(row: &sqlx::sqlite::SqliteRow) -> Result<BalanceSnapshot> {
        Ok(BalanceSnapshot {
            id: row.get("id"),
            taken_at: DateTime::parse_from_rfc3339(row.get::<&str, _>("taken_at"))
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            balance_a: Decimal::from_str(row.get::<&str, _>("balance_a"))
                .unwrap_or(Decimal::ZERO),
            balance_b: Decimal::from_str(row.get::<&str, _>("balance_b"))
                .unwrap_or(Decimal::ZERO),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn latest_supersedes_older_snapshots() {
        let db = Database::in_memory().await.unwrap();
        let repo = SnapshotRepository::new(&db);

        assert!(repo.latest().await.unwrap().is_none());

        repo.insert(Utc::now(), dec!(100), dec!(10)).await.unwrap();
        repo.insert(Utc::now(), dec!(1200), dec!(120)).await.unwrap();

        let latest = repo.latest().await.unwrap().unwrap();
        assert_eq!(latest.balance_a, dec!(1200));
        assert_eq!(latest.balance_b, dec!(120));

        // History is retained, not overwritten
        assert_eq!(repo.recent(10).await.unwrap().len(), 2);
    }
}
