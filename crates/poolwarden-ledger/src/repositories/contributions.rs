//! Contribution record repository
//!
//! Contributions arrive from the external attribution feed and are only
//! ever stamped with a batch id once consumed. A record that straddles a
//! batch boundary is split: the consumed part keeps the row and gets the
//! stamp, the remainder is re-inserted unstamped, so the table's totals
//! are preserved and every unit of value is attributed exactly once.

use crate::{error::Result, Database, LedgerError};
use chrono::{DateTime, Utc};
use poolwarden_core::ContributionRecord;
use rust_decimal::Decimal;
use sqlx::Row;
use std::str::FromStr;

/// Repository for the contribution log
pub struct ContributionRepository<'a> {
    db: &'a Database,
}

impl<'a> ContributionRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Record a contribution credited by the attribution feed
    pub async fn insert(
        &self,
        depositor: &str,
        amount_a: Decimal,
        amount_b: Decimal,
        observed_at: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO contributions (depositor, amount_a, amount_b, observed_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(depositor)
        .bind(amount_a.to_string())
        .bind(amount_b.to_string())
        .bind(observed_at.to_rfc3339())
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Unconsumed contributions in insertion (oldest-first) order
    pub async fn unstamped(&self) -> Result<Vec<ContributionRecord>> {
        let rows =
            sqlx::query("SELECT * FROM contributions WHERE batch_id IS NULL ORDER BY id ASC")
                .fetch_all(self.db.pool())
                .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    /// Contributions consumed by a given batch
    pub async fn for_batch(&self, batch_id: &str) -> Result<Vec<ContributionRecord>> {
        let rows = sqlx::query("SELECT * FROM contributions WHERE batch_id = ? ORDER BY id ASC")
            .bind(batch_id)
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    /// Stamp a fully consumed record with its batch and LP allocation
    pub async fn stamp(&self, id: i64, batch_id: &str, lp_allocation: Decimal) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE contributions SET batch_id = ?, lp_allocation = ?
            WHERE id = ? AND batch_id IS NULL
            "#,
        )
        .bind(batch_id)
        .bind(lp_allocation.to_string())
        .bind(id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() != 1 {
            return Err(LedgerError::ConcurrentUpdate(format!(
                "contribution {} already stamped",
                id
            )));
        }
        Ok(())
    }

    /// Stamp the consumed part of a straddling record and re-insert the
    /// remainder unstamped, atomically
    #[allow(clippy::too_many_arguments)]
    pub async fn stamp_split(
        &self,
        id: i64,
        batch_id: &str,
        lp_allocation: Decimal,
        consumed_a: Decimal,
        consumed_b: Decimal,
        remainder_a: Decimal,
        remainder_b: Decimal,
    ) -> Result<()> {
        let row = sqlx::query("SELECT depositor, observed_at FROM contributions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("contribution {}", id)))?;
        let depositor: String = row.get("depositor");
        let observed_at: String = row.get("observed_at");

        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE contributions
            SET amount_a = ?, amount_b = ?, batch_id = ?, lp_allocation = ?
            WHERE id = ? AND batch_id IS NULL
            "#,
        )
        .bind(consumed_a.to_string())
        .bind(consumed_b.to_string())
        .bind(batch_id)
        .bind(lp_allocation.to_string())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(LedgerError::ConcurrentUpdate(format!(
                "contribution {} already stamped",
                id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO contributions (depositor, amount_a, amount_b, observed_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&depositor)
        .bind(remainder_a.to_string())
        .bind(remainder_b.to_string())
        .bind(&observed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Total LP allocated per depositor, for the audit view
    pub async fn allocations_by_depositor(&self) -> Result<Vec<(String, Decimal)>> {
        let rows = sqlx::query(
            r#"
            SELECT depositor, COALESCE(SUM(CAST(lp_allocation AS REAL)), 0) AS total
            FROM contributions
            WHERE lp_allocation IS NOT NULL
            GROUP BY depositor
            ORDER BY total DESC
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let total: f64 = r.get("total");
                (
                    r.get::<String, _>("depositor"),
                    Decimal::from_f64_retain(total).unwrap_or(Decimal::ZERO),
                )
            })
            .collect())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ContributionRecord> {
        Ok(ContributionRecord {
            id: row.get("id"),
            depositor: row.get("depositor"),
            amount_a: Decimal::from_str(row.get::<&str, _>("amount_a")).unwrap_or(Decimal::ZERO),
            amount_b: Decimal::from_str(row.get::<&str, _>("amount_b")).unwrap_or(Decimal::ZERO),
            observed_at: DateTime::parse_from_rfc3339(row.get::<&str, _>("observed_at"))
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            batch_id: row.get("batch_id"),
            lp_allocation: row
                .get::<Option<String>, _>("lp_allocation")
                .and_then(|s| Decimal::from_str(&s).ok()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn stamp_consumes_exactly_once() {
        let db = Database::in_memory().await.unwrap();
        let repo = ContributionRepository::new(&db);

        let id = repo
            .insert("0xdep1", dec!(100), dec!(10), Utc::now())
            .await
            .unwrap();

        repo.stamp(id, "batch-1", dec!(5)).await.unwrap();

        // Second stamp loses the CAS
        assert!(matches!(
            repo.stamp(id, "batch-2", dec!(5)).await,
            Err(LedgerError::ConcurrentUpdate(_))
        ));

        assert!(repo.unstamped().await.unwrap().is_empty());
        let consumed = repo.for_batch("batch-1").await.unwrap();
        assert_eq!(consumed.len(), 1);
        assert_eq!(consumed[0].lp_allocation, Some(dec!(5)));
    }

    #[tokio::test]
    async fn split_preserves_totals_and_order() {
        let db = Database::in_memory().await.unwrap();
        let repo = ContributionRepository::new(&db);

        let id = repo
            .insert("0xdep1", dec!(100), dec!(10), Utc::now())
            .await
            .unwrap();

        repo.stamp_split(id, "batch-1", dec!(3), dec!(60), dec!(6), dec!(40), dec!(4))
            .await
            .unwrap();

        let consumed = repo.for_batch("batch-1").await.unwrap();
        assert_eq!(consumed[0].amount_a, dec!(60));
        assert_eq!(consumed[0].amount_b, dec!(6));

        let open = repo.unstamped().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].depositor, "0xdep1");
        assert_eq!(open[0].amount_a, dec!(40));
        assert_eq!(open[0].amount_b, dec!(4));

        // Consumed + remainder equals the original amounts
        assert_eq!(consumed[0].amount_a + open[0].amount_a, dec!(100));
        assert_eq!(consumed[0].amount_b + open[0].amount_b, dec!(10));
    }
}
