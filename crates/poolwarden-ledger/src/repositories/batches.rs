//! Batch repository
//!
//! Owns the batch state machine. Every transition is a compare-and-set
//! on the previous status; submission, confirmation, and failure also
//! move the day's usage reservation inside the same transaction, so a
//! crash can never leave the counter and the batch disagreeing.

use crate::{error::Result, Database, LedgerError};
use chrono::{DateTime, Utc};
use poolwarden_core::{Batch, BatchStatus};
use rust_decimal::Decimal;
use sqlx::{Row, Sqlite, Transaction};
use std::str::FromStr;

/// Repository for the batch log
pub struct BatchRepository<'a> {
    db: &'a Database,
}

impl<'a> BatchRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a freshly proposed batch
    pub async fn insert(&self, batch: &Batch) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO batches (
                id, amount_a, amount_b, matched_a, matched_b,
                expected_lp, status, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&batch.id)
        .bind(batch.amount_a.to_string())
        .bind(batch.amount_b.to_string())
        .bind(batch.matched_a.to_string())
        .bind(batch.matched_b.to_string())
        .bind(batch.expected_lp.to_string())
        .bind(batch.status.to_string())
        .bind(batch.created_at.to_rfc3339())
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Get a batch by id
    pub async fn get(&self, id: &str) -> Result<Option<Batch>> {
        let row = sqlx::query("SELECT * FROM batches WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_batch(&r)?)),
            None => Ok(None),
        }
    }

    /// The single open (non-terminal) batch, if any. Finding more than
    /// one is a corruption of the single-flight invariant.
    pub async fn current_open(&self) -> Result<Option<Batch>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM batches
            WHERE status IN ('proposed', 'approved', 'submitted')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        if rows.len() > 1 {
            let ids: Vec<String> = rows.iter().map(|r| r.get::<String, _>("id")).collect();
            return Err(LedgerError::Corruption(format!(
                "{} non-terminal batches: {}",
                rows.len(),
                ids.join(", ")
            )));
        }

        match rows.first() {
            Some(r) => Ok(Some(Self::row_to_batch(r)?)),
            None => Ok(None),
        }
    }

    /// Batch history, newest first
    pub async fn history(&self, limit: i64) -> Result<Vec<Batch>> {
        let rows = sqlx::query("SELECT * FROM batches ORDER BY created_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(Self::row_to_batch).collect()
    }

    /// Proposed -> Approved
    pub async fn mark_approved(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE batches SET status = 'approved' WHERE id = ? AND status = 'proposed'",
        )
        .bind(id)
        .execute(self.db.pool())
        .await?;

        Self::expect_one(result.rows_affected(), id, "approved")
    }

    /// Proposed/Approved -> Aborted. No chain interaction has occurred;
    /// nothing besides the batch row needs cleanup.
    pub async fn mark_aborted(&self, id: &str, reason: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE batches SET status = 'aborted', reason = ?
            WHERE id = ? AND status IN ('proposed', 'approved')
            "#,
        )
        .bind(reason)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        Self::expect_one(result.rows_affected(), id, "aborted")
    }

    /// Approved -> Submitted. Records the matched amounts and reserves
    /// them against the day's usage counter in the same transaction.
    pub async fn mark_submitted(
        &self,
        id: &str,
        matched_a: Decimal,
        matched_b: Decimal,
        expected_lp: Decimal,
        day: &str,
    ) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE batches
            SET status = 'submitted', matched_a = ?, matched_b = ?, expected_lp = ?
            WHERE id = ? AND status = 'approved'
            "#,
        )
        .bind(matched_a.to_string())
        .bind(matched_b.to_string())
        .bind(expected_lp.to_string())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        Self::expect_one(result.rows_affected(), id, "submitted")?;

        sqlx::query("INSERT INTO daily_usage (day) VALUES (?) ON CONFLICT(day) DO NOTHING")
            .bind(day)
            .execute(&mut *tx)
            .await?;

        let (reserved_a, reserved_b) = Self::read_reserved(&mut tx, day).await?;
        Self::cas_reserved(
            &mut tx,
            day,
            reserved_a,
            reserved_b,
            reserved_a + matched_a,
            reserved_b + matched_b,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Record the broadcast transaction reference
    pub async fn set_tx_ref(&self, id: &str, tx_ref: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE batches SET tx_ref = ? WHERE id = ? AND status = 'submitted'")
                .bind(tx_ref)
                .bind(id)
                .execute(self.db.pool())
                .await?;

        Self::expect_one(result.rows_affected(), id, "tx_ref")
    }

    /// Submitted -> Confirmed. Finalizes the reservation: matched
    /// amounts move from reserved to used.
    pub async fn mark_confirmed(
        &self,
        id: &str,
        actual_lp: Decimal,
        confirmed_at: DateTime<Utc>,
        day: &str,
    ) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        let (matched_a, matched_b) = Self::read_matched(&mut tx, id).await?;

        let result = sqlx::query(
            r#"
            UPDATE batches SET status = 'confirmed', actual_lp = ?, confirmed_at = ?
            WHERE id = ? AND status = 'submitted'
            "#,
        )
        .bind(actual_lp.to_string())
        .bind(confirmed_at.to_rfc3339())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        Self::expect_one(result.rows_affected(), id, "confirmed")?;

        let (reserved_a, reserved_b) = Self::read_reserved(&mut tx, day).await?;
        let (used_a, used_b) = Self::read_used(&mut tx, day).await?;

        let new_reserved_a = reserved_a - matched_a;
        let new_reserved_b = reserved_b - matched_b;
        if new_reserved_a < Decimal::ZERO || new_reserved_b < Decimal::ZERO {
            return Err(LedgerError::Corruption(format!(
                "reservation underflow finalizing batch {} on {}",
                id, day
            )));
        }

        Self::cas_reserved(&mut tx, day, reserved_a, reserved_b, new_reserved_a, new_reserved_b)
            .await?;
        Self::cas_used(
            &mut tx,
            day,
            used_a,
            used_b,
            used_a + matched_a,
            used_b + matched_b,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Submitted -> Failed. Releases the reservation so the cap is not
    /// permanently consumed by a failed attempt.
    pub async fn mark_failed(&self, id: &str, reason: &str, day: &str) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        let (matched_a, matched_b) = Self::read_matched(&mut tx, id).await?;

        let result = sqlx::query(
            r#"
            UPDATE batches SET status = 'failed', reason = ?
            WHERE id = ? AND status = 'submitted'
            "#,
        )
        .bind(reason)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        Self::expect_one(result.rows_affected(), id, "failed")?;

        let (reserved_a, reserved_b) = Self::read_reserved(&mut tx, day).await?;
        let new_reserved_a = reserved_a - matched_a;
        let new_reserved_b = reserved_b - matched_b;
        if new_reserved_a < Decimal::ZERO || new_reserved_b < Decimal::ZERO {
            return Err(LedgerError::Corruption(format!(
                "reservation underflow releasing batch {} on {}",
                id, day
            )));
        }

        Self::cas_reserved(&mut tx, day, reserved_a, reserved_b, new_reserved_a, new_reserved_b)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    fn expect_one(rows_affected: u64, id: &str, transition: &str) -> Result<()> {
        if rows_affected == 1 {
            Ok(())
        } else {
            Err(LedgerError::ConcurrentUpdate(format!(
                "batch {} not in expected status for -> {}",
                id, transition
            )))
        }
    }

    async fn read_matched(
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
    ) -> Result<(Decimal, Decimal)> {
        let row = sqlx::query("SELECT matched_a, matched_b FROM batches WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("batch {}", id)))?;

        Ok((
            Decimal::from_str(row.get::<&str, _>("matched_a")).unwrap_or(Decimal::ZERO),
            Decimal::from_str(row.get::<&str, _>("matched_b")).unwrap_or(Decimal::ZERO),
        ))
    }

    async fn read_reserved(
        tx: &mut Transaction<'_, Sqlite>,
        day: &str,
    ) -> Result<(Decimal, Decimal)> {
        let row = sqlx::query("SELECT reserved_a, reserved_b FROM daily_usage WHERE day = ?")
            .bind(day)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("daily usage {}", day)))?;

        Ok((
            Decimal::from_str(row.get::<&str, _>("reserved_a")).unwrap_or(Decimal::ZERO),
            Decimal::from_str(row.get::<&str, _>("reserved_b")).unwrap_or(Decimal::ZERO),
        ))
    }

    async fn read_used(tx: &mut Transaction<'_, Sqlite>, day: &str) -> Result<(Decimal, Decimal)> {
        let row = sqlx::query("SELECT used_a, used_b FROM daily_usage WHERE day = ?")
            .bind(day)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("daily usage {}", day)))?;

        Ok((
            Decimal::from_str(row.get::<&str, _>("used_a")).unwrap_or(Decimal::ZERO),
            Decimal::from_str(row.get::<&str, _>("used_b")).unwrap_or(Decimal::ZERO),
        ))
    }

    async fn cas_reserved(
        tx: &mut Transaction<'_, Sqlite>,
        day: &str,
        old_a: Decimal,
        old_b: Decimal,
        new_a: Decimal,
        new_b: Decimal,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE daily_usage SET reserved_a = ?, reserved_b = ?
            WHERE day = ? AND reserved_a = ? AND reserved_b = ?
            "#,
        )
        .bind(new_a.to_string())
        .bind(new_b.to_string())
        .bind(day)
        .bind(old_a.to_string())
        .bind(old_b.to_string())
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(LedgerError::ConcurrentUpdate(format!(
                "daily usage reservation for {}",
                day
            )));
        }
        Ok(())
    }

    async fn cas_used(
        tx: &mut Transaction<'_, Sqlite>,
        day: &str,
        old_a: Decimal,
        old_b: Decimal,
        new_a: Decimal,
        new_b: Decimal,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE daily_usage SET used_a = ?, used_b = ?
            WHERE day = ? AND used_a = ? AND used_b = ?
            "#,
        )
        .bind(new_a.to_string())
        .bind(new_b.to_string())
        .bind(day)
        .bind(old_a.to_string())
        .bind(old_b.to_string())
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(LedgerError::ConcurrentUpdate(format!(
                "daily usage counter for {}",
                day
            )));
        }
        Ok(())
    }

    fn row_to_batch(row: &sqlx::sqlite::SqliteRow) -> Result<Batch> {
        let status: BatchStatus = row
            .get::<&str, _>("status")
            .parse()
            .map_err(LedgerError::Corruption)?;

        Ok(Batch {
            id: row.get("id"),
            amount_a: Decimal::from_str(row.get::<&str, _>("amount_a")).unwrap_or(Decimal::ZERO),
            amount_b: Decimal::from_str(row.get::<&str, _>("amount_b")).unwrap_or(Decimal::ZERO),
            matched_a: Decimal::from_str(row.get::<&str, _>("matched_a")).unwrap_or(Decimal::ZERO),
            matched_b: Decimal::from_str(row.get::<&str, _>("matched_b")).unwrap_or(Decimal::ZERO),
            expected_lp: Decimal::from_str(row.get::<&str, _>("expected_lp"))
                .unwrap_or(Decimal::ZERO),
            actual_lp: row
                .get::<Option<String>, _>("actual_lp")
                .and_then(|s| Decimal::from_str(&s).ok()),
            status,
            reason: row.get("reason"),
            tx_ref: row.get("tx_ref"),
            created_at: DateTime::parse_from_rfc3339(row.get::<&str, _>("created_at"))
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            confirmed_at: row
                .get::<Option<String>, _>("confirmed_at")
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|t| t.with_timezone(&Utc)),
        })
    }
}
