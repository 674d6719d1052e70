//! Daily usage counter repository
//!
//! Counters are keyed by UTC day and created lazily; the reset at UTC
//! midnight is simply a new row. Increments happen inside the batch
//! transitions (see `BatchRepository`); this repository only reads and
//! seeds rows.

use crate::{error::Result, Database};
use poolwarden_core::DailyUsage;
use rust_decimal::Decimal;
use sqlx::Row;
use std::str::FromStr;

/// Repository for daily usage counters
pub struct DailyUsageRepository<'a> {
    db: &'a Database,
}

impl<'a> DailyUsageRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Get or create the counter for a day
    pub async fn get_or_create(&self, day: &str) -> Result<DailyUsage> {
        if let Some(usage) = self.get(day).await? {
            return Ok(usage);
        }

        sqlx::query("INSERT INTO daily_usage (day) VALUES (?) ON CONFLICT(day) DO NOTHING")
            .bind(day)
            .execute(self.db.pool())
            .await?;

        Ok(DailyUsage {
            day: day.to_string(),
            ..Default::default()
        })
    }

    /// Get the counter for a day
    pub async fn get(&self, day: &str) -> Result<Option<DailyUsage>> {
        let row = sqlx::query("SELECT * FROM daily_usage WHERE day = ?")
            .bind(day)
            .fetch_optional(self.db.pool())
            .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_usage(&r)?)),
            None => Ok(None),
        }
    }

    /// Recent counters, newest first, for the audit view
    pub async fn recent(&self, days: i64) -> Result<Vec<DailyUsage>> {
        let rows = sqlx::query("SELECT * FROM daily_usage ORDER BY day DESC LIMIT ?")
            .bind(days)
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(Self::row_to_usage).collect()
    }

    fn row_to_usage(row: &sqlx::sqlite::SqliteRow) -> Result<DailyUsage> {
        Ok(DailyUsage {
            day: row.get("day"),
            used_a: Decimal::from_str(row.get::<&str, _>("used_a")).unwrap_or(Decimal::ZERO),
            used_b: Decimal::from_str(row.get::<&str, _>("used_b")).unwrap_or(Decimal::ZERO),
            reserved_a: Decimal::from_str(row.get::<&str, _>("reserved_a"))
                .unwrap_or(Decimal::ZERO),
            reserved_b: Decimal::from_str(row.get::<&str, _>("reserved_b"))
                .unwrap_or(Decimal::ZERO),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn lazily_creates_per_day() {
        let db = Database::in_memory().await.unwrap();
        let repo = DailyUsageRepository::new(&db);

        assert!(repo.get("2026-08-05").await.unwrap().is_none());

        let usage = repo.get_or_create("2026-08-05").await.unwrap();
        assert_eq!(usage.day, "2026-08-05");
        assert_eq!(usage.used_a, dec!(0));

        // Second call returns the same row
        repo.get_or_create("2026-08-05").await.unwrap();
        repo.get_or_create("2026-08-06").await.unwrap();
        assert_eq!(repo.recent(10).await.unwrap().len(), 2);
    }
}
