//! History CLI command for inspecting the batch audit log

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use poolwarden_ledger::{BatchRepository, ContributionRepository, Database, DailyUsageRepository};
use serde::Serialize;

/// History command for viewing the batch audit log
#[derive(Debug, Args)]
pub struct HistoryCommand {
    /// Maximum number of batches to show
    #[arg(long, short, default_value_t = 20)]
    pub limit: i64,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: OutputFormat,

    /// Path to database file
    #[arg(long, default_value = "data/poolwarden.db")]
    pub db_path: String,

    /// Also show per-depositor LP allocations
    #[arg(long)]
    pub allocations: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Serialize)]
struct HistoryReport {
    batches: Vec<poolwarden_core::Batch>,
    daily_usage: Vec<poolwarden_core::DailyUsage>,
    allocations: Option<Vec<(String, rust_decimal::Decimal)>>,
}

impl HistoryCommand {
    pub async fn run(&self) -> Result<()> {
        let db = Database::new(&self.db_path)
            .await
            .with_context(|| format!("Failed to open ledger at {}", self.db_path))?;

        let batches = BatchRepository::new(&db)
            .history(self.limit)
            .await
            .context("Failed to read batch history")?;
        let daily_usage = DailyUsageRepository::new(&db)
            .recent(14)
            .await
            .context("Failed to read daily usage")?;
        let allocations = if self.allocations {
            Some(
                ContributionRepository::new(&db)
                    .allocations_by_depositor()
                    .await
                    .context("Failed to read allocations")?,
            )
        } else {
            None
        };

        match self.format {
            OutputFormat::Json => {
                let report = HistoryReport {
                    batches,
                    daily_usage,
                    allocations,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec![
                        "created", "status", "amount A", "amount B", "matched A", "matched B",
                        "LP", "tx", "reason",
                    ]);

                for batch in &batches {
                    table.add_row(vec![
                        Cell::new(batch.created_at.format("%Y-%m-%d %H:%M:%S")),
                        Cell::new(batch.status.to_string()),
                        Cell::new(batch.amount_a.to_string()),
                        Cell::new(batch.amount_b.to_string()),
                        Cell::new(batch.matched_a.to_string()),
                        Cell::new(batch.matched_b.to_string()),
                        Cell::new(
                            batch
                                .actual_lp
                                .map(|lp| lp.to_string())
                                .unwrap_or_else(|| "-".to_string()),
                        ),
                        Cell::new(batch.tx_ref.as_deref().unwrap_or("-")),
                        Cell::new(batch.reason.as_deref().unwrap_or("")),
                    ]);
                }
                println!("{table}");

                let mut usage_table = Table::new();
                usage_table
                    .load_preset(UTF8_FULL)
                    .set_header(vec!["day", "used A", "used B", "reserved A", "reserved B"]);
                for usage in &daily_usage {
                    usage_table.add_row(vec![
                        Cell::new(&usage.day),
                        Cell::new(usage.used_a.to_string()),
                        Cell::new(usage.used_b.to_string()),
                        Cell::new(usage.reserved_a.to_string()),
                        Cell::new(usage.reserved_b.to_string()),
                    ]);
                }
                println!("{usage_table}");

                if let Some(allocations) = &allocations {
                    let mut alloc_table = Table::new();
                    alloc_table
                        .load_preset(UTF8_FULL)
                        .set_header(vec!["depositor", "LP allocated"]);
                    for (depositor, lp) in allocations {
                        alloc_table.add_row(vec![
                            Cell::new(depositor),
                            Cell::new(lp.to_string()),
                        ]);
                    }
                    println!("{alloc_table}");
                }
            }
        }

        Ok(())
    }
}
