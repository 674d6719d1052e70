//! Attribution ledger
//!
//! Apportions a confirmed batch's minted LP tokens to the depositors
//! whose contributions funded it. Records are consumed in insertion
//! (oldest-first) order up to the batch's matched amounts; a record
//! only partially covered is split, with the uncovered remainder left
//! unstamped for the next batch. Each consumed record receives
//! `actual_lp * (a/matched_a + b/matched_b) / 2`, so the full mint is
//! distributed and nothing is double-counted.

use poolwarden_core::{Batch, ContributionRecord};
use poolwarden_ledger::{ContributionRepository, Database, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

/// Planned allocation for one contribution record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub contribution_id: i64,
    pub depositor: String,
    pub consumed_a: Decimal,
    pub consumed_b: Decimal,
    pub lp_amount: Decimal,
    /// Unconsumed part of a straddling record, re-inserted unstamped
    pub remainder: Option<(Decimal, Decimal)>,
}

/// Plan the LP allocation for a confirmed batch.
///
/// Pure function over the batch and the unstamped records in insertion
/// order; re-running it over the same inputs yields identical output.
pub fn plan_allocations(batch: &Batch, unstamped: &[ContributionRecord]) -> Vec<Allocation> {
    let actual_lp = batch.actual_lp.unwrap_or(Decimal::ZERO);
    let mut remaining_a = batch.matched_a;
    let mut remaining_b = batch.matched_b;
    let mut allocations = Vec::new();

    for record in unstamped {
        if remaining_a <= Decimal::ZERO && remaining_b <= Decimal::ZERO {
            break;
        }

        // Fraction of this record the batch can still cover; the
        // scarcer token binds
        let fraction_a = coverage(remaining_a, record.amount_a);
        let fraction_b = coverage(remaining_b, record.amount_b);
        let fraction = fraction_a.min(fraction_b);

        if fraction <= Decimal::ZERO {
            // Preserve oldest-first ordering: a record that cannot be
            // consumed blocks everything younger than it
            break;
        }

        let consumed_a = record.amount_a * fraction;
        let consumed_b = record.amount_b * fraction;
        remaining_a -= consumed_a;
        remaining_b -= consumed_b;

        let lp_amount = lp_share(actual_lp, consumed_a, consumed_b, batch);

        allocations.push(Allocation {
            contribution_id: record.id,
            depositor: record.depositor.clone(),
            consumed_a,
            consumed_b,
            lp_amount,
            remainder: if fraction < dec!(1) {
                Some((
                    record.amount_a - consumed_a,
                    record.amount_b - consumed_b,
                ))
            } else {
                None
            },
        });
    }

    allocations
}

fn coverage(remaining: Decimal, amount: Decimal) -> Decimal {
    if amount <= Decimal::ZERO {
        // A record contributing nothing of this token is not limited by it
        dec!(1)
    } else if remaining <= Decimal::ZERO {
        Decimal::ZERO
    } else {
        (remaining / amount).min(dec!(1))
    }
}

fn lp_share(actual_lp: Decimal, consumed_a: Decimal, consumed_b: Decimal, batch: &Batch) -> Decimal {
    let weight_a = if batch.matched_a > Decimal::ZERO {
        consumed_a / batch.matched_a
    } else {
        Decimal::ZERO
    };
    let weight_b = if batch.matched_b > Decimal::ZERO {
        consumed_b / batch.matched_b
    } else {
        Decimal::ZERO
    };

    // Average the two sides so a and b contributions weigh equally
    match (batch.matched_a > Decimal::ZERO, batch.matched_b > Decimal::ZERO) {
        (true, true) => actual_lp * (weight_a + weight_b) / dec!(2),
        (true, false) => actual_lp * weight_a,
        (false, true) => actual_lp * weight_b,
        (false, false) => Decimal::ZERO,
    }
}

/// Applies allocation plans to the ledger
pub struct AttributionLedger {
    db: Database,
}

impl AttributionLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Attribute a confirmed batch's LP tokens to depositors. Running
    /// twice for the same batch is a no-op: stamped records are never
    /// re-selected.
    pub async fn attribute(&self, batch: &Batch) -> Result<Vec<Allocation>> {
        let contributions = ContributionRepository::new(&self.db);

        if !contributions.for_batch(&batch.id).await?.is_empty() {
            debug!(batch_id = %batch.id, "Batch already attributed");
            return Ok(Vec::new());
        }

        let unstamped = contributions.unstamped().await?;
        let allocations = plan_allocations(batch, &unstamped);

        for allocation in &allocations {
            match allocation.remainder {
                Some((remainder_a, remainder_b)) => {
                    contributions
                        .stamp_split(
                            allocation.contribution_id,
                            &batch.id,
                            allocation.lp_amount,
                            allocation.consumed_a,
                            allocation.consumed_b,
                            remainder_a,
                            remainder_b,
                        )
                        .await?;
                }
                None => {
                    contributions
                        .stamp(allocation.contribution_id, &batch.id, allocation.lp_amount)
                        .await?;
                }
            }
            debug!(
                batch_id = %batch.id,
                contribution_id = allocation.contribution_id,
                depositor = %allocation.depositor,
                lp = %allocation.lp_amount,
                "LP allocation stamped"
            );
        }

        info!(
            batch_id = %batch.id,
            allocations = allocations.len(),
            lp_total = %batch.actual_lp.unwrap_or(Decimal::ZERO),
            "Batch attributed"
        );

        Ok(allocations)
    }
}
