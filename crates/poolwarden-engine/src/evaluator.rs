//! Threshold evaluator
//!
//! Pure decision function: given the latest snapshot, the current
//! safety limits, and today's usage, decide whether a batch should be
//! attempted and at what size. An asymmetric pool cannot be provisioned
//! with only one side funded, so both balances must clear their
//! minimums. Amounts are clamped by the per-transaction cap and by the
//! day's remaining headroom; the clamped excess is left at the
//! collection account for a later batch, never discarded.

use poolwarden_core::{BalanceSnapshot, DailyUsage, Proposal, SafetyConfig};
use rust_decimal::Decimal;

/// Evaluate whether a batch should trigger
pub fn evaluate(
    snapshot: &BalanceSnapshot,
    safety: &SafetyConfig,
    usage: &DailyUsage,
) -> Option<Proposal> {
    if safety.emergency_stop {
        return None;
    }

    let headroom_a = (safety.daily_limit_a - usage.committed_a()).max(Decimal::ZERO);
    let headroom_b = (safety.daily_limit_b - usage.committed_b()).max(Decimal::ZERO);

    let amount_a = snapshot
        .balance_a
        .min(safety.max_single_tx_a)
        .min(headroom_a);
    let amount_b = snapshot
        .balance_b
        .min(safety.max_single_tx_b)
        .min(headroom_b);

    // A clamped side that falls under its minimum cancels the trigger;
    // the funds wait for the next day's reset or more deposits.
    if amount_a < safety.min_threshold_a || amount_b < safety.min_threshold_b {
        return None;
    }
    if amount_a <= Decimal::ZERO || amount_b <= Decimal::ZERO {
        return None;
    }

    Some(Proposal { amount_a, amount_b })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn snapshot(balance_a: Decimal, balance_b: Decimal) -> BalanceSnapshot {
        BalanceSnapshot {
            id: 1,
            taken_at: Utc::now(),
            balance_a,
            balance_b,
        }
    }

    fn safety() -> SafetyConfig {
        SafetyConfig {
            min_threshold_a: dec!(1000),
            min_threshold_b: dec!(100),
            max_single_tx_a: dec!(1000),
            max_single_tx_b: dec!(1000),
            daily_limit_a: dec!(5000),
            daily_limit_b: dec!(500),
            emergency_stop: false,
            ..Default::default()
        }
    }

    fn usage() -> DailyUsage {
        DailyUsage {
            day: "2026-08-05".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn triggers_when_both_sides_clear_minimums() {
        let proposal = evaluate(&snapshot(dec!(1200), dec!(120)), &safety(), &usage()).unwrap();
        assert_eq!(proposal.amount_a, dec!(1000));
        assert_eq!(proposal.amount_b, dec!(120));
    }

    #[test]
    fn one_funded_side_is_not_enough() {
        assert!(evaluate(&snapshot(dec!(1200), dec!(50)), &safety(), &usage()).is_none());
        assert!(evaluate(&snapshot(dec!(500), dec!(120)), &safety(), &usage()).is_none());
    }

    #[test]
    fn emergency_stop_suppresses_trigger() {
        let mut config = safety();
        config.emergency_stop = true;
        assert!(evaluate(&snapshot(dec!(1200), dec!(120)), &config, &usage()).is_none());
    }

    #[test]
    fn excess_is_clamped_not_discarded() {
        let proposal = evaluate(&snapshot(dec!(4000), dec!(400)), &safety(), &usage()).unwrap();
        assert_eq!(proposal.amount_a, dec!(1000));
        assert_eq!(proposal.amount_b, dec!(400));
    }

    #[test]
    fn daily_headroom_clips_before_validation() {
        let mut config = safety();
        config.daily_limit_a = dec!(1500);
        config.min_threshold_a = dec!(400);
        let mut used = usage();
        used.used_a = dec!(1000);

        // 1500 limit with 1000 used leaves 500; still over the 400 minimum
        let proposal = evaluate(&snapshot(dec!(1200), dec!(120)), &config, &used).unwrap();
        assert_eq!(proposal.amount_a, dec!(500));

        // With the original 1000 minimum the clipped amount aborts the trigger
        config.min_threshold_a = dec!(1000);
        assert!(evaluate(&snapshot(dec!(1200), dec!(120)), &config, &used).is_none());
    }

    #[test]
    fn in_flight_reservation_counts_against_headroom() {
        let mut config = safety();
        config.daily_limit_a = dec!(1500);
        let mut used = usage();
        used.reserved_a = dec!(1000);

        let result = evaluate(&snapshot(dec!(1200), dec!(120)), &config, &used);
        // 500 headroom is under the 1000 minimum
        assert!(result.is_none());
    }

    #[test]
    fn zero_thresholds_still_require_nonzero_amounts() {
        let mut config = safety();
        config.min_threshold_a = Decimal::ZERO;
        config.min_threshold_b = Decimal::ZERO;
        assert!(evaluate(&snapshot(dec!(0), dec!(0)), &config, &usage()).is_none());
    }
}
