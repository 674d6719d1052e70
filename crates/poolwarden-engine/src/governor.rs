//! Safety governor
//!
//! Validates a proposed batch before execution. Checks run in order and
//! short-circuit on the first failure: emergency stop, per-transaction
//! caps, daily caps, multisig approval (when required), price impact.
//! A missing multisig approval is a wait, not a failure; the same
//! proposal is re-checked on the next tick.

use poolwarden_core::{
    ApprovalSource, DailyUsage, PoolReserves, Proposal, SafetyConfig,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Governor decision for a proposed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// All checks passed
    Approved,
    /// A safety check failed; the batch is aborted
    Rejected { reason: String },
    /// Approval not yet present; abort without treating it as a failure
    Wait { reason: String },
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Verdict::Approved)
    }
}

/// Safety governor holding the hot-reloadable limits and the operator
/// halt switch
pub struct SafetyGovernor {
    config: Arc<RwLock<SafetyConfig>>,
    halted: Arc<AtomicBool>,
    halt_reason: Arc<RwLock<Option<String>>>,
    approvals: Arc<dyn ApprovalSource>,
}

impl SafetyGovernor {
    pub fn new(config: SafetyConfig, approvals: Arc<dyn ApprovalSource>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            halted: Arc::new(AtomicBool::new(false)),
            halt_reason: Arc::new(RwLock::new(None)),
            approvals,
        }
    }

    /// Replace the safety limits at runtime (config hot reload)
    pub async fn update_config(&self, new_config: SafetyConfig) {
        let mut config = self.config.write().await;
        *config = new_config;
        info!(
            max_single_tx_a = %config.max_single_tx_a,
            max_single_tx_b = %config.max_single_tx_b,
            daily_limit_a = %config.daily_limit_a,
            daily_limit_b = %config.daily_limit_b,
            max_price_impact_bps = %config.max_price_impact_bps,
            emergency_stop = config.emergency_stop,
            "Safety configuration updated"
        );
    }

    /// Current limits. Callers must re-read before every decision
    /// rather than caching across ticks.
    pub async fn current_config(&self) -> SafetyConfig {
        self.config.read().await.clone()
    }

    /// Whether the operator or the config has stopped execution
    pub async fn is_stopped(&self) -> bool {
        self.is_halted() || self.config.read().await.emergency_stop
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub async fn halt_reason(&self) -> Option<String> {
        self.halt_reason.read().await.clone()
    }

    /// Halt all execution (operator kill switch)
    pub fn halt(&self, reason: &str) {
        self.halted.store(true, Ordering::SeqCst);
        // halt can be called from sync contexts
        if let Ok(mut halt_reason) = self.halt_reason.try_write() {
            *halt_reason = Some(reason.to_string());
        }
        warn!(reason = %reason, "Execution halted");
    }

    /// Resume execution
    pub fn resume(&self) {
        self.halted.store(false, Ordering::SeqCst);
        if let Ok(mut halt_reason) = self.halt_reason.try_write() {
            *halt_reason = None;
        }
        info!("Execution resumed");
    }

    /// Validate a proposal against the current limits
    pub async fn review(
        &self,
        proposal: &Proposal,
        usage: &DailyUsage,
        reserves: &PoolReserves,
        day: &str,
    ) -> Verdict {
        if self.is_halted() {
            let reason = self
                .halt_reason
                .read()
                .await
                .clone()
                .unwrap_or_else(|| "halted by operator".to_string());
            return Verdict::Rejected { reason };
        }

        // Read config once for this review
        let config = self.config.read().await.clone();

        if config.emergency_stop {
            return Verdict::Rejected {
                reason: "emergency stop engaged".to_string(),
            };
        }

        if proposal.amount_a > config.max_single_tx_a {
            return Verdict::Rejected {
                reason: format!(
                    "amount {} of token A exceeds per-tx cap {}",
                    proposal.amount_a, config.max_single_tx_a
                ),
            };
        }
        if proposal.amount_b > config.max_single_tx_b {
            return Verdict::Rejected {
                reason: format!(
                    "amount {} of token B exceeds per-tx cap {}",
                    proposal.amount_b, config.max_single_tx_b
                ),
            };
        }

        if usage.committed_a() + proposal.amount_a > config.daily_limit_a {
            return Verdict::Rejected {
                reason: format!(
                    "daily limit A: {} committed + {} proposed > {}",
                    usage.committed_a(),
                    proposal.amount_a,
                    config.daily_limit_a
                ),
            };
        }
        if usage.committed_b() + proposal.amount_b > config.daily_limit_b {
            return Verdict::Rejected {
                reason: format!(
                    "daily limit B: {} committed + {} proposed > {}",
                    usage.committed_b(),
                    proposal.amount_b,
                    config.daily_limit_b
                ),
            };
        }

        if config.require_multisig {
            match self
                .approvals
                .is_approved(proposal.amount_a, proposal.amount_b, day)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    return Verdict::Wait {
                        reason: format!(
                            "awaiting multisig approval for ({}, {}, {})",
                            proposal.amount_a, proposal.amount_b, day
                        ),
                    };
                }
                Err(e) => {
                    return Verdict::Wait {
                        reason: format!("approval registry unreachable: {}", e),
                    };
                }
            }
        }

        match price_impact_bps(proposal, reserves) {
            Some(impact) if impact <= config.max_price_impact_bps => Verdict::Approved,
            Some(impact) => Verdict::Rejected {
                reason: format!(
                    "price impact {} bps exceeds limit {} bps",
                    impact.round_dp(2),
                    config.max_price_impact_bps
                ),
            },
            None => Verdict::Rejected {
                reason: "pool has no reserves".to_string(),
            },
        }
    }
}

/// Implied-price shift the proposal would cause, in basis points:
/// `|r_after - r_before| / r_before` with `r = reserve_b / reserve_a`.
pub fn price_impact_bps(proposal: &Proposal, reserves: &PoolReserves) -> Option<Decimal> {
    if reserves.reserve_a <= Decimal::ZERO || reserves.reserve_b <= Decimal::ZERO {
        return None;
    }

    let ratio_before = reserves.reserve_b / reserves.reserve_a;
    let ratio_after =
        (reserves.reserve_b + proposal.amount_b) / (reserves.reserve_a + proposal.amount_a);

    Some((ratio_after - ratio_before).abs() / ratio_before * dec!(10000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use poolwarden_core::{ApprovalSource, GatewayError};
    use std::sync::atomic::AtomicU32;

    /// Scripted approval source
    pub struct ScriptedApprovals {
        approve: bool,
        fail: bool,
        pub calls: AtomicU32,
    }

    impl ScriptedApprovals {
        pub fn granting(approve: bool) -> Self {
            Self {
                approve,
                fail: false,
                calls: AtomicU32::new(0),
            }
        }

        pub fn unreachable() -> Self {
            Self {
                approve: false,
                fail: true,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ApprovalSource for ScriptedApprovals {
        async fn is_approved(
            &self,
            _amount_a: Decimal,
            _amount_b: Decimal,
            _day: &str,
        ) -> Result<bool, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GatewayError::Http("connection refused".to_string()));
            }
            Ok(self.approve)
        }
    }

    fn config() -> SafetyConfig {
        SafetyConfig {
            min_threshold_a: dec!(1000),
            min_threshold_b: dec!(100),
            max_single_tx_a: dec!(1000),
            max_single_tx_b: dec!(1000),
            daily_limit_a: dec!(5000),
            daily_limit_b: dec!(500),
            max_price_impact_bps: dec!(100),
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

    /// Deep pool at the 10:1 ratio of the happy-path scenario
    fn deep_reserves() -> PoolReserves {
        PoolReserves {
            reserve_a: dec!(1000000),
            reserve_b: dec!(100000),
            lp_supply: dec!(316227),
        }
    }

    fn proposal() -> Proposal {
        Proposal {
            amount_a: dec!(1000),
            amount_b: dec!(100),
        }
    }

    #[tokio::test]
    async fn approves_within_all_limits() {
        let governor = SafetyGovernor::new(config(), Arc::new(ScriptedApprovals::granting(true)));
        let verdict = governor
            .review(&proposal(), &usage(), &deep_reserves(), "2026-08-05")
            .await;
        assert!(verdict.is_approved());
    }

    #[tokio::test]
    async fn emergency_stop_rejects_first() {
        let mut cfg = config();
        cfg.emergency_stop = true;
        let governor = SafetyGovernor::new(cfg, Arc::new(ScriptedApprovals::granting(true)));
        match governor
            .review(&proposal(), &usage(), &deep_reserves(), "2026-08-05")
            .await
        {
            Verdict::Rejected { reason } => assert!(reason.contains("emergency stop")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn operator_halt_rejects() {
        let governor = SafetyGovernor::new(config(), Arc::new(ScriptedApprovals::granting(true)));
        governor.halt("manual intervention");
        match governor
            .review(&proposal(), &usage(), &deep_reserves(), "2026-08-05")
            .await
        {
            Verdict::Rejected { reason } => assert_eq!(reason, "manual intervention"),
            other => panic!("expected rejection, got {:?}", other),
        }

        governor.resume();
        assert!(governor
            .review(&proposal(), &usage(), &deep_reserves(), "2026-08-05")
            .await
            .is_approved());
    }

    #[tokio::test]
    async fn per_tx_cap_rejects() {
        let governor = SafetyGovernor::new(config(), Arc::new(ScriptedApprovals::granting(true)));
        let oversized = Proposal {
            amount_a: dec!(1500),
            amount_b: dec!(100),
        };
        match governor
            .review(&oversized, &usage(), &deep_reserves(), "2026-08-05")
            .await
        {
            Verdict::Rejected { reason } => assert!(reason.contains("per-tx cap")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn daily_cap_counts_reservations() {
        let governor = SafetyGovernor::new(config(), Arc::new(ScriptedApprovals::granting(true)));
        let mut used = usage();
        used.used_a = dec!(3500);
        used.reserved_a = dec!(1000);

        match governor
            .review(&proposal(), &used, &deep_reserves(), "2026-08-05")
            .await
        {
            Verdict::Rejected { reason } => assert!(reason.contains("daily limit A")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_multisig_is_wait_not_failure() {
        let mut cfg = config();
        cfg.require_multisig = true;
        let approvals = Arc::new(ScriptedApprovals::granting(false));
        let governor = SafetyGovernor::new(cfg, approvals.clone());

        match governor
            .review(&proposal(), &usage(), &deep_reserves(), "2026-08-05")
            .await
        {
            Verdict::Wait { reason } => assert!(reason.contains("awaiting multisig")),
            other => panic!("expected wait, got {:?}", other),
        }
        assert_eq!(approvals.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_registry_is_wait() {
        let mut cfg = config();
        cfg.require_multisig = true;
        let governor = SafetyGovernor::new(cfg, Arc::new(ScriptedApprovals::unreachable()));

        match governor
            .review(&proposal(), &usage(), &deep_reserves(), "2026-08-05")
            .await
        {
            Verdict::Wait { reason } => assert!(reason.contains("unreachable")),
            other => panic!("expected wait, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn thin_pool_price_impact_rejects() {
        let mut cfg = config();
        cfg.max_price_impact_bps = dec!(50);
        let governor = SafetyGovernor::new(cfg, Arc::new(ScriptedApprovals::granting(true)));

        // Thin pool at 10:1 where a (1000, 100) add shifts the implied
        // price by well over 50 bps
        let thin = PoolReserves {
            reserve_a: dec!(5000),
            reserve_b: dec!(450),
            lp_supply: dec!(1500),
        };

        match governor
            .review(&proposal(), &usage(), &thin, "2026-08-05")
            .await
        {
            Verdict::Rejected { reason } => assert!(reason.contains("price impact")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn ratio_consistent_add_has_zero_impact() {
        // (1000, 100) into a 10:1 pool leaves the implied price unchanged
        let impact = price_impact_bps(
            &Proposal {
                amount_a: dec!(1000),
                amount_b: dec!(100),
            },
            &PoolReserves {
                reserve_a: dec!(10000),
                reserve_b: dec!(1000),
                lp_supply: dec!(3162),
            },
        )
        .unwrap();
        assert_eq!(impact, dec!(0));
    }

    #[test]
    fn off_ratio_add_moves_the_price() {
        let impact = price_impact_bps(
            &Proposal {
                amount_a: dec!(1000),
                amount_b: dec!(50),
            },
            &PoolReserves {
                reserve_a: dec!(10000),
                reserve_b: dec!(1000),
                lp_supply: dec!(3162),
            },
        )
        .unwrap();
        // ratio drops from 0.1 to 1050/11000; about 454 bps
        assert!(impact > dec!(400) && impact < dec!(500));
    }

    #[test]
    fn empty_pool_has_no_impact_figure() {
        assert!(price_impact_bps(
            &Proposal {
                amount_a: dec!(1),
                amount_b: dec!(1),
            },
            &PoolReserves {
                reserve_a: dec!(0),
                reserve_b: dec!(0),
                lp_supply: dec!(0),
            },
        )
        .is_none());
    }
}
