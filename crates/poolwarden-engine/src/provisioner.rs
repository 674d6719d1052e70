//! Liquidity provisioner
//!
//! Computes the AMM-matched amounts from current reserves, drives the
//! approve and add-liquidity calls through the gateway, and waits for
//! on-chain confirmation with a bounded timeout. Matching can only
//! reduce amounts, never inflate them.

use poolwarden_core::{
    AddLiquidityRequest, ChainConfig, ChainGateway, EngineConfig, PoolReserves, ProvisionError,
    Proposal, SafetyConfig, TxOutcome, TxRef,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// AMM-matched amounts and submission minimums for one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionPlan {
    pub matched_a: Decimal,
    pub matched_b: Decimal,
    pub min_a: Decimal,
    pub min_b: Decimal,
    /// Estimated LP mint from current reserves; zero when the pool's LP
    /// supply is unknown (fresh pool)
    pub expected_lp: Decimal,
}

/// Realized result of a confirmed liquidity-add
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub used_a: Decimal,
    pub used_b: Decimal,
    pub lp_tokens: Decimal,
    pub tx_ref: TxRef,
}

/// Compute the AMM-matched pair for the proposal at current reserves.
///
/// The side whose full amount would demand more of the other side than
/// is available is the binding one; the other side is scaled down to
/// the pool ratio.
pub fn plan_provision(
    proposal: &Proposal,
    reserves: &PoolReserves,
    safety: &SafetyConfig,
) -> Result<ProvisionPlan, ProvisionError> {
    if reserves.reserve_a <= Decimal::ZERO || reserves.reserve_b <= Decimal::ZERO {
        return Err(ProvisionError::EmptyPool);
    }

    let ratio_b = proposal.amount_a * reserves.reserve_b / reserves.reserve_a;
    let (matched_a, matched_b) = if ratio_b <= proposal.amount_b {
        // A is binding; B is scaled to the pool ratio
        (proposal.amount_a, ratio_b)
    } else {
        (
            proposal.amount_b * reserves.reserve_a / reserves.reserve_b,
            proposal.amount_b,
        )
    };

    let slippage_factor = dec!(1) - safety.slippage_tolerance_bps / dec!(10000);
    let expected_lp = if reserves.lp_supply > Decimal::ZERO {
        (matched_a * reserves.lp_supply / reserves.reserve_a)
            .min(matched_b * reserves.lp_supply / reserves.reserve_b)
    } else {
        Decimal::ZERO
    };

    Ok(ProvisionPlan {
        matched_a,
        matched_b,
        min_a: matched_a * slippage_factor,
        min_b: matched_b * slippage_factor,
        expected_lp,
    })
}

/// Drives gateway calls for one approved batch
pub struct LiquidityProvisioner {
    gateway: Arc<dyn ChainGateway>,
    token_a: String,
    token_b: String,
    collection_account: String,
    confirmation_timeout: Duration,
    confirmation_poll: Duration,
}

impl LiquidityProvisioner {
    pub fn new(gateway: Arc<dyn ChainGateway>, chain: &ChainConfig, engine: &EngineConfig) -> Self {
        Self {
            gateway,
            token_a: chain.token_a.clone(),
            token_b: chain.token_b.clone(),
            collection_account: chain.collection_account.clone(),
            confirmation_timeout: Duration::from_secs(engine.confirmation_timeout_secs),
            confirmation_poll: Duration::from_secs(engine.confirmation_poll_secs),
        }
    }

    /// Grant the router allowances for both tokens. Re-approving to a
    /// level already granted is safe, so this can be retried freely.
    pub async fn approve_pair(&self, plan: &ProvisionPlan) -> Result<(), ProvisionError> {
        self.gateway
            .approve(&self.token_a, plan.matched_a)
            .await
            .map_err(|e| ProvisionError::Approval(e.to_string()))?;
        self.gateway
            .approve(&self.token_b, plan.matched_b)
            .await
            .map_err(|e| ProvisionError::Approval(e.to_string()))?;
        Ok(())
    }

    /// Broadcast the add-liquidity transaction
    pub async fn submit(&self, plan: &ProvisionPlan) -> Result<TxRef, ProvisionError> {
        let request = AddLiquidityRequest {
            token_a: self.token_a.clone(),
            token_b: self.token_b.clone(),
            amount_a_desired: plan.matched_a,
            amount_b_desired: plan.matched_b,
            amount_a_min: plan.min_a,
            amount_b_min: plan.min_b,
            to: self.collection_account.clone(),
            deadline_secs: self.confirmation_timeout.as_secs(),
        };

        let tx_ref = self
            .gateway
            .add_liquidity(request)
            .await
            .map_err(|e| ProvisionError::Submission(e.to_string()))?;

        info!(tx_ref = %tx_ref, matched_a = %plan.matched_a, matched_b = %plan.matched_b, "Liquidity-add broadcast");
        Ok(tx_ref)
    }

    /// Poll for the transaction outcome until confirmed, reverted, or
    /// the timeout elapses
    pub async fn await_outcome(&self, tx_ref: &str) -> Result<ProvisionOutcome, ProvisionError> {
        let deadline = tokio::time::Instant::now() + self.confirmation_timeout;

        loop {
            match self.gateway.tx_outcome(tx_ref).await {
                Ok(TxOutcome::Confirmed {
                    used_a,
                    used_b,
                    lp_tokens,
                }) => {
                    return Ok(ProvisionOutcome {
                        used_a,
                        used_b,
                        lp_tokens,
                        tx_ref: tx_ref.to_string(),
                    });
                }
                Ok(TxOutcome::Reverted) => {
                    return Err(ProvisionError::Reverted(tx_ref.to_string()));
                }
                Ok(TxOutcome::Pending) => {
                    debug!(tx_ref = %tx_ref, "Transaction still pending");
                }
                // Transient lookup errors don't fail the batch; the
                // timeout is the bound
                Err(e) => {
                    warn!(tx_ref = %tx_ref, error = %e, "Receipt lookup failed");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ProvisionError::ConfirmationTimeout {
                    tx_ref: tx_ref.to_string(),
                    timeout_secs: self.confirmation_timeout.as_secs(),
                });
            }

            sleep(self.confirmation_poll).await;
        }
    }
}
