use crate::error::GatewayError;
use crate::types::{AddLiquidityRequest, PoolReserves, TxOutcome, TxRef};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Capability wrapper around the external RPC/contract layer.
///
/// The engine never reimplements token or AMM logic; everything it knows
/// about the chain flows through this trait.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Current balance of `token` held by `account`
    async fn token_balance(&self, token: &str, account: &str) -> Result<Decimal, GatewayError>;

    /// Current reserves and LP supply of the pair
    async fn pool_reserves(&self, pair: &str) -> Result<PoolReserves, GatewayError>;

    /// Ensure the AMM router may spend at least `amount` of `token`.
    /// Re-approving to a level already granted is a no-op on the relay side.
    async fn approve(&self, token: &str, amount: Decimal) -> Result<(), GatewayError>;

    /// Broadcast an add-liquidity transaction; returns once accepted into
    /// the mempool, not once confirmed
    async fn add_liquidity(&self, request: AddLiquidityRequest) -> Result<TxRef, GatewayError>;

    /// Look up the outcome of a previously broadcast transaction
    async fn tx_outcome(&self, tx_ref: &str) -> Result<TxOutcome, GatewayError>;

    /// Whether submissions are being simulated
    fn is_dry_run(&self) -> bool;
}

/// External multisig approval signal, polled when `require_multisig` is
/// set. The engine never grants approvals itself.
#[async_trait]
pub trait ApprovalSource: Send + Sync {
    /// Whether governance has pre-approved this exact
    /// `(amount_a, amount_b, day)` tuple
    async fn is_approved(
        &self,
        amount_a: Decimal,
        amount_b: Decimal,
        day: &str,
    ) -> Result<bool, GatewayError>;
}
