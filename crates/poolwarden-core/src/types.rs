//! Core domain types and configuration model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Token contract address (opaque to the engine)
pub type TokenAddress = String;

/// Account address
pub type AccountAddress = String;

/// AMM pair contract address
pub type PairAddress = String;

/// Transaction reference returned by the chain relay
pub type TxRef = String;

/// Batch identifier (UUID v4)
pub type BatchId = String;

/// UTC day key in `%Y-%m-%d` format, used for daily usage accounting
pub fn utc_day(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// Point-in-time observation of the collection account's balances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Ledger row id (0 until persisted)
    pub id: i64,
    pub taken_at: DateTime<Utc>,
    pub balance_a: Decimal,
    pub balance_b: Decimal,
}

/// A depositor's credited contribution, supplied by the external
/// attribution feed. Stamped with a batch id once consumed; a record
/// that straddles a batch boundary is split and the remainder
/// re-inserted unstamped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributionRecord {
    pub id: i64,
    pub depositor: AccountAddress,
    pub amount_a: Decimal,
    pub amount_b: Decimal,
    pub observed_at: DateTime<Utc>,
    pub batch_id: Option<BatchId>,
    /// LP tokens allocated to this record, set together with `batch_id`
    pub lp_allocation: Option<Decimal>,
}

/// Batch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Proposed,
    Approved,
    Submitted,
    Confirmed,
    Failed,
    Aborted,
}

impl BatchStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Confirmed | BatchStatus::Failed | BatchStatus::Aborted
        )
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BatchStatus::Proposed => "proposed",
            BatchStatus::Approved => "approved",
            BatchStatus::Submitted => "submitted",
            BatchStatus::Confirmed => "confirmed",
            BatchStatus::Failed => "failed",
            BatchStatus::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposed" => Ok(BatchStatus::Proposed),
            "approved" => Ok(BatchStatus::Approved),
            "submitted" => Ok(BatchStatus::Submitted),
            "confirmed" => Ok(BatchStatus::Confirmed),
            "failed" => Ok(BatchStatus::Failed),
            "aborted" => Ok(BatchStatus::Aborted),
            other => Err(format!("unknown batch status: {}", other)),
        }
    }
}

/// A single liquidity-add attempt and its outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    /// Amounts proposed by the evaluator
    pub amount_a: Decimal,
    pub amount_b: Decimal,
    /// AMM-ratio-matched amounts actually submitted (zero until planned)
    pub matched_a: Decimal,
    pub matched_b: Decimal,
    /// LP tokens expected from current reserves (zero until planned)
    pub expected_lp: Decimal,
    /// LP tokens actually minted on-chain
    pub actual_lp: Option<Decimal>,
    pub status: BatchStatus,
    /// Abort/failure reason, when applicable
    pub reason: Option<String>,
    pub tx_ref: Option<TxRef>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Batch {
    /// Create a freshly proposed batch
    pub fn proposed(amount_a: Decimal, amount_b: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            amount_a,
            amount_b,
            matched_a: Decimal::ZERO,
            matched_b: Decimal::ZERO,
            expected_lp: Decimal::ZERO,
            actual_lp: None,
            status: BatchStatus::Proposed,
            reason: None,
            tx_ref: None,
            created_at: now,
            confirmed_at: None,
        }
    }
}

/// Per-UTC-day committed amounts. `used_*` only ever grows; `reserved_*`
/// holds the in-flight batch's amounts until it confirms or fails.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyUsage {
    pub day: String,
    pub used_a: Decimal,
    pub used_b: Decimal,
    pub reserved_a: Decimal,
    pub reserved_b: Decimal,
}

impl DailyUsage {
    /// Amounts counted against today's cap, including in-flight reservations
    pub fn committed_a(&self) -> Decimal {
        self.used_a + self.reserved_a
    }

    pub fn committed_b(&self) -> Decimal {
        self.used_b + self.reserved_b
    }
}

/// Evaluator output: the amounts a batch would deploy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    pub amount_a: Decimal,
    pub amount_b: Decimal,
}

/// Pool state read through the gateway
#[derive(Debug, Clone, Copy)]
pub struct PoolReserves {
    pub reserve_a: Decimal,
    pub reserve_b: Decimal,
    /// Total LP token supply of the pair, used to estimate the mint
    pub lp_supply: Decimal,
}

/// Outcome of a submitted transaction as reported by the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// Not yet included
    Pending,
    /// Included and succeeded
    Confirmed {
        used_a: Decimal,
        used_b: Decimal,
        lp_tokens: Decimal,
    },
    /// Included but reverted; no token movement took place
    Reverted,
}

/// Parameters of an add-liquidity submission
#[derive(Debug, Clone, Serialize)]
pub struct AddLiquidityRequest {
    pub token_a: TokenAddress,
    pub token_b: TokenAddress,
    pub amount_a_desired: Decimal,
    pub amount_b_desired: Decimal,
    pub amount_a_min: Decimal,
    pub amount_b_min: Decimal,
    pub to: AccountAddress,
    /// Seconds from submission after which the AMM must reject the call
    pub deadline_secs: u64,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Top-level application configuration, loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

/// Chain relay endpoints and the immutable deployment addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Base URL of the chain relay service
    pub relay_url: String,
    /// Base URL of the multisig approval registry
    pub approval_registry_url: String,
    /// Account whose balances are monitored
    pub collection_account: AccountAddress,
    pub token_a: TokenAddress,
    pub token_b: TokenAddress,
    pub pair: PairAddress,
    /// HTTP request timeout for relay calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Log submissions instead of sending them
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_dry_run() -> bool {
    true
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            relay_url: "http://127.0.0.1:8545".to_string(),
            approval_registry_url: "http://127.0.0.1:8560".to_string(),
            collection_account: String::new(),
            token_a: String::new(),
            token_b: String::new(),
            pair: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
            dry_run: default_dry_run(),
        }
    }
}

/// Hot-reloadable safety limits. The engine re-reads this before every
/// batch decision; it is never cached across ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Minimum balance of each token before a batch may trigger
    pub min_threshold_a: Decimal,
    pub min_threshold_b: Decimal,
    /// Per-batch caps
    pub max_single_tx_a: Decimal,
    pub max_single_tx_b: Decimal,
    /// Per-UTC-day caps across all confirmed batches
    pub daily_limit_a: Decimal,
    pub daily_limit_b: Decimal,
    /// Acceptable shortfall between desired and realized amounts
    #[serde(default = "default_slippage_tolerance_bps")]
    pub slippage_tolerance_bps: Decimal,
    /// Maximum implied-price shift a batch may cause
    #[serde(default = "default_max_price_impact_bps")]
    pub max_price_impact_bps: Decimal,
    /// Require an external multisig approval for each batch
    #[serde(default)]
    pub require_multisig: bool,
    /// Master off switch; no batch triggers while set
    #[serde(default = "default_emergency_stop")]
    pub emergency_stop: bool,
}

fn default_slippage_tolerance_bps() -> Decimal {
    dec!(50)
}

fn default_max_price_impact_bps() -> Decimal {
    dec!(100)
}

fn default_emergency_stop() -> bool {
    // A missing config must not trade
    true
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            min_threshold_a: Decimal::ZERO,
            min_threshold_b: Decimal::ZERO,
            max_single_tx_a: Decimal::ZERO,
            max_single_tx_b: Decimal::ZERO,
            daily_limit_a: Decimal::ZERO,
            daily_limit_b: Decimal::ZERO,
            slippage_tolerance_bps: default_slippage_tolerance_bps(),
            max_price_impact_bps: default_max_price_impact_bps(),
            require_multisig: false,
            emergency_stop: default_emergency_stop(),
        }
    }
}

/// Loop timing and storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Bound on waiting for an on-chain receipt before the batch fails
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    /// Receipt polling cadence while a batch is in flight
    #[serde(default = "default_confirmation_poll_secs")]
    pub confirmation_poll_secs: u64,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_confirmation_timeout_secs() -> u64 {
    180
}

fn default_confirmation_poll_secs() -> u64 {
    3
}

fn default_db_path() -> String {
    "data/poolwarden.db".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            confirmation_poll_secs: default_confirmation_poll_secs(),
            db_path: default_db_path(),
        }
    }
}

/// Operator control server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Bearer token required on every control request when set
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8787".to_string()
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_listen_addr(),
            auth_token: None,
        }
    }
}
